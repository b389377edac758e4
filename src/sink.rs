//! Result sink: the only owner of the output table.
//!
//! Workers never touch the CSV writer. They send finished [`CheckResult`]s
//! over a channel and a single sink thread serializes them, so rows cannot
//! interleave. The same thread flushes on a fixed cadence while waiting for
//! results, and once more after the last sender hangs up.

use std::io::Write;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::CheckResult;

/// Column names of the output table, in record order.
pub const HEADER: [&str; 6] = ["URL", "Hostname", "Port", "Result", "Desc", "ValidityExpire"];

/// Field separator of the output table.
pub const DELIMITER: u8 = b';';

pub struct ResultSink<W: Write> {
    writer: csv::Writer<W>,
    flush_interval: Duration,
    written: usize,
}

impl<W: Write> ResultSink<W> {
    /// Wraps `output` and writes the header row.
    pub fn new(output: W, flush_interval: Duration) -> Result<Self, csv::Error> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(DELIMITER)
            .from_writer(output);
        writer.write_record(HEADER)?;
        Ok(ResultSink {
            writer,
            flush_interval,
            written: 0,
        })
    }

    pub fn write(&mut self, result: &CheckResult) -> Result<(), csv::Error> {
        self.writer.write_record(result.to_record())?;
        self.written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), csv::Error> {
        self.writer.flush()?;
        trace!("Flushed {} rows", self.written);
        Ok(())
    }

    /// Drains `results` until every sender is dropped.
    ///
    /// Buffered rows are flushed every `flush_interval` and once more before
    /// returning. Returns the number of data rows written. Any write or flush
    /// error ends the loop immediately; dropping the receiver then tells the
    /// workers to stop.
    pub fn run(mut self, results: Receiver<CheckResult>) -> Result<usize, csv::Error> {
        let mut last_flush = Instant::now();
        loop {
            let wait = self.flush_interval.saturating_sub(last_flush.elapsed());
            match results.recv_timeout(wait) {
                Ok(result) => self.write(&result)?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if last_flush.elapsed() >= self.flush_interval {
                self.flush()?;
                last_flush = Instant::now();
            }
        }
        self.flush()?;
        debug!("Result sink closed after {} rows", self.written);
        Ok(self.written)
    }
}
