//! Bounded worker pool turning a stream of task lines into result rows.
//!
//! ```text
//! input lines -> task queue (bounded) -> N workers -> result channel -> sink thread
//! ```
//!
//! The producer runs on the calling thread and blocks when the queue is full.
//! Workers share the queue receiver and each owns a result sender. Shutdown is
//! driven by channel closure: once input is exhausted the producer drops the
//! queue sender, workers drain the queue and exit, and the last dropped result
//! sender lets the sink do its final flush. All threads are scoped, so `run`
//! cannot return while any of them is still alive.

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::checker::Checker;
use crate::error::PipelineError;
use crate::sink::ResultSink;
use crate::{CheckResult, CheckTask};

/// Longest per-task timeout or flush interval a run accepts.
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Tunables for one batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Number of concurrent workers
    pub pool_size: usize,
    /// Pending tasks buffered before the producer blocks
    pub queue_capacity: usize,
    /// Time allowed per task, from dial start to handshake completion
    pub timeout: Duration,
    /// How often buffered rows are flushed to the output
    pub flush_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            pool_size: 10,
            queue_capacity: 100,
            timeout: Duration::from_secs(5),
            flush_interval: Duration::from_secs(1),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        let reason = if self.pool_size == 0 {
            "pool size must be at least 1"
        } else if self.queue_capacity == 0 {
            "queue capacity must be at least 1"
        } else if self.timeout.is_zero() {
            "per-task timeout must be non-zero"
        } else if self.flush_interval.is_zero() {
            "flush interval must be non-zero"
        } else if self.timeout > MAX_INTERVAL {
            "per-task timeout must not exceed 24 hours"
        } else if self.flush_interval > MAX_INTERVAL {
            "flush interval must not exceed 24 hours"
        } else {
            return Ok(());
        };
        Err(PipelineError::InvalidConfig {
            reason: reason.to_string(),
        })
    }
}

/// Counters for a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Tasks accepted into the queue
    pub dispatched: usize,
    pub ok: usize,
    pub bad: usize,
    /// Data rows the sink wrote
    pub rows_written: usize,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.bad > 0
    }
}

/// Tracks dispatched and finished tasks and carries the abort signal.
#[derive(Debug, Default)]
struct Completion {
    dispatched: AtomicUsize,
    ok: AtomicUsize,
    bad: AtomicUsize,
    aborted: AtomicBool,
}

impl Completion {
    fn dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
    }

    fn undispatch(&self) {
        self.dispatched.fetch_sub(1, Ordering::SeqCst);
    }

    fn finish(&self, result: &CheckResult) {
        if result.is_ok() {
            self.ok.fetch_add(1, Ordering::SeqCst);
        } else {
            self.bad.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn in_flight(&self) -> usize {
        let finished = self.ok.load(Ordering::SeqCst) + self.bad.load(Ordering::SeqCst);
        self.dispatched
            .load(Ordering::SeqCst)
            .saturating_sub(finished)
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

struct Worker<'a> {
    id: usize,
    tasks: Arc<Mutex<Receiver<CheckTask>>>,
    results: Sender<CheckResult>,
    checker: &'a Checker,
    completion: &'a Completion,
    timeout: Duration,
}

impl Worker<'_> {
    fn run(self) {
        while !self.completion.is_aborted() {
            let task = match self.next_task() {
                Some(task) => task,
                None => break,
            };

            let deadline = Instant::now() + self.timeout;
            debug!("Start check on worker {}: {}", self.id, task.as_str());
            let result = self.checker.check(&task, deadline);
            if !result.is_ok() {
                info!("{}: {}", result.url, result.description);
            }

            self.completion.finish(&result);
            if self.results.send(result).is_err() {
                warn!("Result sink is gone, worker {} stopping", self.id);
                self.completion.abort();
                break;
            }
            debug!("Finish check on worker {}: {}", self.id, task.as_str());
        }
        debug!("Worker {} exiting", self.id);
    }

    /// Blocks until a task arrives; `None` once the queue is closed and empty.
    fn next_task(&self) -> Option<CheckTask> {
        let tasks = match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tasks.recv().ok()
    }
}

/// Reusable batch runner.
pub struct Pipeline {
    config: PipelineConfig,
    checker: Checker,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Pipeline, PipelineError> {
        config.validate()?;
        let checker = Checker::new().map_err(|source| PipelineError::TlsSetup { source })?;
        Ok(Pipeline { config, checker })
    }

    /// Checks every non-blank line of `input` and writes one row per task to
    /// `output`.
    ///
    /// Rows appear in completion order. Per-host failures become `BAD` rows;
    /// only read errors, write errors and worker panics fail the run.
    pub fn run<R, W>(&self, input: R, output: W) -> Result<RunSummary, PipelineError>
    where
        R: BufRead,
        W: Write + Send,
    {
        let started = Instant::now();
        let sink = ResultSink::new(output, self.config.flush_interval)?;
        let (task_tx, task_rx) = mpsc::sync_channel::<CheckTask>(self.config.queue_capacity);
        let (result_tx, result_rx) = mpsc::channel::<CheckResult>();
        let task_rx = Arc::new(Mutex::new(task_rx));
        let completion = Completion::default();

        info!(
            "Starting {} workers (queue capacity {}, timeout {:?})",
            self.config.pool_size, self.config.queue_capacity, self.config.timeout
        );

        let (produced, worker_panics, sink_outcome) = thread::scope(|scope| {
            let sink_handle = scope.spawn(move || sink.run(result_rx));

            let workers: Vec<_> = (1..=self.config.pool_size)
                .map(|id| {
                    let worker = Worker {
                        id,
                        tasks: Arc::clone(&task_rx),
                        results: result_tx.clone(),
                        checker: &self.checker,
                        completion: &completion,
                        timeout: self.config.timeout,
                    };
                    scope.spawn(move || worker.run())
                })
                .collect();
            // Workers now hold the only receiver and sender handles.
            drop(task_rx);
            drop(result_tx);

            let produced = produce(input, task_tx, &completion);

            let worker_panics = workers
                .into_iter()
                .map(|handle| handle.join())
                .filter(|joined| joined.is_err())
                .count();
            debug!("Pool drained, {} tasks in flight", completion.in_flight());
            (produced, worker_panics, sink_handle.join())
        });

        if worker_panics > 0 {
            error!("{} workers panicked", worker_panics);
            return Err(PipelineError::WorkerPanicked {
                name: format!("{} of {} workers", worker_panics, self.config.pool_size),
            });
        }
        let rows_written = match sink_outcome {
            Ok(outcome) => outcome?,
            Err(_) => {
                return Err(PipelineError::WorkerPanicked {
                    name: "result sink".to_string(),
                })
            }
        };
        produced?;

        let summary = RunSummary {
            dispatched: completion.dispatched.load(Ordering::SeqCst),
            ok: completion.ok.load(Ordering::SeqCst),
            bad: completion.bad.load(Ordering::SeqCst),
            rows_written,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        debug_assert_eq!(summary.dispatched, summary.ok + summary.bad);
        info!(
            "Checked {} hosts: {} OK, {} BAD in {} ms",
            summary.dispatched, summary.ok, summary.bad, summary.elapsed_ms
        );
        Ok(summary)
    }
}

/// Feeds trimmed, non-blank lines into the queue until end of input.
///
/// Lines that are not valid UTF-8 are decoded lossily and still dispatched,
/// so they come back as rows instead of ending the run. Only a failing reader
/// is fatal. Dropping `tasks` on return is what closes the queue.
fn produce<R: BufRead>(
    mut input: R,
    tasks: SyncSender<CheckTask>,
    completion: &Completion,
) -> Result<(), std::io::Error> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match input.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                error!("Reading input failed, aborting run: {}", err);
                completion.abort();
                return Err(err);
            }
        }
        let line = String::from_utf8_lossy(&buf);
        let task = match CheckTask::new(&line) {
            Some(task) => task,
            None => continue,
        };
        if completion.is_aborted() {
            break;
        }
        completion.dispatch();
        if tasks.send(task).is_err() {
            completion.undispatch();
            break;
        }
    }
    Ok(())
}
