//! End-to-end batch runs against local TLS endpoints.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use tlsbatch::{Pipeline, PipelineConfig, HEADER};

fn parse_rows(output: &[u8]) -> (Vec<String>, HashMap<String, Vec<String>>) {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .from_reader(output);
    let header = reader
        .headers()
        .unwrap()
        .iter()
        .map(String::from)
        .collect();
    let mut rows = HashMap::new();
    for record in reader.records() {
        let record = record.unwrap();
        let fields: Vec<String> = record.iter().map(String::from).collect();
        assert_eq!(fields.len(), 6);
        assert!(rows.insert(fields[0].clone(), fields).is_none());
    }
    (header, rows)
}

#[test]
fn test_mixed_batch() {
    let valid = common::days_from_now(60);
    let expired = common::days_from_now(-10);
    let valid_port = common::tls_server(valid);
    let expired_port = common::tls_server(expired);
    let closed_port = common::closed_port();

    let input = format!(
        "127.0.0.1:{valid}\n\n  https://127.0.0.1:{expired}  \nhttp://127.0.0.1:{closed}\n\r\nunix:///nohost\nhttps://[::1\n",
        valid = valid_port,
        expired = expired_port,
        closed = closed_port,
    );

    let pipeline = Pipeline::new(PipelineConfig {
        pool_size: 3,
        queue_capacity: 1,
        timeout: Duration::from_secs(5),
        flush_interval: Duration::from_millis(50),
    })
    .unwrap();
    let mut output = Vec::new();
    let summary = pipeline.run(input.as_bytes(), &mut output).unwrap();

    assert_eq!(summary.dispatched, 5);
    assert_eq!(summary.ok, 1);
    assert_eq!(summary.bad, 4);
    assert_eq!(summary.rows_written, 5);

    let (header, rows) = parse_rows(&output);
    assert_eq!(header, HEADER);
    assert_eq!(rows.len(), 5);

    let ok = &rows[&format!("127.0.0.1:{}", valid_port)];
    assert_eq!(ok[1], "127.0.0.1");
    assert_eq!(ok[2], valid_port.to_string());
    assert_eq!(ok[3], "OK");
    assert_eq!(ok[4], "");
    assert_eq!(ok[5], valid.to_rfc3339_opts(chrono::SecondsFormat::Secs, true));

    let stale = &rows[&format!("https://127.0.0.1:{}", expired_port)];
    assert_eq!(stale[3], "BAD");
    assert_eq!(stale[4], "validity expired");
    assert_eq!(stale[5], expired.to_rfc3339_opts(chrono::SecondsFormat::Secs, true));

    let refused = &rows[&format!("http://127.0.0.1:{}", closed_port)];
    assert_eq!(refused[3], "BAD");
    assert!(refused[4].starts_with("Dial error: "));
    assert_eq!(refused[5], "");

    let no_host = &rows["unix:///nohost"];
    assert_eq!(no_host[2], "443");
    assert_eq!(no_host[4], "host not set");

    let unparsable = &rows["https://[::1"];
    assert_eq!(unparsable[1], "");
    assert_eq!(unparsable[2], "");
    assert!(unparsable[4].starts_with("Parse URL: "));
}

#[test]
fn test_slow_hosts_do_not_block_siblings() {
    let stalled = common::silent_server(Duration::from_secs(10));
    let healthy = common::tls_server(common::days_from_now(30));

    let mut input = String::new();
    for _ in 0..4 {
        input.push_str(&format!("127.0.0.1:{}\n", stalled));
    }
    for _ in 0..8 {
        input.push_str(&format!("127.0.0.1:{}\n", healthy));
    }

    let pipeline = Pipeline::new(PipelineConfig {
        pool_size: 6,
        queue_capacity: 2,
        timeout: Duration::from_millis(400),
        flush_interval: Duration::from_millis(50),
    })
    .unwrap();
    let mut output = Vec::new();
    let summary = pipeline.run(input.as_bytes(), &mut output).unwrap();

    assert_eq!(summary.dispatched, 12);
    assert_eq!(summary.ok, 8);
    assert_eq!(summary.bad, 4);

    let text = String::from_utf8(output).unwrap();
    assert_eq!(text.matches("Handshake error: deadline exceeded").count(), 4);
    assert_eq!(text.lines().count(), 13);
}
