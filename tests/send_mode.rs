mod common;

use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use common::Loopback;
use mq_stress::lifecycle::drive;
use mq_stress::{AckLog, EventKind, LogRecord, Mode, Shutdown};

fn read_records(log: &AckLog) -> Vec<LogRecord> {
    fs::read_to_string(log.path())
        .unwrap()
        .lines()
        .map(|line| line.parse().expect("well formed record"))
        .collect()
}

#[test]
fn three_intervals_log_three_acknowledgments() {
    let dir = TempDir::new().unwrap();
    let log = Arc::new(AckLog::open(dir.path().join("sender.log")).unwrap());
    let shutdown = Shutdown::new();
    let transport = Loopback::new().stop_after(3, &shutdown);
    let broker = transport.state();

    drive(
        Mode::Send,
        transport,
        Arc::clone(&log),
        &shutdown,
        Duration::from_millis(5),
    )
    .unwrap();

    assert!(log.is_closed());
    assert!(*broker.closed.lock().unwrap());

    let records = read_records(&log);
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.kind == EventKind::Acknowledged));
    let ids: BTreeSet<_> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["0", "1", "2"].iter().copied().collect());
}

#[test]
fn out_of_order_acknowledgments_cover_every_id() {
    let dir = TempDir::new().unwrap();
    let log = Arc::new(AckLog::open(dir.path().join("sender.log")).unwrap());
    let shutdown = Shutdown::new();
    let transport = Loopback::new().stop_after(40, &shutdown).ack_jitter(25);
    let broker = transport.state();

    drive(
        Mode::Send,
        transport,
        Arc::clone(&log),
        &shutdown,
        Duration::from_millis(1),
    )
    .unwrap();

    let expected: Vec<String> = (0..40).map(|i| i.to_string()).collect();
    assert_eq!(*broker.published.lock().unwrap(), expected);

    let mut logged: Vec<String> = read_records(&log).into_iter().map(|r| r.id).collect();
    logged.sort_by_key(|id| id.parse::<u64>().unwrap());
    assert_eq!(logged, expected);
}

#[test]
fn shutdown_before_first_interval_sends_one() {
    let dir = TempDir::new().unwrap();
    let log = Arc::new(AckLog::open(dir.path().join("sender.log")).unwrap());
    let shutdown = Shutdown::new();
    let transport = Loopback::new().stop_after(1, &shutdown);

    drive(
        Mode::Send,
        transport,
        Arc::clone(&log),
        &shutdown,
        Duration::from_secs(3600),
    )
    .unwrap();

    let records = read_records(&log);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "0");
}
