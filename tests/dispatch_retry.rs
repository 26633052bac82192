// tests/dispatch_retry.rs

mod common;
use crate::common::builders::{added, modified};
use crate::common::{init_tracing, FlakyHandler, SlowHandler};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use changewatch::dispatch::{
    backoff_delay, deliver, spawn_dispatcher, DispatchOutcome, DispatchStatus, RetryPolicy,
    TerminalFailureLog,
};
use changewatch::watch::UnitId;

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        max_attempts,
        handler_timeout: Duration::from_secs(5),
    }
}

fn assert_close(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(10),
        "expected ~{expected:?}, got {actual:?}"
    );
}

#[test]
fn backoff_doubles_and_caps() {
    let base = Duration::from_secs(1);
    let max = Duration::from_secs(30);

    assert_eq!(backoff_delay(base, max, 1), Duration::from_secs(1));
    assert_eq!(backoff_delay(base, max, 2), Duration::from_secs(2));
    assert_eq!(backoff_delay(base, max, 3), Duration::from_secs(4));
    assert_eq!(backoff_delay(base, max, 5), Duration::from_secs(16));
    assert_eq!(backoff_delay(base, max, 6), max);
    assert_eq!(backoff_delay(base, max, u32::MAX), max);
}

#[tokio::test(start_paused = true)]
async fn retries_with_backoff_until_success() {
    init_tracing();
    let handler = FlakyHandler::new(2);

    let outcome = deliver(
        added("a", "h1"),
        Arc::new(handler.clone()),
        policy(5),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(outcome.status, DispatchStatus::Delivered);
    assert_eq!(outcome.attempts, 3);

    let times = handler.attempt_times("a");
    assert_eq!(times.len(), 3);
    assert_close(times[1] - times[0], Duration::from_secs(1));
    assert_close(times[2] - times[1], Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_attempts() {
    init_tracing();
    let handler = FlakyHandler::always_failing();

    let outcome = deliver(
        modified("c", "h1", "h2"),
        Arc::new(handler.clone()),
        policy(5),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(outcome.attempts, 5);
    match &outcome.status {
        DispatchStatus::TerminalFailure { last_error } => {
            assert!(last_error.contains("attempt 5"), "{last_error}")
        }
        other => panic!("expected terminal failure, got {other:?}"),
    }
    assert!(outcome.advances_baseline());

    // Let any stray retry timer fire; a 6th attempt would show up here.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(handler.attempts("c"), 5);
}

#[tokio::test(start_paused = true)]
async fn slow_attempt_counts_as_failure() {
    init_tracing();
    let handler = SlowHandler::new(Duration::from_secs(60));
    let mut policy = policy(2);
    policy.handler_timeout = Duration::from_secs(1);

    let outcome = deliver(
        added("a", "h1"),
        Arc::new(handler.clone()),
        policy,
        CancellationToken::new(),
    )
    .await;

    match &outcome.status {
        DispatchStatus::TerminalFailure { last_error } => {
            assert!(last_error.contains("timed out"), "{last_error}")
        }
        other => panic!("expected terminal failure, got {other:?}"),
    }
    assert_eq!(handler.started().len(), 2);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(handler.finished().is_empty(), "timed-out attempts must be aborted");
}

#[tokio::test(start_paused = true)]
async fn cancellation_abandons_delivery() {
    init_tracing();
    let handler = SlowHandler::new(Duration::from_secs(60));
    let cancel = CancellationToken::new();

    let task = tokio::spawn(deliver(
        added("a", "h1"),
        Arc::new(handler.clone()),
        policy(5),
        cancel.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let outcome = task.await.expect("deliver task");
    assert_eq!(outcome.status, DispatchStatus::Abandoned);
    assert!(!outcome.advances_baseline());
}

async fn collect(
    rx: &mut mpsc::UnboundedReceiver<DispatchOutcome>,
    n: usize,
) -> Vec<DispatchOutcome> {
    let mut out = Vec::new();
    while out.len() < n {
        out.push(rx.recv().await.expect("outcome channel open"));
    }
    out
}

#[tokio::test(start_paused = true)]
async fn dispatcher_serializes_per_unit_and_parallelizes_across_units() {
    init_tracing();
    let handler = SlowHandler::new(Duration::from_secs(1));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut dispatcher = spawn_dispatcher(Arc::new(handler.clone()), policy(3), 4, None, tx);

    dispatcher.submit(modified("a", "h1", "h2")).expect("open");
    dispatcher.submit(modified("a", "h2", "h3")).expect("open");
    dispatcher.submit(added("b", "h1")).expect("open");

    let outcomes = collect(&mut rx, 3).await;
    assert!(outcomes.iter().all(|o| o.status == DispatchStatus::Delivered));

    let a_targets: Vec<_> = outcomes
        .iter()
        .filter(|o| o.record.unit == UnitId::from("a"))
        .map(|o| o.record.current.clone().expect("present"))
        .collect();
    assert_eq!(a_targets.len(), 2);
    assert_eq!(a_targets[0].as_str(), "h2");
    assert_eq!(a_targets[1].as_str(), "h3");

    let started = handler.started();
    let start_of = |unit: &str| -> Vec<_> {
        started
            .iter()
            .filter(|(u, _)| u.as_str() == unit)
            .map(|(_, t)| *t)
            .collect()
    };
    let a_starts = start_of("a");
    let b_starts = start_of("b");
    assert_close(a_starts[1] - a_starts[0], Duration::from_secs(1));
    assert!(b_starts[0] < a_starts[1], "b must not wait for a");

    dispatcher.close();
    dispatcher.join().await;
}

#[tokio::test(start_paused = true)]
async fn dispatcher_respects_concurrency_limit() {
    init_tracing();
    let handler = SlowHandler::new(Duration::from_secs(1));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut dispatcher = spawn_dispatcher(Arc::new(handler.clone()), policy(3), 1, None, tx);

    for unit in ["a", "b", "c"] {
        dispatcher.submit(added(unit, "h1")).expect("open");
    }
    collect(&mut rx, 3).await;

    let starts: Vec<_> = handler.started().into_iter().map(|(_, t)| t).collect();
    assert_close(starts[1] - starts[0], Duration::from_secs(1));
    assert_close(starts[2] - starts[1], Duration::from_secs(1));

    dispatcher.close();
    dispatcher.join().await;
}

#[tokio::test(start_paused = true)]
async fn abort_abandons_queued_and_in_flight_records() {
    init_tracing();
    let handler = SlowHandler::new(Duration::from_secs(60));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut dispatcher = spawn_dispatcher(Arc::new(handler.clone()), policy(3), 4, None, tx);

    dispatcher.submit(modified("a", "h1", "h2")).expect("open");
    dispatcher.submit(modified("a", "h2", "h3")).expect("open");
    tokio::time::sleep(Duration::from_millis(100)).await;

    dispatcher.abort();
    dispatcher.join().await;

    let outcomes = collect(&mut rx, 2).await;
    assert!(outcomes.iter().all(|o| o.status == DispatchStatus::Abandoned));
    let queued = outcomes
        .iter()
        .find(|o| o.record.current.as_ref().map(|f| f.as_str()) == Some("h3"))
        .expect("queued record reported");
    assert_eq!(queued.attempts, 0);
    assert!(handler.finished().is_empty());
}

#[tokio::test(start_paused = true)]
async fn closed_dispatcher_rejects_submissions() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut dispatcher = spawn_dispatcher(Arc::new(FlakyHandler::new(0)), policy(1), 1, None, tx);

    dispatcher.close();
    assert!(dispatcher.is_closed());
    let rejected = dispatcher.submit(added("a", "h1")).expect_err("closed");
    assert_eq!(rejected.unit, UnitId::from("a"));
    dispatcher.join().await;
}

#[tokio::test(start_paused = true)]
async fn terminal_failures_are_written_to_the_failure_log() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let log_path = dir.path().join("state").join("failures.jsonl");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut dispatcher = spawn_dispatcher(
        Arc::new(FlakyHandler::always_failing()),
        policy(2),
        1,
        Some(TerminalFailureLog::new(&log_path)),
        tx,
    );
    dispatcher.submit(modified("c", "h1", "h2")).expect("open");

    let outcome = collect(&mut rx, 1).await.remove(0);
    assert!(matches!(outcome.status, DispatchStatus::TerminalFailure { .. }));
    dispatcher.close();
    dispatcher.join().await;

    let contents = std::fs::read_to_string(&log_path).expect("failure log written");
    let lines: Vec<_> = contents.lines().collect();
    assert_eq!(lines.len(), 1);

    let entry: serde_json::Value = serde_json::from_str(lines[0]).expect("json line");
    assert_eq!(entry["unit"], "c");
    assert_eq!(entry["kind"], "modified");
    assert_eq!(entry["previous"], "h1");
    assert_eq!(entry["current"], "h2");
    assert_eq!(entry["attempts"], 2);
    assert!(entry["last_error"].as_str().unwrap().contains("refused"));
}
