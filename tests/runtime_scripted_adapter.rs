// tests/runtime_scripted_adapter.rs

mod common;
use crate::common::builders::ConfigBuilder;
use crate::common::{
    baseline, init_tracing, FlakyHandler, RecordingHandler, ScriptStep, ScriptedAdapter,
    SlowHandler,
};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use changewatch::config::ConfigFile;
use changewatch::engine::{ControllerState, ShutdownHandle, WatchLoop, WatchReport};
use changewatch::errors::{AdapterError, ChangewatchError, Result};
use changewatch::fs::MockFileSystem;
use changewatch::handler::ReactionHandler;
use changewatch::watch::{
    BaselineStore, ChangeKind, FileBaselineStore, Fingerprint, Observation, UnitId,
};

const BASELINE: &str = "baseline";

fn store_on(fs: &MockFileSystem) -> FileBaselineStore {
    FileBaselineStore::new(BASELINE, Arc::new(fs.clone()))
}

fn seed(fs: &MockFileSystem, pairs: &[(&str, &str)]) {
    store_on(fs).save(&baseline(pairs)).expect("seed baseline");
}

fn persisted(fs: &MockFileSystem) -> BTreeMap<String, String> {
    store_on(fs)
        .load()
        .expect("load baseline")
        .fingerprints()
        .into_iter()
        .map(|(u, f)| (u.as_str().to_string(), f.as_str().to_string()))
        .collect()
}

fn fast_config() -> ConfigBuilder {
    ConfigBuilder::new()
        .poll_interval("1s")
        .quiet_window("500ms")
        .retry_delays("1s", "30s")
}

fn build(
    cfg: &ConfigFile,
    adapter: ScriptedAdapter,
    handler: Arc<dyn ReactionHandler>,
    fs: &MockFileSystem,
    once: bool,
) -> (WatchLoop, ShutdownHandle) {
    let (shutdown, rx) = ShutdownHandle::channel();
    let watch_loop = WatchLoop::new(cfg, adapter, handler, Box::new(store_on(fs)), rx, once)
        .expect("loop builds");
    (watch_loop, shutdown)
}

/// Run the loop and request a graceful stop after `after`.
async fn run_for(
    watch_loop: WatchLoop,
    shutdown: ShutdownHandle,
    after: Duration,
) -> Result<WatchReport> {
    let (report, ()) = tokio::join!(watch_loop.run(), async move {
        sleep(after).await;
        shutdown.graceful();
    });
    report
}

#[tokio::test(start_paused = true)]
async fn poll_adapter_changes_reach_the_handler_once() {
    init_tracing();
    let fs = MockFileSystem::new();
    let handler = RecordingHandler::new();
    let adapter = ScriptedAdapter::poll(vec![
        ScriptStep::snapshot(&[("A", "h1")]),
        ScriptStep::snapshot(&[("A", "h1")]),
        ScriptStep::snapshot(&[("A", "h2")]),
    ]);

    let cfg = fast_config().build();
    let (watch_loop, shutdown) = build(&cfg, adapter, Arc::new(handler.clone()), &fs, false);
    let report = run_for(watch_loop, shutdown, Duration::from_secs(10))
        .await
        .expect("clean stop");

    let records = handler.records();
    assert_eq!(records.len(), 2, "{records:?}");
    assert_eq!(records[0].kind, ChangeKind::Added);
    assert_eq!(records[1].kind, ChangeKind::Modified);
    assert_eq!(records[1].previous, Some(Fingerprint::from("h1")));

    assert_eq!(report.state, ControllerState::Stopped);
    assert_eq!(report.stats.delivered, 2);
    assert!(report.stats.cycles >= 3);
    assert_eq!(persisted(&fs).get("A").map(String::as_str), Some("h2"));
}

#[tokio::test(start_paused = true)]
async fn terminal_failure_advances_baseline_without_a_sixth_attempt() {
    init_tracing();
    let fs = MockFileSystem::new();
    seed(&fs, &[("C", "h1")]);
    let dir = tempfile::tempdir().expect("tempdir");
    let failures = dir.path().join("failures.jsonl");

    let handler = FlakyHandler::always_failing();
    let adapter = ScriptedAdapter::poll(vec![ScriptStep::snapshot(&[("C", "h2")])]);
    let cfg = fast_config().max_attempts(5).failure_log(&failures).build();

    let (watch_loop, shutdown) = build(&cfg, adapter, Arc::new(handler.clone()), &fs, false);
    let report = run_for(watch_loop, shutdown, Duration::from_secs(120))
        .await
        .expect("clean stop");

    assert_eq!(handler.attempts("C"), 5);
    assert_eq!(report.stats.terminal_failures, 1);
    assert_eq!(report.degraded, vec![UnitId::from("C")]);
    assert_eq!(persisted(&fs).get("C").map(String::as_str), Some("h2"));

    let log = std::fs::read_to_string(&failures).expect("failure log");
    assert_eq!(log.lines().count(), 1);
}

#[tokio::test(start_paused = true)]
async fn reconnect_exhaustion_is_fatal() {
    init_tracing();
    let fs = MockFileSystem::new();
    let adapter = ScriptedAdapter::poll(vec![]).failing_connects(100);
    let counters = adapter.counters();
    let cfg = fast_config().reconnect(3, "1s", "4s").build();

    let (watch_loop, _shutdown) = build(&cfg, adapter, Arc::new(RecordingHandler::new()), &fs, false);
    let started = Instant::now();
    let result = watch_loop.run().await;

    match result {
        Err(ChangewatchError::Adapter(AdapterError::Fatal { attempts, last_error })) => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("refused"), "{last_error}");
        }
        other => panic!("expected fatal adapter error, got {other:?}"),
    }
    assert_eq!(counters.connects(), 3);
    // 1s + 2s of backoff between the three attempts.
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn transient_connect_failures_recover() {
    init_tracing();
    let fs = MockFileSystem::new();
    let handler = RecordingHandler::new();
    let adapter =
        ScriptedAdapter::poll(vec![ScriptStep::snapshot(&[("A", "h1")])]).failing_connects(2);
    let counters = adapter.counters();
    let cfg = fast_config().reconnect(5, "1s", "30s").build();

    let (watch_loop, shutdown) = build(&cfg, adapter, Arc::new(handler.clone()), &fs, false);
    let report = run_for(watch_loop, shutdown, Duration::from_secs(10))
        .await
        .expect("clean stop");

    assert_eq!(counters.connects(), 3);
    assert_eq!(report.stats.observe_failures, 2);
    assert_eq!(report.stats.reconnects, 1);
    assert_eq!(handler.units(), vec!["A"]);
}

#[tokio::test(start_paused = true)]
async fn observation_failure_does_not_lose_or_repeat_changes() {
    init_tracing();
    let fs = MockFileSystem::new();
    let handler = RecordingHandler::new();
    let adapter = ScriptedAdapter::poll(vec![
        ScriptStep::snapshot(&[("A", "h1")]),
        ScriptStep::fail("listing failed"),
        ScriptStep::snapshot(&[("A", "h2")]),
    ]);
    let counters = adapter.counters();

    let cfg = fast_config().build();
    let (watch_loop, shutdown) = build(&cfg, adapter, Arc::new(handler.clone()), &fs, false);
    let report = run_for(watch_loop, shutdown, Duration::from_secs(10))
        .await
        .expect("clean stop");

    let kinds: Vec<_> = handler.records().iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![ChangeKind::Added, ChangeKind::Modified]);
    assert_eq!(counters.connects(), 2);
    assert_eq!(report.stats.observe_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn hung_poll_is_bounded_by_observe_timeout() {
    init_tracing();
    let fs = MockFileSystem::new();
    let handler = RecordingHandler::new();
    let adapter = ScriptedAdapter::poll(vec![
        ScriptStep::Hang,
        ScriptStep::snapshot(&[("A", "h1")]),
    ]);

    let cfg = fast_config().observe_timeout("2s").build();
    let (watch_loop, shutdown) = build(&cfg, adapter, Arc::new(handler.clone()), &fs, false);
    let report = run_for(watch_loop, shutdown, Duration::from_secs(10))
        .await
        .expect("clean stop");

    assert_eq!(report.stats.observe_failures, 1);
    assert_eq!(handler.units(), vec!["A"]);
}

#[tokio::test(start_paused = true)]
async fn graceful_stop_waits_for_in_flight_dispatch() {
    init_tracing();
    let fs = MockFileSystem::new();
    let handler = SlowHandler::new(Duration::from_secs(3));
    let adapter = ScriptedAdapter::poll(vec![ScriptStep::snapshot(&[("A", "h1")])]);

    let cfg = fast_config().drain_grace_timeout("10s").build();
    let (watch_loop, shutdown) = build(&cfg, adapter, Arc::new(handler.clone()), &fs, false);
    let started = Instant::now();
    let report = run_for(watch_loop, shutdown, Duration::from_secs(1))
        .await
        .expect("clean stop");

    assert_eq!(report.state, ControllerState::Stopped);
    assert_eq!(handler.finished().len(), 1);
    assert_eq!(report.stats.delivered, 1);
    assert!(started.elapsed() >= Duration::from_millis(3500));
    assert_eq!(persisted(&fs).get("A").map(String::as_str), Some("h1"));
}

#[tokio::test(start_paused = true)]
async fn grace_timeout_abandons_slow_dispatch() {
    init_tracing();
    let fs = MockFileSystem::new();
    let handler = SlowHandler::new(Duration::from_secs(60));
    let adapter = ScriptedAdapter::poll(vec![ScriptStep::snapshot(&[("A", "h1")])]);

    let cfg = fast_config().drain_grace_timeout("2s").build();
    let (watch_loop, shutdown) = build(&cfg, adapter, Arc::new(handler.clone()), &fs, false);
    let started = Instant::now();
    let report = run_for(watch_loop, shutdown, Duration::from_secs(1))
        .await
        .expect("clean stop");

    assert_eq!(report.state, ControllerState::Stopped);
    assert_eq!(report.stats.abandoned, 1);
    assert!(handler.finished().is_empty());
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(persisted(&fs).is_empty(), "abandoned change must not advance the baseline");
}

#[tokio::test(start_paused = true)]
async fn push_adapter_events_are_debounced() {
    init_tracing();
    let fs = MockFileSystem::new();
    seed(&fs, &[("A", "h1")]);
    let handler = RecordingHandler::new();
    let adapter = ScriptedAdapter::push(vec![
        ScriptStep::snapshot(&[("A", "h1")]),
        ScriptStep::present("B", "h1"),
        ScriptStep::gone("B"),
        ScriptStep::present("A", "h2"),
    ]);

    let cfg = fast_config().build();
    let (watch_loop, shutdown) = build(&cfg, adapter, Arc::new(handler.clone()), &fs, false);
    run_for(watch_loop, shutdown, Duration::from_secs(5))
        .await
        .expect("clean stop");

    let records = handler.records();
    assert_eq!(records.len(), 1, "{records:?}");
    assert_eq!(records[0].unit, UnitId::from("A"));
    assert_eq!(records[0].kind, ChangeKind::Modified);
}

#[tokio::test(start_paused = true)]
async fn once_mode_runs_a_single_pass() {
    init_tracing();
    let fs = MockFileSystem::new();
    let handler = RecordingHandler::new();
    let adapter = ScriptedAdapter::poll(vec![ScriptStep::snapshot(&[("A", "h1"), ("B", "h2")])]);
    let counters = adapter.counters();

    let cfg = fast_config().build();
    let (watch_loop, _shutdown) = build(&cfg, adapter, Arc::new(handler.clone()), &fs, true);
    let report = watch_loop.run().await.expect("once run");

    assert_eq!(report.state, ControllerState::Stopped);
    assert_eq!(report.units_observed, 2);
    assert_eq!(report.stats.delivered, 2);
    assert_eq!(counters.nexts(), 1);

    let mut units = handler.units();
    units.sort();
    assert_eq!(units, vec!["A", "B"]);
}

#[tokio::test(start_paused = true)]
async fn persisted_baseline_survives_restart() {
    init_tracing();
    let fs = MockFileSystem::new();
    let cfg = fast_config().build();

    let first = RecordingHandler::new();
    let adapter = ScriptedAdapter::poll(vec![ScriptStep::snapshot(&[("A", "h1")])]);
    let (watch_loop, _s1) = build(&cfg, adapter, Arc::new(first.clone()), &fs, true);
    watch_loop.run().await.expect("first run");
    assert_eq!(first.units(), vec!["A"]);

    let second = RecordingHandler::new();
    let adapter = ScriptedAdapter::poll(vec![ScriptStep::snapshot(&[("A", "h1")])]);
    let (watch_loop, _s2) = build(&cfg, adapter, Arc::new(second.clone()), &fs, true);
    let report = watch_loop.run().await.expect("second run");

    assert!(second.records().is_empty(), "unchanged unit must not be redelivered");
    assert_eq!(report.stats.changes_detected, 0);
}

#[tokio::test(start_paused = true)]
async fn force_stop_ends_without_waiting() {
    init_tracing();
    let fs = MockFileSystem::new();
    let handler = SlowHandler::new(Duration::from_secs(60));
    let adapter = ScriptedAdapter::poll(vec![ScriptStep::snapshot(&[("A", "h1")])]);

    let cfg = fast_config().drain_grace_timeout("30s").build();
    let (watch_loop, shutdown) = build(&cfg, adapter, Arc::new(handler.clone()), &fs, false);
    let started = Instant::now();
    let (report, ()) = tokio::join!(watch_loop.run(), async move {
        sleep(Duration::from_secs(1)).await;
        assert_eq!(shutdown.escalate(), changewatch::engine::StopKind::Graceful);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(shutdown.escalate(), changewatch::engine::StopKind::Force);
    });
    let report = report.expect("stopped");

    assert_eq!(report.state, ControllerState::Stopped);
    assert_eq!(report.stats.abandoned, 1);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn slow_observations_finish_while_dispatch_outcomes_stream_in() {
    init_tracing();
    let fs = MockFileSystem::new();
    let handler = SlowHandler::new(Duration::from_millis(20));
    let units: Vec<(String, String)> = (0..50).map(|i| (format!("u{i:02}"), format!("h{i}"))).collect();
    let adapter = ScriptedAdapter::poll(vec![ScriptStep::Snapshot(Observation::from_pairs(
        units.iter().map(|(u, f)| (u.as_str(), f.as_str())),
    ))])
    .next_delay(Duration::from_millis(300));
    let counters = adapter.counters();

    let cfg = fast_config()
        .poll_interval("100ms")
        .quiet_window("10ms")
        .concurrency(1)
        .build();
    let (watch_loop, shutdown) = build(&cfg, adapter, Arc::new(handler.clone()), &fs, false);
    let report = run_for(watch_loop, shutdown, Duration::from_secs(2))
        .await
        .expect("clean stop");

    assert_eq!(handler.finished().len(), 50);
    assert_eq!(report.stats.delivered, 50);
    // One observation every 300ms from t=0, none restarted by outcomes.
    assert!(counters.finished_nexts() >= 5, "finished {}", counters.finished_nexts());
    assert!(
        counters.nexts() - counters.finished_nexts() <= 1,
        "started {} finished {}",
        counters.nexts(),
        counters.finished_nexts()
    );
    assert!(report.stats.cycles >= 5);
}
