// tests/core_lifecycle.rs

mod common;
use crate::common::{baseline, observation};

use std::time::{Duration, Instant};

use changewatch::dispatch::{DispatchOutcome, DispatchStatus};
use changewatch::engine::{
    ControllerState, CoreCommand, CoreOptions, CoreStep, LoopEvent, StopKind, WatchCore,
    WatchStats,
};
use changewatch::errors::{AdapterError, ChangewatchError};
use changewatch::types::DrainMode;
use changewatch::watch::{ChangeKind, ChangeRecord, Fingerprint, UnitId};

const QUIET: Duration = Duration::from_millis(500);

fn options(once: bool, drain_mode: DrainMode) -> CoreOptions {
    CoreOptions {
        quiet_window: QUIET,
        max_wait: None,
        absence_confirm_count: 2,
        drain_mode,
        once,
    }
}

fn running_core(opts: CoreOptions, known: &[(&str, &str)]) -> WatchCore {
    let mut core = WatchCore::new(opts, baseline(known), WatchStats::new());
    let step = core.step(LoopEvent::Started);
    assert!(step.keep_running);
    assert_eq!(core.state(), ControllerState::Running);
    core
}

fn observe(core: &mut WatchCore, pairs: &[(&str, &str)], now: Instant) -> CoreStep {
    core.step(LoopEvent::Observed {
        observation: observation(pairs),
        now,
    })
}

fn dispatched(step: &CoreStep) -> Vec<ChangeRecord> {
    step.commands
        .iter()
        .filter_map(|c| match c {
            CoreCommand::Dispatch(records) => Some(records.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

fn finished(record: ChangeRecord, status: DispatchStatus) -> LoopEvent {
    LoopEvent::DispatchFinished(DispatchOutcome {
        record,
        attempts: 1,
        status,
    })
}

fn fp(core: &WatchCore, unit: &str) -> Option<String> {
    core.baseline()
        .get(&UnitId::from(unit))
        .map(|e| e.fingerprint.as_str().to_string())
}

#[test]
fn change_is_dispatched_after_quiet_window_and_committed_on_success() {
    let t0 = Instant::now();
    let mut core = running_core(options(false, DrainMode::Flush), &[("A", "h1")]);

    let step = observe(&mut core, &[("A", "h2"), ("B", "h1")], t0);
    assert!(dispatched(&step).is_empty());
    assert_eq!(core.pending_len(), 2);
    assert_eq!(core.next_deadline(), Some(t0 + QUIET));

    let step = core.step(LoopEvent::Tick { now: t0 + QUIET });
    let records = dispatched(&step);
    assert_eq!(records.len(), 2);
    assert_eq!(core.in_flight(), 2);

    // Baseline only moves when an outcome comes back.
    assert_eq!(fp(&core, "A").as_deref(), Some("h1"));
    assert_eq!(fp(&core, "B"), None);

    for record in records {
        let step = core.step(finished(record, DispatchStatus::Delivered));
        assert_eq!(step.commands, vec![CoreCommand::PersistBaseline]);
    }
    assert_eq!(fp(&core, "A").as_deref(), Some("h2"));
    assert_eq!(fp(&core, "B").as_deref(), Some("h1"));
    assert!(core.is_quiescent());
    assert_eq!(core.stats().snapshot().delivered, 2);
}

#[test]
fn in_flight_change_is_not_detected_again() {
    let t0 = Instant::now();
    let mut core = running_core(options(false, DrainMode::Flush), &[("A", "h1")]);

    observe(&mut core, &[("A", "h2")], t0);
    let records = dispatched(&core.step(LoopEvent::Tick { now: t0 + QUIET }));
    assert_eq!(records.len(), 1);

    // Next polls still see h2 while the handler runs.
    let step = observe(&mut core, &[("A", "h2")], t0 + Duration::from_secs(1));
    assert!(dispatched(&step).is_empty());
    assert_eq!(core.pending_len(), 0);

    // A newer change during dispatch is queued behind it as h2 -> h3.
    observe(&mut core, &[("A", "h3")], t0 + Duration::from_secs(2));
    let step = core.step(LoopEvent::Tick {
        now: t0 + Duration::from_secs(2) + QUIET,
    });
    let follow_up = dispatched(&step);
    assert_eq!(follow_up.len(), 1);
    assert_eq!(follow_up[0].previous, Some(Fingerprint::from("h2")));
    assert_eq!(follow_up[0].current, Some(Fingerprint::from("h3")));
}

#[test]
fn terminal_failure_advances_baseline_and_marks_unit_degraded() {
    let t0 = Instant::now();
    let mut core = running_core(options(false, DrainMode::Flush), &[("C", "h1")]);

    observe(&mut core, &[("C", "h2")], t0);
    let record = dispatched(&core.step(LoopEvent::Tick { now: t0 + QUIET })).remove(0);

    let step = core.step(LoopEvent::DispatchFinished(DispatchOutcome {
        record,
        attempts: 5,
        status: DispatchStatus::TerminalFailure {
            last_error: "boom".into(),
        },
    }));
    assert!(step.commands.contains(&CoreCommand::PersistBaseline));
    assert_eq!(fp(&core, "C").as_deref(), Some("h2"));
    assert_eq!(core.degraded_units(), vec![UnitId::from("C")]);

    // The same state is not reprocessed.
    let step = observe(&mut core, &[("C", "h2")], t0 + Duration::from_secs(5));
    assert!(dispatched(&step).is_empty());
    assert_eq!(core.pending_len(), 0);
}

#[test]
fn abandoned_dispatch_does_not_advance_baseline() {
    let t0 = Instant::now();
    let mut core = running_core(options(false, DrainMode::Flush), &[("A", "h1")]);

    observe(&mut core, &[("A", "h2")], t0);
    let record = dispatched(&core.step(LoopEvent::Tick { now: t0 + QUIET })).remove(0);
    let step = core.step(finished(record, DispatchStatus::Abandoned));

    assert!(step.commands.is_empty());
    assert_eq!(fp(&core, "A").as_deref(), Some("h1"));
    assert!(core.is_quiescent());
}

#[test]
fn reverted_change_is_cancelled_before_settling() {
    let t0 = Instant::now();
    let mut core = running_core(options(false, DrainMode::Flush), &[("A", "h1")]);

    observe(&mut core, &[("A", "h2")], t0);
    assert_eq!(core.pending_len(), 1);

    observe(&mut core, &[("A", "h1")], t0 + Duration::from_millis(100));
    assert_eq!(core.pending_len(), 0);
    assert_eq!(core.next_deadline(), None);
}

#[test]
fn short_lived_unit_never_reaches_the_handler() {
    let t0 = Instant::now();
    let mut core = running_core(options(false, DrainMode::Flush), &[]);

    observe(&mut core, &[("tmp", "h1")], t0);
    assert_eq!(core.pending_len(), 1);

    observe(&mut core, &[], t0 + Duration::from_millis(100));
    assert_eq!(core.pending_len(), 0);
}

#[test]
fn removal_is_confirmed_before_dispatch() {
    let t0 = Instant::now();
    let mut core = running_core(options(false, DrainMode::Flush), &[("A", "h1")]);

    observe(&mut core, &[], t0);
    assert_eq!(core.pending_len(), 0);

    observe(&mut core, &[], t0 + Duration::from_secs(1));
    let step = core.step(LoopEvent::Tick {
        now: t0 + Duration::from_secs(1) + QUIET,
    });
    let records = dispatched(&step);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, ChangeKind::Removed);

    core.step(finished(records[0].clone(), DispatchStatus::Delivered));
    assert!(core.baseline().is_empty());
}

#[test]
fn graceful_flush_dispatches_pending_then_stops() {
    let t0 = Instant::now();
    let mut core = running_core(options(false, DrainMode::Flush), &[]);
    observe(&mut core, &[("A", "h1")], t0);

    let step = core.step(LoopEvent::StopRequested(StopKind::Graceful));
    assert_eq!(core.state(), ControllerState::Draining);
    assert!(step.keep_running);
    assert_eq!(dispatched(&step).len(), 1);
    assert!(step.commands.contains(&CoreCommand::CloseDispatcher));
    assert!(!core.accepts_observations());

    // Observations during draining are ignored.
    observe(&mut core, &[("A", "h1"), ("B", "h1")], t0 + Duration::from_millis(10));
    assert_eq!(core.pending_len(), 0);

    let record = dispatched(&step).remove(0);
    let step = core.step(finished(record, DispatchStatus::Delivered));
    assert!(!step.keep_running);
    assert_eq!(core.state(), ControllerState::Stopped);
    assert_eq!(fp(&core, "A").as_deref(), Some("h1"));
}

#[test]
fn graceful_discard_drops_pending_and_stops_when_idle() {
    let t0 = Instant::now();
    let mut core = running_core(options(false, DrainMode::Discard), &[]);
    observe(&mut core, &[("A", "h1")], t0);

    let step = core.step(LoopEvent::StopRequested(StopKind::Graceful));
    assert!(dispatched(&step).is_empty());
    assert_eq!(step.commands, vec![CoreCommand::CloseDispatcher]);
    assert!(!step.keep_running);
    assert_eq!(core.state(), ControllerState::Stopped);
    assert!(core.baseline().is_empty());
}

#[test]
fn grace_expiry_abandons_in_flight_work() {
    let t0 = Instant::now();
    let mut core = running_core(options(false, DrainMode::Flush), &[]);
    observe(&mut core, &[("A", "h1")], t0);
    core.step(LoopEvent::Tick { now: t0 + QUIET });

    core.step(LoopEvent::StopRequested(StopKind::Graceful));
    assert_eq!(core.state(), ControllerState::Draining);

    let step = core.step(LoopEvent::GraceExpired);
    assert_eq!(step.commands, vec![CoreCommand::AbortDispatcher]);
    assert_eq!(core.state(), ControllerState::Stopped);
    assert!(!step.keep_running);
}

#[test]
fn force_stop_skips_draining() {
    let t0 = Instant::now();
    let mut core = running_core(options(false, DrainMode::Flush), &[]);
    observe(&mut core, &[("A", "h1")], t0);

    let step = core.step(LoopEvent::StopRequested(StopKind::Force));
    assert_eq!(
        step.commands,
        vec![CoreCommand::AbortDispatcher, CoreCommand::PersistBaseline]
    );
    assert_eq!(core.state(), ControllerState::Stopped);
    assert_eq!(core.pending_len(), 0);

    // Stopped is terminal.
    let again = core.step(LoopEvent::StopRequested(StopKind::Graceful));
    assert!(again.commands.is_empty());
}

#[test]
fn adapter_failure_moves_to_failed() {
    let mut core = running_core(options(false, DrainMode::Flush), &[("A", "h1")]);

    let step = core.step(LoopEvent::AdapterFailed(AdapterError::Fatal {
        attempts: 5,
        last_error: "unreachable".into(),
    }));

    assert_eq!(core.state(), ControllerState::Failed);
    assert!(!step.keep_running);
    assert!(step.commands.contains(&CoreCommand::AbortDispatcher));
}

#[test]
fn once_mode_dispatches_immediately_and_stops_when_done() {
    let t0 = Instant::now();
    let mut core = running_core(options(true, DrainMode::Flush), &[("A", "h1")]);

    let step = observe(&mut core, &[("A", "h2")], t0);
    let records = dispatched(&step);
    assert_eq!(records.len(), 1, "once mode skips the quiet window");
    assert!(step.keep_running);
    assert!(!core.accepts_observations());

    let step = core.step(finished(records[0].clone(), DispatchStatus::Delivered));
    assert!(!step.keep_running);
    assert!(step.commands.contains(&CoreCommand::CloseDispatcher));
    assert_eq!(core.state(), ControllerState::Stopped);
}

#[test]
fn once_mode_without_changes_stops_right_away() {
    let mut core = running_core(options(true, DrainMode::Flush), &[("A", "h1")]);

    let step = observe(&mut core, &[("A", "h1")], Instant::now());
    assert!(!step.keep_running);
    assert_eq!(step.commands, vec![CoreCommand::CloseDispatcher]);
    assert_eq!(core.units_observed(), 1);
}

#[test]
fn illegal_transition_is_rejected() {
    let mut core = running_core(options(false, DrainMode::Flush), &[]);
    core.step(LoopEvent::StopRequested(StopKind::Force));

    match core.transition(ControllerState::Running) {
        Err(ChangewatchError::InvalidTransition { from, to }) => {
            assert_eq!(from, ControllerState::Stopped);
            assert_eq!(to, ControllerState::Running);
        }
        other => panic!("expected InvalidTransition, got {other:?}"),
    }
}
