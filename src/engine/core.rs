// src/engine/core.rs

//! Pure controller state machine.
//!
//! [`WatchCore`] consumes [`LoopEvent`]s and returns [`CoreStep`]s. It owns
//! the baseline, the change detector and the debouncer, and is the only
//! writer of any of them. It has no channels, no Tokio types and performs no
//! IO, so whole watch scenarios can be replayed deterministically in tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::dispatch::{DispatchOutcome, DispatchStatus};
use crate::engine::{
    ControllerState, CoreCommand, CoreOptions, CoreStep, LoopEvent, StopKind, WatchStats,
};
use crate::errors::{AdapterError, ChangewatchError};
use crate::types::DrainMode;
use crate::watch::{
    Baseline, ChangeDetector, ChangeRecord, Debouncer, Fingerprint, KnownState, Observation,
    SubmitOutcome, UnitEvent, UnitId,
};

/// Target state of a unit whose change has been handed to the dispatcher
/// but not yet committed to the baseline.
#[derive(Debug, Clone)]
struct Expected {
    target: Option<Fingerprint>,
    in_flight: u32,
}

/// Baseline overlaid with in-flight targets.
///
/// Detecting against this instead of the bare baseline keeps a change that
/// is already being dispatched from being detected again on every poll.
struct KnownView<'a> {
    baseline: &'a Baseline,
    expected: &'a HashMap<UnitId, Expected>,
}

impl KnownState for KnownView<'_> {
    fn fingerprint(&self, unit: &UnitId) -> Option<&Fingerprint> {
        match self.expected.get(unit) {
            Some(e) => e.target.as_ref(),
            None => self.baseline.fingerprint(unit),
        }
    }

    fn units(&self) -> Vec<&UnitId> {
        let mut units: Vec<&UnitId> = self
            .baseline
            .units()
            .into_iter()
            .filter(|u| !self.expected.contains_key(*u))
            .collect();
        units.extend(
            self.expected
                .iter()
                .filter(|(_, e)| e.target.is_some())
                .map(|(u, _)| u),
        );
        units
    }
}

#[derive(Debug)]
pub struct WatchCore {
    options: CoreOptions,
    state: ControllerState,
    baseline: Baseline,
    detector: ChangeDetector,
    debouncer: Debouncer,
    expected: HashMap<UnitId, Expected>,
    degraded: HashSet<UnitId>,
    observed_once: bool,
    units_observed: usize,
    stats: Arc<WatchStats>,
}

impl WatchCore {
    pub fn new(options: CoreOptions, baseline: Baseline, stats: Arc<WatchStats>) -> Self {
        Self {
            detector: ChangeDetector::new(options.absence_confirm_count),
            debouncer: Debouncer::new(options.quiet_window, options.max_wait),
            options,
            state: ControllerState::Idle,
            baseline,
            expected: HashMap::new(),
            degraded: HashSet::new(),
            observed_once: false,
            units_observed: 0,
            stats,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    pub fn stats(&self) -> &Arc<WatchStats> {
        &self.stats
    }

    /// Units whose last dispatch ended in a terminal failure.
    pub fn degraded_units(&self) -> Vec<UnitId> {
        let mut units: Vec<_> = self.degraded.iter().cloned().collect();
        units.sort();
        units
    }

    pub fn pending_len(&self) -> usize {
        self.debouncer.len()
    }

    /// Records handed to the dispatcher without an outcome yet.
    pub fn in_flight(&self) -> u32 {
        self.expected.values().map(|e| e.in_flight).sum()
    }

    /// Size of the most recent snapshot.
    pub fn units_observed(&self) -> usize {
        self.units_observed
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debouncer.next_deadline()
    }

    /// No pending changes and nothing in flight.
    pub fn is_quiescent(&self) -> bool {
        self.debouncer.is_empty() && self.expected.is_empty()
    }

    /// Whether the shell should keep pulling observations.
    pub fn accepts_observations(&self) -> bool {
        self.state == ControllerState::Running && !(self.options.once && self.observed_once)
    }

    /// Handle a single loop event, updating state and returning the commands
    /// for the async shell.
    pub fn step(&mut self, event: LoopEvent) -> CoreStep {
        let commands = match event {
            LoopEvent::Started => {
                self.transition_logged(ControllerState::Running);
                Vec::new()
            }
            LoopEvent::Observed { observation, now } => self.on_observation(observation, now),
            LoopEvent::UnitChanged { event, now } => self.on_unit_event(event, now),
            LoopEvent::Tick { now } => {
                if self.state == ControllerState::Running {
                    self.settle(now)
                } else {
                    Vec::new()
                }
            }
            LoopEvent::DispatchFinished(outcome) => self.on_dispatch_finished(outcome),
            LoopEvent::StopRequested(kind) => self.on_stop(kind),
            LoopEvent::GraceExpired => self.on_grace_expired(),
            LoopEvent::AdapterFailed(err) => self.on_adapter_failed(err),
        };

        CoreStep {
            commands,
            keep_running: !self.state.is_terminal(),
        }
    }

    /// Move to `to` if the lifecycle allows it.
    pub fn transition(&mut self, to: ControllerState) -> Result<(), ChangewatchError> {
        if !self.state.can_transition_to(to) {
            return Err(ChangewatchError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        info!(from = ?self.state, to = ?to, "controller state change");
        self.state = to;
        Ok(())
    }

    fn transition_logged(&mut self, to: ControllerState) {
        if let Err(e) = self.transition(to) {
            warn!(error = %e, "ignoring transition");
        }
    }

    fn on_observation(&mut self, observation: Observation, now: Instant) -> Vec<CoreCommand> {
        if !self.accepts_observations() {
            debug!(state = ?self.state, "observation ignored");
            return Vec::new();
        }
        WatchStats::bump(&self.stats.cycles);
        debug!(units = observation.len(), "cycle start");

        let known = KnownView {
            baseline: &self.baseline,
            expected: &self.expected,
        };
        let detection = self.detector.detect(&known, &observation);

        // A pending unit that disappeared while still unknown to the
        // baseline never existed as far as the handler is concerned.
        let vanished: Vec<UnitId> = self
            .debouncer
            .pending_units()
            .into_iter()
            .filter(|u| !observation.contains(u) && known.fingerprint(u).is_none())
            .collect();

        for unit in detection.unchanged.iter().chain(vanished.iter()) {
            if self.debouncer.cancel(unit).is_some() {
                info!(unit = %unit, "pending change reverted before settling");
            }
        }
        for unit in &detection.unchanged {
            self.baseline.touch(unit, observation.observed_at);
        }

        for record in detection.changes {
            self.submit(record, now);
        }

        self.observed_once = true;
        self.units_observed = observation.len();

        let commands = self.settle(now);
        debug!(
            pending = self.debouncer.len(),
            in_flight = self.in_flight(),
            "cycle end"
        );
        commands
    }

    fn on_unit_event(&mut self, event: UnitEvent, now: Instant) -> Vec<CoreCommand> {
        if !self.accepts_observations() {
            debug!(state = ?self.state, unit = %event.unit, "event ignored");
            return Vec::new();
        }
        WatchStats::bump(&self.stats.cycles);

        let known = KnownView {
            baseline: &self.baseline,
            expected: &self.expected,
        };
        match self.detector.detect_event(&known, &event) {
            Some(record) => self.submit(record, now),
            None => {
                if self.debouncer.cancel(&event.unit).is_some() {
                    info!(unit = %event.unit, "pending change reverted before settling");
                }
                if event.fingerprint.is_some() {
                    self.baseline.touch(&event.unit, event.observed_at);
                }
            }
        }

        self.settle(now)
    }

    fn submit(&mut self, record: ChangeRecord, now: Instant) {
        let unit = record.unit.clone();
        let kind = record.kind;
        match self.debouncer.submit(record, now) {
            SubmitOutcome::Created => {
                WatchStats::bump(&self.stats.changes_detected);
                info!(unit = %unit, kind = %kind, "change detected");
            }
            SubmitOutcome::Updated { revision } => {
                WatchStats::bump(&self.stats.changes_detected);
                debug!(unit = %unit, kind = %kind, revision, "pending change updated");
            }
            SubmitOutcome::Unchanged => {}
            SubmitOutcome::Cancelled => {
                info!(unit = %unit, "changes cancelled out before settling");
            }
        }
    }

    /// Promote due pending changes (all of them in once mode) to dispatch.
    fn settle(&mut self, now: Instant) -> Vec<CoreCommand> {
        let records = if self.options.once {
            self.debouncer.flush()
        } else {
            self.debouncer.take_settled(now)
        };
        let mut commands = self.hand_off(records);
        self.maybe_finish(&mut commands);
        commands
    }

    fn hand_off(&mut self, records: Vec<ChangeRecord>) -> Vec<CoreCommand> {
        if records.is_empty() {
            return Vec::new();
        }
        for record in &records {
            let entry = self.expected.entry(record.unit.clone()).or_insert(Expected {
                target: None,
                in_flight: 0,
            });
            entry.target = record.current.clone();
            entry.in_flight += 1;
            WatchStats::bump(&self.stats.changes_settled);
            info!(unit = %record.unit, kind = %record.kind, "change settled");
        }
        vec![CoreCommand::Dispatch(records)]
    }

    fn on_dispatch_finished(&mut self, outcome: DispatchOutcome) -> Vec<CoreCommand> {
        let unit = outcome.record.unit.clone();
        match &outcome.status {
            DispatchStatus::Delivered => {
                WatchStats::bump(&self.stats.delivered);
                self.degraded.remove(&unit);
            }
            DispatchStatus::TerminalFailure { .. } => {
                WatchStats::bump(&self.stats.terminal_failures);
                self.degraded.insert(unit.clone());
            }
            DispatchStatus::Abandoned => {
                WatchStats::bump(&self.stats.abandoned);
                debug!(unit = %unit, "dispatch abandoned; baseline not advanced");
            }
        }

        let mut commands = Vec::new();
        if outcome.advances_baseline() {
            self.baseline.apply(&outcome.record);
            commands.push(CoreCommand::PersistBaseline);
        }

        if let Some(e) = self.expected.get_mut(&unit) {
            e.in_flight = e.in_flight.saturating_sub(1);
            if e.in_flight == 0 {
                self.expected.remove(&unit);
            }
        }

        self.maybe_finish(&mut commands);
        commands
    }

    fn on_stop(&mut self, kind: StopKind) -> Vec<CoreCommand> {
        if self.state.is_terminal() {
            return Vec::new();
        }

        match kind {
            StopKind::Force => {
                let dropped = self.debouncer.discard();
                warn!(
                    pending_dropped = dropped,
                    in_flight = self.in_flight(),
                    "force stop requested"
                );
                self.transition_logged(ControllerState::Stopped);
                vec![CoreCommand::AbortDispatcher, CoreCommand::PersistBaseline]
            }
            StopKind::Graceful => match self.state {
                ControllerState::Idle => {
                    self.transition_logged(ControllerState::Stopped);
                    Vec::new()
                }
                ControllerState::Running => {
                    self.transition_logged(ControllerState::Draining);
                    let mut commands = match self.options.drain_mode {
                        DrainMode::Flush => {
                            let records = self.debouncer.flush();
                            info!(flushed = records.len(), "draining: flushing pending changes");
                            self.hand_off(records)
                        }
                        DrainMode::Discard => {
                            let dropped = self.debouncer.discard();
                            info!(discarded = dropped, "draining: discarding pending changes");
                            Vec::new()
                        }
                    };
                    commands.push(CoreCommand::CloseDispatcher);
                    self.maybe_finish(&mut commands);
                    commands
                }
                _ => Vec::new(),
            },
        }
    }

    fn on_grace_expired(&mut self) -> Vec<CoreCommand> {
        if self.state != ControllerState::Draining {
            return Vec::new();
        }
        warn!(
            in_flight = self.in_flight(),
            "drain grace timeout elapsed; abandoning in-flight dispatches"
        );
        self.transition_logged(ControllerState::Stopped);
        vec![CoreCommand::AbortDispatcher]
    }

    fn on_adapter_failed(&mut self, err: AdapterError) -> Vec<CoreCommand> {
        error!(error = %err, "fatal adapter failure; shutting down");
        self.debouncer.discard();
        self.transition_logged(ControllerState::Failed);
        vec![CoreCommand::AbortDispatcher, CoreCommand::PersistBaseline]
    }

    /// Stop once draining (or a once-run) has nothing left to do.
    fn maybe_finish(&mut self, commands: &mut Vec<CoreCommand>) {
        if !self.is_quiescent() {
            return;
        }
        match self.state {
            ControllerState::Draining => {
                info!("drain complete");
                self.transition_logged(ControllerState::Stopped);
            }
            ControllerState::Running if self.options.once && self.observed_once => {
                info!("single pass complete");
                self.transition_logged(ControllerState::Draining);
                if !commands.contains(&CoreCommand::CloseDispatcher) {
                    commands.push(CoreCommand::CloseDispatcher);
                }
                self.transition_logged(ControllerState::Stopped);
            }
            _ => {}
        }
    }
}
