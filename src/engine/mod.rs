// src/engine/mod.rs

//! Watch loop engine.
//!
//! The pure controller state machine lives in [`core`]: it owns the
//! baseline, the detector and the debouncer, and turns [`LoopEvent`]s into
//! [`CoreCommand`]s. The async shell in [`runtime`] drives the adapter,
//! timers, signals and the dispatcher, and feeds results back into the core.

use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::dispatch::DispatchOutcome;
use crate::errors::AdapterError;
use crate::types::DrainMode;
use crate::watch::{ChangeRecord, Observation, UnitEvent};

pub mod core;
mod observer;
pub mod runtime;
pub mod stats;

pub use core::WatchCore;
pub use runtime::{WatchLoop, WatchReport};
pub use stats::{WatchStats, WatchStatsSnapshot};

/// Controller lifecycle.
///
/// `Idle -> Running -> Draining -> Stopped` is the normal path. A force stop
/// jumps to `Stopped`; an unrecoverable adapter jumps to `Failed`. Both
/// `Stopped` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running,
    Draining,
    Stopped,
    Failed,
}

impl ControllerState {
    pub fn can_transition_to(self, to: ControllerState) -> bool {
        use ControllerState::*;
        matches!(
            (self, to),
            (Idle, Running)
                | (Idle, Stopped)
                | (Idle, Failed)
                | (Running, Draining)
                | (Running, Stopped)
                | (Running, Failed)
                | (Draining, Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ControllerState::Stopped | ControllerState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    /// Drain per `drain_mode`, then stop.
    Graceful,
    /// Stop now; in-flight dispatches are abandoned.
    Force,
}

/// Options for the pure core.
#[derive(Debug, Clone, Copy)]
pub struct CoreOptions {
    pub quiet_window: Duration,
    pub max_wait: Option<Duration>,
    pub absence_confirm_count: u32,
    pub drain_mode: DrainMode,
    /// Stop after the first observation has been fully dispatched.
    pub once: bool,
}

/// Inputs to [`WatchCore::step`].
#[derive(Debug, Clone)]
pub enum LoopEvent {
    Started,
    Observed { observation: Observation, now: Instant },
    UnitChanged { event: UnitEvent, now: Instant },
    /// A debounce deadline may have passed.
    Tick { now: Instant },
    DispatchFinished(DispatchOutcome),
    StopRequested(StopKind),
    /// The drain grace timeout elapsed with work still in flight.
    GraceExpired,
    /// Reconnect attempts are exhausted.
    AdapterFailed(AdapterError),
}

/// Side effects the core asks the shell to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Hand settled records to the dispatcher, in order.
    Dispatch(Vec<ChangeRecord>),
    /// Write the baseline to its store.
    PersistBaseline,
    /// No more records will be submitted; let queued work finish.
    CloseDispatcher,
    /// Cancel all dispatch work now.
    AbortDispatcher,
}

/// Result of a single `step`.
#[derive(Debug, Default)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    pub keep_running: bool,
}

/// Sends stop requests to a running [`WatchLoop`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<Option<StopKind>>,
}

impl ShutdownHandle {
    pub fn channel() -> (Self, watch::Receiver<Option<StopKind>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }

    /// Request a graceful stop. Has no effect after a force stop.
    pub fn graceful(&self) {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(StopKind::Graceful);
                true
            } else {
                false
            }
        });
    }

    pub fn force(&self) {
        self.tx.send_replace(Some(StopKind::Force));
    }

    /// First call is graceful, any later call is a force stop.
    pub fn escalate(&self) -> StopKind {
        let mut kind = StopKind::Graceful;
        self.tx.send_modify(|current| {
            kind = if current.is_some() {
                StopKind::Force
            } else {
                StopKind::Graceful
            };
            *current = Some(kind);
        });
        kind
    }
}
