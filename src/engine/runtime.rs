// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::adapter::{Cadence, Observed, ResourceAdapter};
use crate::config::ConfigFile;
use crate::dispatch::{
    backoff_delay, spawn_dispatcher, DispatchOutcome, DispatchStatus, DispatcherHandle,
    RetryPolicy, TerminalFailureLog,
};
use crate::errors::{AdapterError, ChangewatchError, Result};
use crate::handler::ReactionHandler;
use crate::watch::{BaselineStore, UnitId};

use super::core::WatchCore;
use super::observer::AdapterObserver;
use super::{
    ControllerState, CoreCommand, CoreOptions, CoreStep, LoopEvent, StopKind, WatchStats,
    WatchStatsSnapshot,
};

/// Timing knobs the async shell needs (the core has its own).
#[derive(Debug, Clone, Copy)]
struct LoopSettings {
    poll_interval: Duration,
    reconnect_attempts: u32,
    reconnect_base_delay: Duration,
    reconnect_max_delay: Duration,
    drain_grace_timeout: Duration,
}

/// Summary returned when the loop stops.
#[derive(Debug, Clone)]
pub struct WatchReport {
    pub state: ControllerState,
    pub stats: WatchStatsSnapshot,
    pub units_observed: usize,
    pub degraded: Vec<UnitId>,
}

/// Drives a [`WatchCore`] against a resource adapter and a dispatcher.
///
/// This is the IO shell: it owns the cadence (poll timer or push wait),
/// reconnects with backoff, runs debounce timers, forwards stop requests and
/// executes the commands the core returns.
pub struct WatchLoop {
    core: WatchCore,
    observer: AdapterObserver,
    dispatcher: DispatcherHandle,
    outcome_rx: mpsc::UnboundedReceiver<DispatchOutcome>,
    store: Box<dyn BaselineStore>,
    shutdown_rx: watch::Receiver<Option<StopKind>>,
    settings: LoopSettings,
}

impl fmt::Debug for WatchLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchLoop")
            .field("core", &self.core)
            .field("adapter", &self.observer.name())
            .finish_non_exhaustive()
    }
}

impl WatchLoop {
    /// Wire up a loop: load the baseline, spawn the dispatcher and the
    /// adapter task, and build the core. Must be called inside a Tokio
    /// runtime.
    pub fn new<A: ResourceAdapter + 'static>(
        config: &ConfigFile,
        adapter: A,
        handler: Arc<dyn ReactionHandler>,
        store: Box<dyn BaselineStore>,
        shutdown_rx: watch::Receiver<Option<StopKind>>,
        once: bool,
    ) -> Result<Self> {
        let baseline = store.load()?;
        info!(units = baseline.len(), "baseline ready");

        // Push adapters only snapshot on (re)connect and a once-run only
        // observes once, so absence cannot be confirmed by a later snapshot.
        let absence_confirm_count = if once || adapter.cadence() == Cadence::Push {
            1
        } else {
            config.watch.absence_confirm_count
        };

        let options = CoreOptions {
            quiet_window: config.watch.quiet_window,
            max_wait: config.watch.max_wait,
            absence_confirm_count,
            drain_mode: config.shutdown.drain_mode,
            once,
        };
        let core = WatchCore::new(options, baseline, WatchStats::new());

        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let dispatcher = spawn_dispatcher(
            handler,
            RetryPolicy::from(&config.dispatch),
            config.dispatch.concurrency,
            config.failure_log.clone().map(TerminalFailureLog::new),
            outcome_tx,
        );

        let observer = AdapterObserver::spawn(adapter, config.adapter.observe_timeout);

        Ok(Self {
            core,
            observer,
            dispatcher,
            outcome_rx,
            store,
            shutdown_rx,
            settings: LoopSettings {
                poll_interval: config.watch.poll_interval,
                reconnect_attempts: config.adapter.reconnect_attempts,
                reconnect_base_delay: config.adapter.reconnect_base_delay,
                reconnect_max_delay: config.adapter.reconnect_max_delay,
                drain_grace_timeout: config.shutdown.drain_grace_timeout,
            },
        })
    }

    /// Shared counters; stays valid after `run` consumes the loop.
    pub fn stats(&self) -> Arc<WatchStats> {
        Arc::clone(self.core.stats())
    }

    /// Main event loop.
    ///
    /// Returns when the controller reaches `Stopped`, or with
    /// `AdapterError::Fatal` when reconnect attempts are exhausted.
    pub async fn run(mut self) -> Result<WatchReport> {
        info!(adapter = self.observer.name(), "changewatch runtime started");

        let step = self.core.step(LoopEvent::Started);
        self.apply(step);

        let cadence = self.observer.cadence();
        let mut connected = false;
        let mut consecutive_failures: u32 = 0;
        let mut next_observe_at = Instant::now();
        let mut grace_deadline: Option<Instant> = None;
        let mut shutdown_open = true;
        let mut fatal: Option<AdapterError> = None;

        loop {
            let settle_at = self.core.next_deadline().map(Instant::from_std);
            if self.core.accepts_observations() {
                self.observer.request(!connected, next_observe_at);
            }

            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed(), if shutdown_open => {
                    if changed.is_err() {
                        debug!("shutdown sender dropped");
                        shutdown_open = false;
                        continue;
                    }
                    let requested = *self.shutdown_rx.borrow_and_update();
                    let Some(kind) = requested else { continue };
                    info!(?kind, "stop requested");
                    let step = self.core.step(LoopEvent::StopRequested(kind));
                    if self.core.state() == ControllerState::Draining && grace_deadline.is_none() {
                        grace_deadline = Some(Instant::now() + self.settings.drain_grace_timeout);
                    }
                    if !self.apply(step) {
                        break;
                    }
                }

                Some(outcome) = self.outcome_rx.recv() => {
                    let step = self.core.step(LoopEvent::DispatchFinished(outcome));
                    if !self.apply(step) {
                        break;
                    }
                }

                _ = sleep_until(grace_deadline.unwrap_or_else(Instant::now)), if grace_deadline.is_some() => {
                    let step = self.core.step(LoopEvent::GraceExpired);
                    if !self.apply(step) {
                        break;
                    }
                }

                _ = sleep_until(settle_at.unwrap_or_else(Instant::now)), if settle_at.is_some() => {
                    let now = Instant::now().into_std();
                    let step = self.core.step(LoopEvent::Tick { now });
                    if !self.apply(step) {
                        break;
                    }
                }

                result = self.observer.recv(), if self.observer.in_flight() => {
                    if !self.core.accepts_observations() {
                        debug!("observation finished after observing stopped; ignored");
                        continue;
                    }
                    match result {
                        Ok(observed) => {
                            if consecutive_failures > 0 {
                                WatchStats::bump(&self.core.stats().reconnects);
                                info!(failed_attempts = consecutive_failures, "adapter reconnected");
                            }
                            consecutive_failures = 0;
                            connected = true;

                            let now = Instant::now();
                            next_observe_at = match cadence {
                                Cadence::Poll => (next_observe_at + self.settings.poll_interval).max(now),
                                Cadence::Push => now,
                            };

                            let now = now.into_std();
                            let event = match observed {
                                Observed::Snapshot(observation) => LoopEvent::Observed { observation, now },
                                Observed::Event(event) => LoopEvent::UnitChanged { event, now },
                            };
                            let step = self.core.step(event);
                            if !self.apply(step) {
                                break;
                            }
                        }
                        Err(err) => {
                            WatchStats::bump(&self.core.stats().observe_failures);
                            connected = false;
                            consecutive_failures = consecutive_failures.saturating_add(1);

                            let exhausted = matches!(err, AdapterError::Fatal { .. })
                                || consecutive_failures >= self.settings.reconnect_attempts;
                            if exhausted {
                                let err = match err {
                                    AdapterError::Fatal { .. } => err,
                                    AdapterError::Transient(last_error) => AdapterError::Fatal {
                                        attempts: consecutive_failures,
                                        last_error,
                                    },
                                };
                                fatal = Some(err.clone());
                                let step = self.core.step(LoopEvent::AdapterFailed(err));
                                self.apply(step);
                                break;
                            }

                            let delay = backoff_delay(
                                self.settings.reconnect_base_delay,
                                self.settings.reconnect_max_delay,
                                consecutive_failures,
                            );
                            warn!(
                                adapter = self.observer.name(),
                                attempt = consecutive_failures,
                                max_attempts = self.settings.reconnect_attempts,
                                ?delay,
                                error = %err,
                                "adapter error; reconnecting"
                            );
                            next_observe_at = Instant::now() + delay;
                        }
                    }
                }

                else => {
                    warn!("no event sources left; stopping");
                    break;
                }
            }
        }

        self.wind_down().await;

        let report = WatchReport {
            state: self.core.state(),
            stats: self.core.stats().snapshot(),
            units_observed: self.core.units_observed(),
            degraded: self.core.degraded_units(),
        };
        info!(state = ?report.state, stats = ?report.stats, "changewatch runtime exiting");

        match fatal {
            Some(err) => Err(ChangewatchError::Adapter(err)),
            None => Ok(report),
        }
    }

    /// Let the dispatcher finish (or abort, per earlier commands), fold the
    /// last outcomes into the baseline and persist it one final time.
    async fn wind_down(&mut self) {
        self.observer.stop();
        self.dispatcher.close();
        self.dispatcher.join().await;

        while let Ok(outcome) = self.outcome_rx.try_recv() {
            if outcome.status == DispatchStatus::Abandoned {
                debug!(unit = %outcome.record.unit, "dispatch abandoned at shutdown");
            }
            let step = self.core.step(LoopEvent::DispatchFinished(outcome));
            self.apply(step);
        }

        self.persist_baseline();
    }

    /// Execute the commands of one core step; returns `keep_running`.
    fn apply(&mut self, step: CoreStep) -> bool {
        for command in step.commands {
            self.execute_command(command);
        }
        step.keep_running
    }

    fn execute_command(&mut self, command: CoreCommand) {
        match command {
            CoreCommand::Dispatch(records) => {
                debug!(count = records.len(), "submitting settled changes");
                let mut rejected = Vec::new();
                for record in records {
                    if let Err(record) = self.dispatcher.submit(record) {
                        error!(unit = %record.unit, "dispatcher closed; change abandoned");
                        rejected.push(record);
                    }
                }
                for record in rejected {
                    let step = self.core.step(LoopEvent::DispatchFinished(DispatchOutcome {
                        record,
                        attempts: 0,
                        status: DispatchStatus::Abandoned,
                    }));
                    self.apply(step);
                }
            }
            CoreCommand::PersistBaseline => self.persist_baseline(),
            CoreCommand::CloseDispatcher => self.dispatcher.close(),
            CoreCommand::AbortDispatcher => self.dispatcher.abort(),
        }
    }

    fn persist_baseline(&mut self) {
        if let Err(e) = self.store.save(self.core.baseline()) {
            warn!(error = %e, "could not persist baseline");
        }
    }
}
