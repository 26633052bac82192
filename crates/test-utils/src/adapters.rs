use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use changewatch::adapter::{AdapterFuture, Cadence, Observed, ResourceAdapter};
use changewatch::errors::AdapterError;
use changewatch::watch::{Observation, UnitEvent};

/// One scripted answer to `next()`.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Snapshot(Observation),
    Event(UnitEvent),
    Fail(String),
    /// Never resolves. Exercises `observe_timeout` for poll adapters.
    Hang,
}

impl ScriptStep {
    pub fn snapshot(pairs: &[(&str, &str)]) -> Self {
        ScriptStep::Snapshot(Observation::from_pairs(pairs.iter().copied()))
    }

    pub fn present(unit: &str, fp: &str) -> Self {
        ScriptStep::Event(UnitEvent::present(unit, fp))
    }

    pub fn gone(unit: &str) -> Self {
        ScriptStep::Event(UnitEvent::gone(unit))
    }

    pub fn fail(msg: &str) -> Self {
        ScriptStep::Fail(msg.to_string())
    }
}

/// Counters shared between a [`ScriptedAdapter`] and the test.
#[derive(Debug, Clone, Default)]
pub struct AdapterCounters {
    connects: Arc<AtomicU32>,
    nexts: Arc<AtomicU32>,
    finished_nexts: Arc<AtomicU32>,
}

impl AdapterCounters {
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Calls to `next` that were started.
    pub fn nexts(&self) -> u32 {
        self.nexts.load(Ordering::SeqCst)
    }

    /// Calls to `next` that ran to completion.
    pub fn finished_nexts(&self) -> u32 {
        self.finished_nexts.load(Ordering::SeqCst)
    }
}

/// Adapter that replays a fixed script.
///
/// Once the script runs out, a poll adapter keeps returning its last
/// snapshot (an empty one if it never had one) and a push adapter blocks
/// forever.
#[derive(Debug)]
pub struct ScriptedAdapter {
    cadence: Cadence,
    steps: VecDeque<ScriptStep>,
    failing_connects: u32,
    next_delay: Duration,
    last: Option<Observation>,
    counters: AdapterCounters,
}

impl ScriptedAdapter {
    pub fn poll(steps: Vec<ScriptStep>) -> Self {
        Self::with_cadence(Cadence::Poll, steps)
    }

    pub fn push(steps: Vec<ScriptStep>) -> Self {
        Self::with_cadence(Cadence::Push, steps)
    }

    fn with_cadence(cadence: Cadence, steps: Vec<ScriptStep>) -> Self {
        Self {
            cadence,
            steps: steps.into(),
            failing_connects: 0,
            next_delay: Duration::ZERO,
            last: None,
            counters: AdapterCounters::default(),
        }
    }

    /// Make the next `n` calls to `connect` fail.
    pub fn failing_connects(mut self, n: u32) -> Self {
        self.failing_connects = n;
        self
    }

    /// Make every call to `next` take `delay` before answering.
    pub fn next_delay(mut self, delay: Duration) -> Self {
        self.next_delay = delay;
        self
    }

    pub fn counters(&self) -> AdapterCounters {
        self.counters.clone()
    }
}

impl ResourceAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    fn cadence(&self) -> Cadence {
        self.cadence
    }

    fn connect(&mut self) -> AdapterFuture<'_, ()> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        let fail = self.failing_connects > 0;
        if fail {
            self.failing_connects -= 1;
        }
        Box::pin(async move {
            if fail {
                Err(AdapterError::transient("connection refused"))
            } else {
                Ok(())
            }
        })
    }

    fn next(&mut self) -> AdapterFuture<'_, Observed> {
        self.counters.nexts.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.pop_front();
        let delay = self.next_delay;
        let finished = Arc::clone(&self.counters.finished_nexts);
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result: Result<Observed, AdapterError> = match step {
                Some(ScriptStep::Snapshot(obs)) => {
                    self.last = Some(obs.clone());
                    Ok(Observed::Snapshot(obs))
                }
                Some(ScriptStep::Event(event)) => Ok(Observed::Event(event)),
                Some(ScriptStep::Fail(msg)) => Err(AdapterError::Transient(msg)),
                Some(ScriptStep::Hang) => std::future::pending().await,
                None => match self.cadence {
                    Cadence::Poll => Ok(Observed::Snapshot(
                        self.last
                            .clone()
                            .unwrap_or_else(|| Observation::from_pairs(Vec::<(&str, &str)>::new())),
                    )),
                    Cadence::Push => std::future::pending().await,
                },
            };
            finished.fetch_add(1, Ordering::SeqCst);
            result
        })
    }
}
