use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use changewatch::errors::HandlerError;
use changewatch::handler::{HandlerFuture, ReactionHandler};
use changewatch::watch::{ChangeRecord, UnitId};
use tokio::time::Instant;

/// Records every record it is asked to handle and always succeeds.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandler {
    handled: Arc<Mutex<Vec<ChangeRecord>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ChangeRecord> {
        self.handled.lock().unwrap().clone()
    }

    pub fn units(&self) -> Vec<String> {
        self.records()
            .iter()
            .map(|r| r.unit.as_str().to_string())
            .collect()
    }
}

impl ReactionHandler for RecordingHandler {
    fn name(&self) -> &str {
        "recording"
    }

    fn handle(&self, record: &ChangeRecord) -> HandlerFuture {
        let handled = Arc::clone(&self.handled);
        let record = record.clone();
        Box::pin(async move {
            handled.lock().unwrap().push(record);
            Ok(())
        })
    }
}

/// Fails the first `failures` attempts per unit, then succeeds.
#[derive(Debug, Clone)]
pub struct FlakyHandler {
    failures: u32,
    attempts: Arc<Mutex<HashMap<UnitId, Vec<Instant>>>>,
}

impl FlakyHandler {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            attempts: Arc::default(),
        }
    }

    /// A handler that never succeeds.
    pub fn always_failing() -> Self {
        Self::new(u32::MAX)
    }

    pub fn attempts(&self, unit: &str) -> u32 {
        self.attempt_times(unit).len() as u32
    }

    pub fn attempt_times(&self, unit: &str) -> Vec<Instant> {
        self.attempts
            .lock()
            .unwrap()
            .get(&UnitId::from(unit))
            .cloned()
            .unwrap_or_default()
    }
}

impl ReactionHandler for FlakyHandler {
    fn name(&self) -> &str {
        "flaky"
    }

    fn handle(&self, record: &ChangeRecord) -> HandlerFuture {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let times = attempts.entry(record.unit.clone()).or_default();
            times.push(Instant::now());
            times.len() as u32
        };
        let failures = self.failures;
        Box::pin(async move {
            if attempt <= failures {
                Err(HandlerError::Failed(format!("attempt {attempt} refused")))
            } else {
                Ok(())
            }
        })
    }
}

/// Sleeps for a fixed delay before succeeding. Tracks how many calls started
/// and how many ran to completion.
#[derive(Debug, Clone)]
pub struct SlowHandler {
    delay: Duration,
    started: Arc<Mutex<Vec<(UnitId, Instant)>>>,
    finished: Arc<Mutex<Vec<(UnitId, Instant)>>>,
}

impl SlowHandler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: Arc::default(),
            finished: Arc::default(),
        }
    }

    pub fn started(&self) -> Vec<(UnitId, Instant)> {
        self.started.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<(UnitId, Instant)> {
        self.finished.lock().unwrap().clone()
    }
}

impl ReactionHandler for SlowHandler {
    fn name(&self) -> &str {
        "slow"
    }

    fn handle(&self, record: &ChangeRecord) -> HandlerFuture {
        let unit = record.unit.clone();
        self.started.lock().unwrap().push((unit.clone(), Instant::now()));
        let finished = Arc::clone(&self.finished);
        let delay = self.delay;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            finished.lock().unwrap().push((unit, Instant::now()));
            Ok(())
        })
    }
}
