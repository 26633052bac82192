// src/engine/stats.rs

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for one watch loop run.
#[derive(Debug, Default)]
pub struct WatchStats {
    pub cycles: AtomicU64,
    pub observe_failures: AtomicU64,
    pub reconnects: AtomicU64,
    pub changes_detected: AtomicU64,
    pub changes_settled: AtomicU64,
    pub delivered: AtomicU64,
    pub terminal_failures: AtomicU64,
    pub abandoned: AtomicU64,
}

impl WatchStats {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> WatchStatsSnapshot {
        WatchStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            observe_failures: self.observe_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            changes_detected: self.changes_detected.load(Ordering::Relaxed),
            changes_settled: self.changes_settled.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            terminal_failures: self.terminal_failures.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStatsSnapshot {
    pub cycles: u64,
    pub observe_failures: u64,
    pub reconnects: u64,
    pub changes_detected: u64,
    pub changes_settled: u64,
    pub delivered: u64,
    pub terminal_failures: u64,
    pub abandoned: u64,
}
