// src/dispatch/queue.rs

use std::collections::{HashSet, VecDeque};

use crate::watch::{ChangeRecord, UnitId};

/// Pure admission queue for the dispatcher.
///
/// Records leave in submission order, except that a record whose unit is
/// already in flight waits without blocking records for other units.
#[derive(Debug)]
pub struct DispatchQueue {
    limit: usize,
    queued: VecDeque<ChangeRecord>,
    busy: HashSet<UnitId>,
}

impl DispatchQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            queued: VecDeque::new(),
            busy: HashSet::new(),
        }
    }

    pub fn push(&mut self, record: ChangeRecord) {
        self.queued.push_back(record);
    }

    /// Take the first queued record that may start now, marking its unit busy.
    pub fn next_ready(&mut self) -> Option<ChangeRecord> {
        if self.busy.len() >= self.limit {
            return None;
        }
        let idx = self
            .queued
            .iter()
            .position(|r| !self.busy.contains(&r.unit))?;
        let record = self.queued.remove(idx)?;
        self.busy.insert(record.unit.clone());
        Some(record)
    }

    /// Mark the in-flight record for `unit` as finished.
    pub fn complete(&mut self, unit: &UnitId) {
        self.busy.remove(unit);
    }

    /// Remove every record that has not started yet.
    pub fn drain_queued(&mut self) -> Vec<ChangeRecord> {
        self.queued.drain(..).collect()
    }

    pub fn in_flight(&self) -> usize {
        self.busy.len()
    }

    pub fn is_busy(&self, unit: &UnitId) -> bool {
        self.busy.contains(unit)
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.busy.is_empty()
    }
}
