// src/dispatch/mod.rs

//! Dispatch layer.
//!
//! - [`queue`] is the pure admission policy: FIFO, at most one record in
//!   flight per unit, bounded global concurrency.
//! - [`retry`] runs one record through the handler with timeout and
//!   exponential backoff.
//! - [`dispatcher`] is the background task tying the two together and
//!   reporting a [`DispatchOutcome`] for every submitted record.
//! - [`failures`] appends terminal failures to a JSON-lines file.

pub mod dispatcher;
pub mod failures;
pub mod queue;
pub mod retry;

pub use dispatcher::{spawn_dispatcher, DispatcherHandle};
pub use failures::TerminalFailureLog;
pub use queue::DispatchQueue;
pub use retry::{backoff_delay, deliver, RetryPolicy};

use crate::watch::ChangeRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStatus {
    /// The handler succeeded.
    Delivered,
    /// Every attempt failed; the record is given up on.
    TerminalFailure { last_error: String },
    /// Shutdown cancelled the dispatch before it finished.
    Abandoned,
}

/// Final result for one submitted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub record: ChangeRecord,
    pub attempts: u32,
    pub status: DispatchStatus,
}

impl DispatchOutcome {
    /// Whether the baseline may advance past this record.
    ///
    /// Terminal failures advance it too, so a permanently broken handler does
    /// not reprocess the same change forever.
    pub fn advances_baseline(&self) -> bool {
        !matches!(self.status, DispatchStatus::Abandoned)
    }
}
