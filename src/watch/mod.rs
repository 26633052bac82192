// src/watch/mod.rs

//! Change detection.
//!
//! This module is responsible for:
//! - the unit / observation / change record data model,
//! - the baseline and its storage backends,
//! - classifying observations into change records,
//! - debouncing and coalescing repeated changes per unit,
//! - the glob filter and content hashing used by the filesystem adapters.
//!
//! It does **not** know where observations come from or what happens to a
//! settled change; see `adapter` and `dispatch`.

pub mod baseline;
pub mod change;
pub mod debounce;
pub mod detector;
pub mod hash;
pub mod patterns;

pub use baseline::{
    Baseline, BaselineEntry, BaselineStore, FileBaselineStore, KnownState, MemoryBaselineStore,
};
pub use change::{ChangeKind, ChangeRecord, Fingerprint, Observation, UnitEvent, UnitId};
pub use debounce::{merge, Debouncer, PendingChange, SubmitOutcome};
pub use detector::{ChangeDetector, Detection};
pub use hash::compute_file_fingerprint;
pub use patterns::{relative_str, UnitFilter};
