#![allow(dead_code, unused_imports)]

pub use changewatch_test_utils::adapters::{AdapterCounters, ScriptStep, ScriptedAdapter};
pub use changewatch_test_utils::builders;
pub use changewatch_test_utils::handlers::{FlakyHandler, RecordingHandler, SlowHandler};
pub use changewatch_test_utils::{init_tracing, with_timeout};

use std::time::SystemTime;

use changewatch::watch::{Baseline, Observation};

pub fn baseline(pairs: &[(&str, &str)]) -> Baseline {
    Baseline::from_pairs(pairs.iter().copied())
}

pub fn observation(pairs: &[(&str, &str)]) -> Observation {
    let mut obs = Observation::new(SystemTime::now());
    for (unit, fp) in pairs {
        obs.insert(*unit, *fp);
    }
    obs
}
