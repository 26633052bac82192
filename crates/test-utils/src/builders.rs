#![allow(dead_code)]

use std::path::PathBuf;
use std::time::SystemTime;

use changewatch::config::{ConfigFile, RawConfigFile};
use changewatch::types::{BaselineStorageMode, DrainMode};
use changewatch::watch::{ChangeRecord, Fingerprint, UnitId};

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts from the same defaults as an empty config file; durations use the
/// config syntax (`"250ms"`, `"2s"`).
pub struct ConfigBuilder {
    raw: RawConfigFile,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawConfigFile::default(),
        }
    }

    pub fn poll_interval(mut self, d: &str) -> Self {
        self.raw.watch.poll_interval = Some(d.to_string());
        self
    }

    pub fn quiet_window(mut self, d: &str) -> Self {
        self.raw.watch.quiet_window = Some(d.to_string());
        self
    }

    pub fn max_wait(mut self, d: &str) -> Self {
        self.raw.watch.max_wait = Some(d.to_string());
        self
    }

    pub fn absence_confirm_count(mut self, n: u32) -> Self {
        self.raw.watch.absence_confirm_count = Some(n);
        self
    }

    pub fn retry_delays(mut self, base: &str, max: &str) -> Self {
        self.raw.dispatch.retry_base_delay = Some(base.to_string());
        self.raw.dispatch.retry_max_delay = Some(max.to_string());
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.raw.dispatch.max_attempts = Some(n);
        self
    }

    pub fn handler_timeout(mut self, d: &str) -> Self {
        self.raw.dispatch.handler_timeout = Some(d.to_string());
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.raw.dispatch.concurrency = Some(n);
        self
    }

    pub fn drain_mode(mut self, mode: DrainMode) -> Self {
        self.raw.shutdown.drain_mode = mode;
        self
    }

    pub fn drain_grace_timeout(mut self, d: &str) -> Self {
        self.raw.shutdown.drain_grace_timeout = Some(d.to_string());
        self
    }

    pub fn include(mut self, pattern: &str) -> Self {
        self.raw
            .adapter
            .include
            .get_or_insert_with(Vec::new)
            .push(pattern.to_string());
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.raw.adapter.exclude.push(pattern.to_string());
        self
    }

    pub fn observe_timeout(mut self, d: &str) -> Self {
        self.raw.adapter.observe_timeout = Some(d.to_string());
        self
    }

    pub fn reconnect(mut self, attempts: u32, base: &str, max: &str) -> Self {
        self.raw.adapter.reconnect_attempts = Some(attempts);
        self.raw.adapter.reconnect_base_delay = Some(base.to_string());
        self.raw.adapter.reconnect_max_delay = Some(max.to_string());
        self
    }

    pub fn handler_cmd(mut self, cmd: &str) -> Self {
        self.raw.handler.cmd = Some(cmd.to_string());
        self
    }

    pub fn baseline_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.raw.baseline.storage = BaselineStorageMode::File;
        self.raw.baseline.path = Some(path.into());
        self
    }

    pub fn failure_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.raw.failures.path = Some(path.into());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.raw
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.raw).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn record(unit: &str, previous: Option<&str>, current: Option<&str>) -> ChangeRecord {
    ChangeRecord::from_transition(
        UnitId::from(unit),
        previous.map(Fingerprint::from),
        current.map(Fingerprint::from),
        SystemTime::now(),
    )
    .expect("fingerprints describe a change")
}

pub fn added(unit: &str, fp: &str) -> ChangeRecord {
    record(unit, None, Some(fp))
}

pub fn modified(unit: &str, previous: &str, current: &str) -> ChangeRecord {
    record(unit, Some(previous), Some(current))
}

pub fn removed(unit: &str, previous: &str) -> ChangeRecord {
    record(unit, Some(previous), None)
}
