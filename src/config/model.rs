// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::{AdapterKind, BaselineStorageMode, DrainMode, HandlerKind};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_millis(500);
pub const DEFAULT_ABSENCE_CONFIRM_COUNT: u32 = 2;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_DRAIN_GRACE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_OBSERVE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_BASELINE_PATH: &str = ".changewatch/baseline";

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [watch]
/// poll_interval = "2s"
/// quiet_window = "500ms"
/// max_wait = "10s"
/// absence_confirm_count = 2
///
/// [dispatch]
/// retry_base_delay = "1s"
/// retry_max_delay = "30s"
/// max_attempts = 5
/// handler_timeout = "30s"
/// concurrency = 4
///
/// [shutdown]
/// drain_mode = "flush"
/// drain_grace_timeout = "10s"
///
/// [adapter]
/// kind = "directory"
/// root = "data"
/// include = ["**/*.json"]
///
/// [handler]
/// cmd = "./notify.sh"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub watch: RawWatchSection,
    #[serde(default)]
    pub dispatch: RawDispatchSection,
    #[serde(default)]
    pub shutdown: RawShutdownSection,
    #[serde(default)]
    pub adapter: RawAdapterSection,
    #[serde(default)]
    pub handler: RawHandlerSection,
    #[serde(default)]
    pub baseline: RawBaselineSection,
    #[serde(default)]
    pub failures: RawFailuresSection,
}

/// `[watch]` section: cadence, debounce and absence tolerance.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawWatchSection {
    #[serde(default)]
    pub poll_interval: Option<String>,
    #[serde(default)]
    pub quiet_window: Option<String>,
    /// Forces settlement of a churning unit this long after its first change.
    #[serde(default)]
    pub max_wait: Option<String>,
    /// Consecutive missing snapshots before a unit counts as removed.
    #[serde(default)]
    pub absence_confirm_count: Option<u32>,
}

/// `[dispatch]` section: retry policy and concurrency.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDispatchSection {
    #[serde(default)]
    pub retry_base_delay: Option<String>,
    #[serde(default)]
    pub retry_max_delay: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub handler_timeout: Option<String>,
    #[serde(default)]
    pub concurrency: Option<usize>,
}

/// `[shutdown]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawShutdownSection {
    #[serde(default)]
    pub drain_mode: DrainMode,
    #[serde(default)]
    pub drain_grace_timeout: Option<String>,
}

/// `[adapter]` section: which resource is watched and how hard to retry it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAdapterSection {
    #[serde(default)]
    pub kind: AdapterKind,
    /// Root directory, relative to the config file. Defaults to the config
    /// file's directory.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Globs selecting units. `None` means everything (`["**"]`).
    #[serde(default)]
    pub include: Option<Vec<String>>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub observe_timeout: Option<String>,
    #[serde(default)]
    pub reconnect_attempts: Option<u32>,
    #[serde(default)]
    pub reconnect_base_delay: Option<String>,
    #[serde(default)]
    pub reconnect_max_delay: Option<String>,
}

/// `[handler]` section.
///
/// `kind` may be omitted: a present `cmd` implies `"command"`, otherwise
/// changes are only logged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawHandlerSection {
    #[serde(default)]
    pub kind: Option<HandlerKind>,
    #[serde(default)]
    pub cmd: Option<String>,
}

/// `[baseline]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBaselineSection {
    #[serde(default)]
    pub storage: BaselineStorageMode,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// `[failures]` section: optional JSON-lines terminal failure log.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFailuresSection {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Validated configuration with every default resolved.
///
/// Built with `ConfigFile::try_from(raw)`; see `config::validate`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub watch: WatchSettings,
    pub dispatch: DispatchSettings,
    pub shutdown: ShutdownSettings,
    pub adapter: AdapterSettings,
    pub handler: HandlerSettings,
    pub baseline: BaselineSettings,
    /// Terminal failure log path, if any.
    pub failure_log: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSettings {
    pub poll_interval: Duration,
    pub quiet_window: Duration,
    pub max_wait: Option<Duration>,
    pub absence_confirm_count: u32,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            quiet_window: DEFAULT_QUIET_WINDOW,
            max_wait: None,
            absence_confirm_count: DEFAULT_ABSENCE_CONFIRM_COUNT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub max_attempts: u32,
    pub handler_timeout: Duration,
    pub concurrency: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownSettings {
    pub drain_mode: DrainMode,
    pub drain_grace_timeout: Duration,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            drain_mode: DrainMode::Flush,
            drain_grace_timeout: DEFAULT_DRAIN_GRACE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterSettings {
    pub kind: AdapterKind,
    pub root: Option<PathBuf>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub observe_timeout: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            kind: AdapterKind::Directory,
            root: None,
            include: vec!["**".to_string()],
            exclude: Vec::new(),
            observe_timeout: DEFAULT_OBSERVE_TIMEOUT,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            reconnect_max_delay: DEFAULT_RECONNECT_MAX_DELAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSettings {
    pub kind: HandlerKind,
    pub cmd: Option<String>,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            kind: HandlerKind::Log,
            cmd: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineSettings {
    pub storage: BaselineStorageMode,
    pub path: PathBuf,
}

impl Default for BaselineSettings {
    fn default() -> Self {
        Self {
            storage: BaselineStorageMode::Memory,
            path: PathBuf::from(DEFAULT_BASELINE_PATH),
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            watch: WatchSettings::default(),
            dispatch: DispatchSettings::default(),
            shutdown: ShutdownSettings::default(),
            adapter: AdapterSettings::default(),
            handler: HandlerSettings::default(),
            baseline: BaselineSettings::default(),
            failure_log: None,
        }
    }
}
