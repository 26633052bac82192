use serde::Deserialize;

/// What happens to pending (unsettled) changes when a graceful stop begins.
///
/// - `Flush`: settle everything immediately and dispatch it (default).
/// - `Discard`: drop pending changes; only work already handed to the
///   dispatcher is allowed to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DrainMode {
    #[default]
    Flush,
    Discard,
}

/// Where the baseline lives between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BaselineStorageMode {
    /// Store the baseline in a JSON-lines file (`.changewatch/baseline`).
    File,
    /// Keep it in memory only (lost on restart).
    #[default]
    Memory,
}

/// Which resource adapter to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// Poll a directory tree every `poll_interval`.
    #[default]
    Directory,
    /// Subscribe to filesystem notifications.
    Notify,
}

/// Which reaction handler to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    Command,
    Log,
}
