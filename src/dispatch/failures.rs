// src/dispatch/failures.rs

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::watch::{ChangeKind, ChangeRecord, Fingerprint, UnitId};

/// One line of the terminal failure log.
#[derive(Debug, Serialize)]
struct FailureLine<'a> {
    unit: &'a UnitId,
    kind: ChangeKind,
    previous: Option<&'a Fingerprint>,
    current: Option<&'a Fingerprint>,
    detected_at_ms: u64,
    attempts: u32,
    last_error: &'a str,
}

/// Append-only JSON-lines log of changes whose dispatch was given up on.
#[derive(Debug, Clone)]
pub struct TerminalFailureLog {
    path: PathBuf,
}

impl TerminalFailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &ChangeRecord, attempts: u32, last_error: &str) -> Result<()> {
        let line = FailureLine {
            unit: &record.unit,
            kind: record.kind,
            previous: record.previous.as_ref(),
            current: record.current.as_ref(),
            detected_at_ms: record.detected_at_millis(),
            attempts,
            last_error,
        };
        let mut json = serde_json::to_string(&line).context("serializing failure record")?;
        json.push('\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating dir {:?}", parent))?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening failure log {:?}", self.path))?;
        file.write_all(json.as_bytes())
            .with_context(|| format!("appending to failure log {:?}", self.path))?;
        Ok(())
    }
}
