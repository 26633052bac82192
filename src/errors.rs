// src/errors.rs

//! Crate-wide error types.
//!
//! [`ChangewatchError`] is what the binary sees. Adapter and handler failures
//! have their own enums because they are handled in different places: handler
//! errors never leave the dispatcher, transient adapter errors never leave the
//! watch loop.

use std::time::Duration;

use thiserror::Error;

use crate::engine::ControllerState;

#[derive(Error, Debug)]
pub enum ChangewatchError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("invalid controller transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: ControllerState,
        to: ControllerState,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ChangewatchError {
    /// Process exit status for this error.
    ///
    /// Configuration problems exit with 2 so a supervisor can tell them apart
    /// from runtime failures and stop restarting.
    pub fn exit_code(&self) -> i32 {
        match self {
            ChangewatchError::ConfigError(_) | ChangewatchError::TomlError(_) => 2,
            _ => 1,
        }
    }
}

/// Errors reported by a resource adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// Observation or connection failed; the next cycle may succeed.
    #[error("transient adapter error: {0}")]
    Transient(String),

    /// Reconnect attempts are exhausted.
    #[error("adapter failed after {attempts} reconnect attempts: {last_error}")]
    Fatal { attempts: u32, last_error: String },
}

impl AdapterError {
    pub fn transient(err: impl std::fmt::Display) -> Self {
        AdapterError::Transient(err.to_string())
    }
}

/// Errors reported by a reaction handler for a single attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("handler timed out after {0:?}")]
    Timeout(Duration),

    #[error("handler failed: {0}")]
    Failed(String),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ChangewatchError>;
