// src/handler/mod.rs

//! Reaction handlers: what happens to a settled change.
//!
//! Handlers are expected to be idempotent. Delivery is at-least-once: a
//! timed-out attempt may still have had an effect before it was abandoned.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::HandlerSettings;
use crate::errors::{ChangewatchError, HandlerError, Result};
use crate::types::HandlerKind;
use crate::watch::ChangeRecord;

pub mod command;
pub mod log;

pub use command::CommandHandler;
pub use log::LogHandler;

/// Future returned by [`ReactionHandler::handle`].
///
/// It is `'static` so the dispatcher can run it on its own task and abort
/// it on timeout without tearing down the dispatcher.
pub type HandlerFuture = Pin<Box<dyn Future<Output = std::result::Result<(), HandlerError>> + Send>>;

pub trait ReactionHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Run one attempt for `record`.
    fn handle(&self, record: &ChangeRecord) -> HandlerFuture;
}

/// Build the handler selected by `[handler]`.
pub fn build_handler(settings: &HandlerSettings) -> Result<Arc<dyn ReactionHandler>> {
    match settings.kind {
        HandlerKind::Command => {
            let cmd = settings.cmd.clone().ok_or_else(|| {
                ChangewatchError::ConfigError("[handler].cmd is required for a command handler".into())
            })?;
            Ok(Arc::new(CommandHandler::new(cmd)))
        }
        HandlerKind::Log => Ok(Arc::new(LogHandler)),
    }
}
