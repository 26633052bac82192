// src/handler/log.rs

use tracing::info;

use crate::handler::{HandlerFuture, ReactionHandler};
use crate::watch::ChangeRecord;

/// Logs every change and always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHandler;

impl ReactionHandler for LogHandler {
    fn name(&self) -> &str {
        "log"
    }

    fn handle(&self, record: &ChangeRecord) -> HandlerFuture {
        info!(
            unit = %record.unit,
            kind = %record.kind,
            previous = ?record.previous.as_ref().map(|f| f.as_str()),
            current = ?record.current.as_ref().map(|f| f.as_str()),
            "change"
        );
        Box::pin(async { Ok(()) })
    }
}
