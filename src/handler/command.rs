// src/handler/command.rs

//! Shell command reaction handler.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::HandlerError;
use crate::handler::{HandlerFuture, ReactionHandler};
use crate::watch::ChangeRecord;

pub const ENV_UNIT: &str = "CHANGEWATCH_UNIT";
pub const ENV_KIND: &str = "CHANGEWATCH_KIND";
pub const ENV_PREVIOUS: &str = "CHANGEWATCH_PREVIOUS";
pub const ENV_CURRENT: &str = "CHANGEWATCH_CURRENT";
pub const ENV_DETECTED_AT: &str = "CHANGEWATCH_DETECTED_AT";

/// Runs `cmd` through the platform shell once per attempt.
///
/// The change is passed in `CHANGEWATCH_*` environment variables; missing
/// fingerprints are passed as empty strings. Exit status 0 is success. The
/// child is killed if the attempt future is dropped (timeout, shutdown).
#[derive(Debug, Clone)]
pub struct CommandHandler {
    cmd: String,
}

impl CommandHandler {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }
}

fn shell_command(cmd: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    }
}

impl ReactionHandler for CommandHandler {
    fn name(&self) -> &str {
        "command"
    }

    fn handle(&self, record: &ChangeRecord) -> HandlerFuture {
        let mut cmd = shell_command(&self.cmd);
        cmd.env(ENV_UNIT, record.unit.as_str())
            .env(ENV_KIND, record.kind.as_str())
            .env(
                ENV_PREVIOUS,
                record.previous.as_ref().map(|f| f.as_str()).unwrap_or(""),
            )
            .env(
                ENV_CURRENT,
                record.current.as_ref().map(|f| f.as_str()).unwrap_or(""),
            )
            .env(ENV_DETECTED_AT, record.detected_at_millis().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let unit = record.unit.clone();
        let shown = self.cmd.clone();

        Box::pin(async move {
            debug!(unit = %unit, cmd = %shown, "starting handler process");

            let output = cmd
                .output()
                .await
                .map_err(|e| HandlerError::Failed(format!("spawning '{shown}': {e}")))?;

            for line in String::from_utf8_lossy(&output.stdout).lines() {
                info!(unit = %unit, "stdout: {}", line);
            }
            for line in String::from_utf8_lossy(&output.stderr).lines() {
                debug!(unit = %unit, "stderr: {}", line);
            }

            if output.status.success() {
                Ok(())
            } else {
                let code = output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                Err(HandlerError::Failed(format!("'{shown}' exited with {code}")))
            }
        })
    }
}
