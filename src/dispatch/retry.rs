// src/dispatch/retry.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DispatchSettings;
use crate::dispatch::{DispatchOutcome, DispatchStatus};
use crate::errors::HandlerError;
use crate::handler::ReactionHandler;
use crate::watch::ChangeRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub handler_timeout: Duration,
}

impl From<&DispatchSettings> for RetryPolicy {
    fn from(s: &DispatchSettings) -> Self {
        Self {
            base_delay: s.retry_base_delay,
            max_delay: s.retry_max_delay,
            max_attempts: s.max_attempts,
            handler_timeout: s.handler_timeout,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        backoff_delay(self.base_delay, self.max_delay, attempt)
    }
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped at `max`.
///
/// Never below `base` (unless `max < base`) and never above `max`.
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exp).unwrap_or(max).min(max)
}

fn abandoned(record: ChangeRecord, attempts: u32) -> DispatchOutcome {
    DispatchOutcome {
        record,
        attempts,
        status: DispatchStatus::Abandoned,
    }
}

/// Deliver one record, retrying per `policy` until success, exhaustion or
/// cancellation.
///
/// Each attempt runs on its own task so a panicking handler only fails that
/// attempt. On timeout or cancellation the attempt task is aborted, which
/// drops the handler future.
pub async fn deliver(
    record: ChangeRecord,
    handler: Arc<dyn ReactionHandler>,
    policy: RetryPolicy,
    cancel: CancellationToken,
) -> DispatchOutcome {
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        debug!(
            unit = %record.unit,
            kind = %record.kind,
            attempt,
            handler = handler.name(),
            "dispatch attempt"
        );

        let task = tokio::spawn(handler.handle(&record));
        let abort = task.abort_handle();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                abort.abort();
                info!(unit = %record.unit, attempt, "dispatch cancelled by shutdown");
                return abandoned(record, attempt);
            }
            res = timeout(policy.handler_timeout, task) => res,
        };

        let error = match result {
            Ok(Ok(Ok(()))) => {
                info!(unit = %record.unit, kind = %record.kind, attempt, "dispatch succeeded");
                return DispatchOutcome {
                    record,
                    attempts: attempt,
                    status: DispatchStatus::Delivered,
                };
            }
            Ok(Ok(Err(e))) => e,
            Ok(Err(join_err)) => HandlerError::Failed(format!("handler task failed: {join_err}")),
            Err(_elapsed) => {
                abort.abort();
                HandlerError::Timeout(policy.handler_timeout)
            }
        };

        warn!(
            unit = %record.unit,
            attempt,
            max_attempts = policy.max_attempts,
            error = %error,
            "dispatch attempt failed"
        );

        if attempt >= policy.max_attempts {
            return DispatchOutcome {
                record,
                attempts: attempt,
                status: DispatchStatus::TerminalFailure {
                    last_error: error.to_string(),
                },
            };
        }

        let delay = policy.delay_after(attempt);
        debug!(unit = %record.unit, ?delay, "retrying after backoff");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return abandoned(record, attempt),
            _ = sleep(delay) => {}
        }
    }
}
