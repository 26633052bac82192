// src/dispatch/dispatcher.rs

//! Background dispatcher loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::dispatch::queue::DispatchQueue;
use crate::dispatch::retry::{deliver, RetryPolicy};
use crate::dispatch::{DispatchOutcome, DispatchStatus, TerminalFailureLog};
use crate::handler::ReactionHandler;
use crate::watch::ChangeRecord;

/// Handle to a running dispatcher.
///
/// - `submit` queues a settled record.
/// - `close` stops accepting records; queued and in-flight work still runs.
/// - `abort` cancels everything; unfinished records come back `Abandoned`.
///
/// Every submitted record produces exactly one [`DispatchOutcome`] on the
/// outcome channel given to [`spawn_dispatcher`].
#[derive(Debug)]
pub struct DispatcherHandle {
    tx: Option<mpsc::UnboundedSender<ChangeRecord>>,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl DispatcherHandle {
    pub fn submit(&self, record: ChangeRecord) -> Result<(), ChangeRecord> {
        match &self.tx {
            Some(tx) => tx.send(record).map_err(|e| e.0),
            None => Err(record),
        }
    }

    pub fn close(&mut self) {
        self.tx = None;
    }

    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// Wait for the loop to finish. Call `close` or `abort` first.
    pub async fn join(&mut self) {
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "dispatcher task failed");
            }
        }
    }
}

/// Spawn the dispatcher loop.
///
/// Records for the same unit never run concurrently and start in submission
/// order; at most `concurrency` records run at once.
pub fn spawn_dispatcher(
    handler: Arc<dyn ReactionHandler>,
    policy: RetryPolicy,
    concurrency: usize,
    failure_log: Option<TerminalFailureLog>,
    outcome_tx: mpsc::UnboundedSender<DispatchOutcome>,
) -> DispatcherHandle {
    let (tx, rx) = mpsc::unbounded_channel::<ChangeRecord>();
    let cancel = CancellationToken::new();

    let join = tokio::spawn(run_dispatcher(
        rx,
        handler,
        policy,
        concurrency,
        failure_log,
        outcome_tx,
        cancel.clone(),
    ));

    DispatcherHandle {
        tx: Some(tx),
        cancel,
        join: Some(join),
    }
}

async fn run_dispatcher(
    mut rx: mpsc::UnboundedReceiver<ChangeRecord>,
    handler: Arc<dyn ReactionHandler>,
    policy: RetryPolicy,
    concurrency: usize,
    failure_log: Option<TerminalFailureLog>,
    outcome_tx: mpsc::UnboundedSender<DispatchOutcome>,
    cancel: CancellationToken,
) {
    info!(concurrency, handler = handler.name(), "dispatcher started");

    let mut queue = DispatchQueue::new(concurrency);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<DispatchOutcome>();
    let mut closed = false;
    let mut cancelled = false;

    loop {
        if !cancelled {
            while let Some(record) = queue.next_ready() {
                let handler = Arc::clone(&handler);
                let cancel = cancel.clone();
                let done_tx = done_tx.clone();
                tokio::spawn(async move {
                    let outcome = deliver(record, handler, policy, cancel).await;
                    let _ = done_tx.send(outcome);
                });
            }
        }

        if closed && queue.is_idle() {
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled(), if !cancelled => {
                cancelled = true;
                closed = true;
                rx.close();
                let mut dropped = queue.drain_queued();
                while let Ok(record) = rx.try_recv() {
                    dropped.push(record);
                }
                debug!(dropped = dropped.len(), in_flight = queue.in_flight(), "dispatcher cancelled");
                for record in dropped {
                    let _ = outcome_tx.send(DispatchOutcome {
                        record,
                        attempts: 0,
                        status: DispatchStatus::Abandoned,
                    });
                }
            }
            Some(outcome) = done_rx.recv() => {
                queue.complete(&outcome.record.unit);
                if let DispatchStatus::TerminalFailure { last_error } = &outcome.status {
                    error!(
                        unit = %outcome.record.unit,
                        kind = %outcome.record.kind,
                        attempts = outcome.attempts,
                        error = %last_error,
                        "terminal dispatch failure; unit marked degraded"
                    );
                    if let Some(log) = &failure_log {
                        if let Err(e) = log.append(&outcome.record, outcome.attempts, last_error) {
                            error!(path = ?log.path(), error = %e, "could not write terminal failure log");
                        }
                    }
                }
                if outcome_tx.send(outcome).is_err() {
                    debug!("outcome receiver dropped");
                }
            }
            maybe = rx.recv(), if !closed => {
                match maybe {
                    Some(record) => queue.push(record),
                    None => {
                        debug!("dispatcher submissions closed");
                        closed = true;
                    }
                }
            }
        }
    }

    info!("dispatcher finished");
}
