// src/engine/observer.rs

//! Runs the resource adapter on its own task.
//!
//! The watch loop asks for one observation at a time and the task carries
//! each request to completion. An observation is therefore never dropped and
//! restarted because another loop event won a `select!` race.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, warn};

use crate::adapter::{Cadence, Observed, ResourceAdapter};
use crate::errors::AdapterError;

type ObserveResult = std::result::Result<Observed, AdapterError>;

#[derive(Debug, Clone, Copy)]
struct ObserveRequest {
    connect_first: bool,
    at: Instant,
}

/// Handle to the task that owns the adapter.
#[derive(Debug)]
pub(crate) struct AdapterObserver {
    name: String,
    cadence: Cadence,
    request_tx: mpsc::Sender<ObserveRequest>,
    result_rx: mpsc::Receiver<ObserveResult>,
    task: JoinHandle<()>,
    in_flight: bool,
}

impl AdapterObserver {
    /// Move `adapter` onto a new task. Must be called inside a Tokio runtime.
    pub(crate) fn spawn<A>(adapter: A, observe_timeout: Duration) -> Self
    where
        A: ResourceAdapter + 'static,
    {
        let name = adapter.name().to_string();
        let cadence = adapter.cadence();
        let (request_tx, mut request_rx) = mpsc::channel::<ObserveRequest>(1);
        let (result_tx, result_rx) = mpsc::channel::<ObserveResult>(1);

        let task = tokio::spawn(async move {
            let mut adapter = adapter;
            while let Some(request) = request_rx.recv().await {
                let result = observe_once(&mut adapter, request, cadence, observe_timeout).await;
                if result_tx.send(result).await.is_err() {
                    break;
                }
            }
            debug!(adapter = adapter.name(), "observer task finished");
        });

        Self {
            name,
            cadence,
            request_tx,
            result_rx,
            task,
            in_flight: false,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn cadence(&self) -> Cadence {
        self.cadence
    }

    /// Whether a requested observation has not been received yet.
    pub(crate) fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Ask for the next observation no earlier than `at`. No-op while one is
    /// already in flight.
    pub(crate) fn request(&mut self, connect_first: bool, at: Instant) {
        if self.in_flight {
            return;
        }
        match self.request_tx.try_send(ObserveRequest { connect_first, at }) {
            Ok(()) => self.in_flight = true,
            Err(e) => warn!(adapter = %self.name, error = %e, "observer task is gone"),
        }
    }

    /// Wait for the in-flight observation. Cancel-safe: dropping this future
    /// leaves the result queued for the next call.
    pub(crate) async fn recv(&mut self) -> ObserveResult {
        let result = match self.result_rx.recv().await {
            Some(result) => result,
            None => Err(AdapterError::Fatal {
                attempts: 0,
                last_error: format!("observer task for adapter {} stopped", self.name),
            }),
        };
        self.in_flight = false;
        result
    }

    /// Stop the task, dropping any observation still in progress.
    pub(crate) fn stop(&mut self) {
        self.task.abort();
    }
}

impl Drop for AdapterObserver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// One adapter round: wait for the scheduled time, (re)connect if needed and
/// fetch the next observation.
///
/// Only poll adapters are bounded by `observe_timeout`; a push adapter
/// legitimately waits as long as the resource stays quiet.
async fn observe_once<A: ResourceAdapter>(
    adapter: &mut A,
    request: ObserveRequest,
    cadence: Cadence,
    observe_timeout: Duration,
) -> ObserveResult {
    sleep_until(request.at).await;

    if request.connect_first {
        debug!(adapter = adapter.name(), "connecting adapter");
        timeout(observe_timeout, adapter.connect())
            .await
            .map_err(|_| {
                AdapterError::Transient(format!("connect timed out after {observe_timeout:?}"))
            })??;
    }

    match cadence {
        Cadence::Poll => timeout(observe_timeout, adapter.next())
            .await
            .map_err(|_| {
                AdapterError::Transient(format!("observation timed out after {observe_timeout:?}"))
            })?,
        Cadence::Push => adapter.next().await,
    }
}
