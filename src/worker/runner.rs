//! Worker loop - runs cycles until shutdown

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::flow::{Acquisition, TaskFlow};
use super::FlowError;
use crate::client::HttpQueueClient;
use crate::config::Config;
use crate::observability::Metrics;
use crate::ocr::TesseractEngine;

/// Acquisition of the next task running in the background
struct Prefetch {
    handle: JoinHandle<Result<Acquisition, FlowError>>,
    cancel: CancellationToken,
}

pub struct Worker {
    flow: Arc<TaskFlow>,
    prefetch: bool,
    metrics: Arc<Metrics>,
}

impl Worker {
    pub fn new(flow: Arc<TaskFlow>, prefetch: bool, metrics: Arc<Metrics>) -> Self {
        Self {
            flow,
            prefetch,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Run cycles until `shutdown` fires or an unrecoverable error occurs
    ///
    /// With prefetch enabled, at most one further task is acquired and
    /// downloaded while the current one is recognised. A prefetched task
    /// that never gets processed is abandoned before returning.
    pub async fn run(&self, shutdown: &CancellationToken) -> Result<(), FlowError> {
        let mut pending: Option<Prefetch> = None;
        let mut cycle: u64 = 0;

        let result = loop {
            if shutdown.is_cancelled() {
                break Ok(());
            }
            cycle += 1;
            info!(cycle, "Starting cycle");

            let cancel = shutdown.child_token();
            let acquisition = match pending.take() {
                Some(prefetch) => match prefetch.handle.await {
                    Ok(acquisition) => acquisition,
                    Err(e) => break Err(FlowError::Prefetch(e.to_string())),
                },
                None => self.flow.acquire(&cancel).await,
            };

            let outcome = match acquisition {
                Ok(Acquisition::Finished(outcome)) => outcome,
                Ok(Acquisition::Ready(job)) => {
                    if self.prefetch && !shutdown.is_cancelled() {
                        pending = Some(self.spawn_prefetch(shutdown));
                    }
                    match self.flow.complete(&cancel, job).await {
                        Ok(outcome) => outcome,
                        Err(e) => break Err(e),
                    }
                }
                Err(e) => break Err(e),
            };

            debug!(cycle, outcome = ?outcome, "Cycle ended");
            self.metrics.record(&outcome);
        };

        if let Some(prefetch) = pending {
            self.drain(prefetch).await;
        }

        if let Err(e) = &result {
            error!(error = %e, "Worker stopped");
        }
        result
    }

    fn spawn_prefetch(&self, shutdown: &CancellationToken) -> Prefetch {
        let flow = self.flow.clone();
        let cancel = shutdown.child_token();
        let token = cancel.clone();
        debug!("Prefetching next task");
        let handle = tokio::spawn(async move { flow.acquire(&token).await });
        Prefetch { handle, cancel }
    }

    /// Stop a pending prefetch and give back whatever it acquired
    async fn drain(&self, prefetch: Prefetch) {
        prefetch.cancel.cancel();
        match prefetch.handle.await {
            Ok(Ok(Acquisition::Ready(job))) => self.flow.abandon_job(job).await,
            // Never counted as a cycle, so kept out of the totals
            Ok(Ok(Acquisition::Finished(outcome))) => {
                debug!(outcome = ?outcome, "Prefetch ended at shutdown");
            }
            Ok(Err(e)) => warn!(error = %e, "Prefetched acquisition failed"),
            Err(e) => warn!(error = %e, "Prefetch task did not finish"),
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

/// Build the worker from configuration and run it until shutdown
pub async fn run(config: Config) -> Result<(), FlowError> {
    let work_dir = config.worker.work_dir.clone();
    tokio::fs::create_dir_all(&work_dir)
        .await
        .map_err(|source| FlowError::Storage {
            path: work_dir.clone(),
            source,
        })?;

    let client = HttpQueueClient::new(&config.client, &config.retry, config.identity.clone())?;
    let engine = TesseractEngine::new(&config.ocr);
    let flow = Arc::new(TaskFlow::new(
        Arc::new(client),
        Arc::new(engine),
        &config.worker,
    ));
    let metrics = Arc::new(Metrics::new());
    let worker = Worker::new(flow, config.worker.prefetch, metrics.clone());

    let shutdown = CancellationToken::new();
    let signals = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    info!(
        server = %config.identity.server,
        work_dir = %work_dir.display(),
        prefetch = config.worker.prefetch,
        "OCR minion started"
    );
    let result = worker.run(&shutdown).await;

    signals.abort();
    metrics.log_summary();
    result
}
