//! Worker pool: queue polling with push wake-up, bounded concurrency and
//! graceful shutdown.
//!
//! Shutdown: [`IngestionWorkerPool::shutdown`] stops the pool from claiming
//! new jobs and waits until every job already claimed reached a terminal
//! state.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use sentinela_core::{IngestionJob, IngestionRequest, WorkerConfig};

use crate::orchestrator::{Orchestrator, PipelineError};
use crate::queue::{Delivery, JobQueue};

pub struct IngestionWorkerPool {
    orchestrator: Arc<Orchestrator>,
    queue: Arc<dyn JobQueue>,
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl IngestionWorkerPool {
    /// Spawn the pool loop. Unacknowledged deliveries left by a previous
    /// process are requeued before the first claim.
    pub fn start(
        orchestrator: Arc<Orchestrator>,
        queue: Arc<dyn JobQueue>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let handle = tokio::spawn(Self::worker_pool(
            orchestrator.clone(),
            queue.clone(),
            config,
            shutdown_rx,
        ));

        Self {
            orchestrator,
            queue,
            shutdown_tx,
            handle,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Admit an upload and hand it to the pool.
    #[tracing::instrument(skip(self, request), fields(path = %request.path.display()))]
    pub async fn submit(&self, request: IngestionRequest) -> Result<IngestionJob> {
        let job = self.orchestrator.admit(request).await?;
        if let Err(e) = self.queue.enqueue(job.id).await {
            // The job would otherwise stay Queued with nobody to run it
            self.orchestrator.recover_interrupted(job.id).await;
            return Err(e).context("Failed to enqueue job");
        }
        tracing::debug!(job_id = %job.id, "Job enqueued");
        Ok(job)
    }

    async fn worker_pool(
        orchestrator: Arc<Orchestrator>,
        queue: Arc<dyn JobQueue>,
        config: WorkerConfig,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let signal = queue.work_signal();
        tracing::info!(
            max_workers = config.pool_size,
            poll_interval_ms = config.poll_interval_ms,
            push_signal = signal.is_some(),
            "Ingestion worker pool started"
        );

        match queue.recover_in_flight().await {
            Ok(0) => {}
            Ok(count) => tracing::info!(count, "Recovered unacknowledged jobs"),
            Err(e) => tracing::error!(error = %e, "Failed to recover in-flight jobs"),
        }

        let semaphore = Arc::new(Semaphore::new(config.pool_size));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Ingestion worker pool shutting down");
                    break;
                }
                _ = wait_for_signal(signal.as_deref()) => {
                    Self::claim_and_dispatch(&orchestrator, &queue, &semaphore).await;
                }
                _ = sleep(poll_interval) => {
                    Self::claim_and_dispatch(&orchestrator, &queue, &semaphore).await;
                }
            }
        }

        // Every permit back means every claimed job is terminal
        let in_flight = config.pool_size - semaphore.available_permits();
        if in_flight > 0 {
            tracing::info!(in_flight, "Waiting for in-flight jobs");
        }
        if let Ok(permits) = u32::try_from(config.pool_size) {
            let _ = semaphore.acquire_many(permits).await;
        }

        tracing::info!("Ingestion worker pool stopped");
    }

    /// Claim until the queue is empty or every worker is busy.
    async fn claim_and_dispatch(
        orchestrator: &Arc<Orchestrator>,
        queue: &Arc<dyn JobQueue>,
        semaphore: &Arc<Semaphore>,
    ) {
        while Self::claim_and_dispatch_one(orchestrator, queue, semaphore).await {}
    }

    async fn claim_and_dispatch_one(
        orchestrator: &Arc<Orchestrator>,
        queue: &Arc<dyn JobQueue>,
        semaphore: &Arc<Semaphore>,
    ) -> bool {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("No workers available, skipping claim");
                return false;
            }
        };

        match queue.dequeue().await {
            Ok(Some(delivery)) => {
                let orchestrator = orchestrator.clone();
                let queue = queue.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    Self::process_delivery(orchestrator, queue, delivery).await;
                });
                true
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No jobs available in queue");
                false
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "Failed to claim job from queue");
                false
            }
        }
    }

    #[tracing::instrument(
        skip(orchestrator, queue, delivery),
        fields(job_id = %delivery.job_id, attempt = delivery.attempt)
    )]
    async fn process_delivery(
        orchestrator: Arc<Orchestrator>,
        queue: Arc<dyn JobQueue>,
        delivery: Delivery,
    ) {
        let job_id = delivery.job_id;
        let run = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.run_job(job_id).await }
        });

        match run.await {
            Ok(Ok(job)) => {
                tracing::debug!(status = %job.status, "Delivery processed");
            }
            Ok(Err(PipelineError::NotFound(_))) => {
                tracing::warn!("Delivery for an unknown job, dropping");
            }
            Ok(Err(PipelineError::AlreadyRunning(_))) => {
                tracing::debug!("Job is already being run by another worker");
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Job run failed");
                orchestrator.recover_interrupted(job_id).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Job run task aborted");
                orchestrator.recover_interrupted(job_id).await;
            }
        }

        if let Err(e) = queue.ack(&delivery).await {
            tracing::error!(error = %e, "Failed to acknowledge delivery");
        }
    }

    /// Stop claiming and wait for in-flight jobs to finish.
    pub async fn shutdown(self) {
        tracing::info!("Initiating ingestion worker pool shutdown");
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Ingestion worker pool loop panicked");
        }
    }
}

async fn wait_for_signal(signal: Option<&Notify>) {
    match signal {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}
