//! Job state machine.
//!
//! `Queued → Scanning → Extracting → Detecting → Completed`, with `Failed`
//! reachable from every non-terminal state. A run always ends in a terminal
//! state: stage errors, cancellation and panics all become a
//! [`FailureReason`] on the job.

use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use sentinela_core::{
    Config, DetectionReport, EnrichmentResult, ErrorMetadata, ExtractedFile, ExtractionLimits,
    FailureReason, IngestionJob, IngestionRequest, JobStateError, JobStatus, LogLevel,
    RiskLevel,
};
use sentinela_detection::DetectionEngine;
use sentinela_services::{ArchiveExtractor, DetectionSink, NoopSink, RiskEnricher, VirusScanner};

use crate::progress::ProgressChannel;
use crate::SharedRegistry;

/// How long a scan engine probe result is reused by admission.
pub const DEFAULT_PROBE_TTL_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Job rejected: {0}")]
    Rejected(FailureReason),

    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Job {0} is already running")]
    AlreadyRunning(Uuid),

    #[error("Job {0} has not reached a terminal state")]
    NotTerminal(Uuid),

    #[error(transparent)]
    State(#[from] JobStateError),
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_archive_bytes: u64,
    pub scan_timeout: Duration,
    pub extraction_limits: ExtractionLimits,
    pub detection_max_read_bytes: u64,
    /// Per-job workspaces are created below this directory
    pub work_dir: PathBuf,
    pub enrichment_timeout: Duration,
    pub probe_ttl: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_archive_bytes: config.scan.max_file_size_bytes,
            scan_timeout: config.scan.timeout(),
            extraction_limits: config.extraction,
            detection_max_read_bytes: config.detection_max_read_bytes,
            work_dir: config.work_dir.clone(),
            enrichment_timeout: config.enrichment.timeout(),
            probe_ttl: Duration::from_secs(DEFAULT_PROBE_TTL_SECS),
        }
    }
}

struct JobEntry {
    job: IngestionJob,
    report: Option<DetectionReport>,
    cancel: CancellationToken,
    running: bool,
}

enum Claim {
    Finished(IngestionJob),
    Run {
        source: PathBuf,
        cancel: CancellationToken,
    },
}

pub struct Orchestrator {
    scanner: Arc<dyn VirusScanner>,
    extractor: ArchiveExtractor,
    engine: DetectionEngine,
    registry: SharedRegistry,
    progress: ProgressChannel,
    sink: Arc<dyn DetectionSink>,
    enricher: Option<Arc<dyn RiskEnricher>>,
    settings: OrchestratorSettings,
    jobs: RwLock<HashMap<Uuid, JobEntry>>,
    probe: Mutex<Option<(Instant, bool)>>,
}

impl Orchestrator {
    pub fn new(
        scanner: Arc<dyn VirusScanner>,
        registry: SharedRegistry,
        progress: ProgressChannel,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            scanner,
            extractor: ArchiveExtractor::new(),
            engine: DetectionEngine::new(settings.detection_max_read_bytes),
            registry,
            progress,
            sink: Arc::new(NoopSink),
            enricher: None,
            settings,
            jobs: RwLock::new(HashMap::new()),
            probe: Mutex::new(None),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DetectionSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn RiskEnricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn with_detection_engine(mut self, engine: DetectionEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn progress(&self) -> &ProgressChannel {
        &self.progress
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Accept an upload as a new `Queued` job.
    ///
    /// Oversized archives and an unreachable scan engine are rejected here,
    /// before any job exists.
    #[tracing::instrument(skip(self, request), fields(path = %request.path.display()))]
    pub async fn admit(&self, request: IngestionRequest) -> Result<IngestionJob, PipelineError> {
        let max = self.settings.max_archive_bytes;
        if request.declared_size > max {
            return Err(reject(FailureReason::FileTooLarge {
                size: request.declared_size,
                max,
            }));
        }

        match tokio::fs::metadata(&request.path).await {
            Ok(metadata) if !metadata.is_file() => {
                return Err(reject(FailureReason::PathRejected));
            }
            Ok(metadata) if metadata.len() > max => {
                return Err(reject(FailureReason::FileTooLarge {
                    size: metadata.len(),
                    max,
                }));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "Upload is not readable");
                return Err(reject(FailureReason::PathRejected));
            }
        }

        if !self.engine_available().await {
            return Err(reject(FailureReason::EngineUnavailable));
        }

        let job = IngestionJob::new(request);
        self.jobs.write().await.insert(
            job.id,
            JobEntry {
                job: job.clone(),
                report: None,
                cancel: CancellationToken::new(),
                running: false,
            },
        );
        self.progress.publish(
            job.id,
            JobStatus::Queued,
            JobStatus::Queued.progress_percentage(),
            "queued",
        );
        tracing::info!(job_id = %job.id, declared_size = job.declared_size, "Job admitted");
        Ok(job)
    }

    async fn engine_available(&self) -> bool {
        let mut cached = self.probe.lock().await;
        if let Some((checked_at, available)) = *cached {
            if checked_at.elapsed() < self.settings.probe_ttl {
                return available;
            }
        }

        let available = self.scanner.is_available().await;
        if !available {
            tracing::error!(engine = self.scanner.engine_name(), "Scan engine probe failed");
        }
        *cached = Some((Instant::now(), available));
        available
    }

    /// Drive a job to a terminal state and return it.
    ///
    /// A job that is already terminal is returned unchanged, so redelivered
    /// queue messages are harmless.
    #[tracing::instrument(skip(self))]
    pub async fn run_job(&self, job_id: Uuid) -> Result<IngestionJob, PipelineError> {
        let (source, cancel) = match self.claim(job_id).await? {
            Claim::Finished(job) => {
                tracing::debug!(status = %job.status, "Job already finished, skipping");
                return Ok(job);
            }
            Claim::Run { source, cancel } => (source, cancel),
        };

        let started = Instant::now();
        let outcome = self.execute(job_id, &source, &cancel).await;
        let job = match outcome {
            Ok(report) => self.complete(job_id, report).await?,
            Err(reason) => self.finish_failed(job_id, reason).await?,
        };
        tracing::info!(
            status = %job.status,
            duration_ms = started.elapsed().as_millis() as u64,
            "Job finished"
        );
        Ok(job)
    }

    async fn claim(&self, job_id: Uuid) -> Result<Claim, PipelineError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(&job_id)
            .ok_or(PipelineError::NotFound(job_id))?;

        if entry.job.is_terminal() {
            return Ok(Claim::Finished(entry.job.clone()));
        }
        if entry.running {
            return Err(PipelineError::AlreadyRunning(job_id));
        }
        if entry.job.status != JobStatus::Queued {
            // A previous run stopped mid-pipeline without finishing the job
            let stage = entry.job.status;
            drop(jobs);
            return Ok(Claim::Finished(
                self.finish_failed(job_id, FailureReason::InternalError { stage })
                    .await?,
            ));
        }

        entry.running = true;
        Ok(Claim::Run {
            source: entry.job.source_archive_path.clone(),
            cancel: entry.cancel.clone(),
        })
    }

    async fn execute(
        &self,
        job_id: Uuid,
        source: &Path,
        cancel: &CancellationToken,
    ) -> Result<DetectionReport, FailureReason> {
        self.enter(job_id, JobStatus::Scanning, cancel, "scanning archive")
            .await?;
        let verdict = AssertUnwindSafe(self.scanner.scan(
            source,
            self.settings.max_archive_bytes,
            self.settings.scan_timeout,
        ))
        .catch_unwind()
        .await
        .map_err(|_| {
            tracing::error!(stage = %JobStatus::Scanning, "Scan engine panicked");
            FailureReason::InternalError {
                stage: JobStatus::Scanning,
            }
        })?
        .map_err(|e| {
            tracing::warn!(error = %e, "Scan failed");
            e.failure_reason()
        })?;
        if verdict.is_infected() {
            return Err(FailureReason::Infected {
                threats: verdict.threat_names().to_vec(),
            });
        }

        self.enter(job_id, JobStatus::Extracting, cancel, "extracting archive")
            .await?;
        let workspace = self.create_workspace(job_id).await?;
        let files = self.extract(source, workspace.path()).await?;

        self.enter(
            job_id,
            JobStatus::Detecting,
            cancel,
            format!("detecting PII in {} files", files.len()),
        )
        .await?;
        let mut report = self.detect(files).await?;
        report.enrichment = self.enrich(&report).await;

        // Extracted content does not outlive the Detecting stage
        drop(workspace);
        Ok(report)
    }

    /// Cancellation is honoured here, between stages.
    async fn enter(
        &self,
        job_id: Uuid,
        stage: JobStatus,
        cancel: &CancellationToken,
        message: impl Into<String>,
    ) -> Result<(), FailureReason> {
        if cancel.is_cancelled() {
            return Err(FailureReason::Cancelled { stage });
        }

        {
            let mut jobs = self.jobs.write().await;
            let entry = jobs.get_mut(&job_id).ok_or_else(|| {
                tracing::error!(%stage, "Job disappeared while running");
                FailureReason::InternalError { stage }
            })?;
            entry.job.advance(stage).map_err(|e| {
                tracing::error!(error = %e, "Illegal stage transition");
                FailureReason::InternalError { stage }
            })?;
        }

        self.progress
            .publish(job_id, stage, stage.progress_percentage(), message);
        tracing::debug!(%stage, "Stage started");
        Ok(())
    }

    async fn create_workspace(&self, job_id: Uuid) -> Result<TempDir, FailureReason> {
        let internal = |e: std::io::Error| {
            tracing::error!(
                error = %e,
                work_dir = %self.settings.work_dir.display(),
                "Failed to create job workspace"
            );
            FailureReason::InternalError {
                stage: JobStatus::Extracting,
            }
        };
        tokio::fs::create_dir_all(&self.settings.work_dir)
            .await
            .map_err(internal)?;
        tempfile::Builder::new()
            .prefix(&format!("job-{}-", job_id))
            .tempdir_in(&self.settings.work_dir)
            .map_err(internal)
    }

    async fn extract(
        &self,
        source: &Path,
        workspace: &Path,
    ) -> Result<Vec<ExtractedFile>, FailureReason> {
        let extractor = self.extractor.clone();
        let limits = self.settings.extraction_limits;
        let source = source.to_path_buf();
        let dest = workspace.join("content");

        match tokio::task::spawn_blocking(move || extractor.extract(&source, &dest, &limits)).await
        {
            Ok(Ok(files)) => Ok(files),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Archive rejected by extractor");
                Err(e.failure_reason())
            }
            Err(e) => {
                tracing::error!(error = %e, "Extraction task failed");
                Err(FailureReason::InternalError {
                    stage: JobStatus::Extracting,
                })
            }
        }
    }

    async fn detect(&self, files: Vec<ExtractedFile>) -> Result<DetectionReport, FailureReason> {
        let snapshot = self.registry.read().await.clone();
        let engine = self.engine.clone();

        match tokio::task::spawn_blocking(move || engine.detect(&files, &snapshot)).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Detection failed");
                Err(FailureReason::InternalError {
                    stage: JobStatus::Detecting,
                })
            }
            Err(e) => {
                tracing::error!(error = %e, "Detection task failed");
                Err(FailureReason::InternalError {
                    stage: JobStatus::Detecting,
                })
            }
        }
    }

    /// Best effort; the job completes without enrichment on any failure.
    async fn enrich(&self, report: &DetectionReport) -> Option<EnrichmentResult> {
        let enricher = self.enricher.as_ref()?;
        if report.detections.is_empty() {
            return None;
        }

        let call = AssertUnwindSafe(enricher.enrich(&report.detections)).catch_unwind();
        match tokio::time::timeout(self.settings.enrichment_timeout, call).await {
            Ok(Ok(Ok(result))) => Some(result),
            Ok(Ok(Err(e))) => {
                tracing::warn!(error = %e, "Risk enrichment unavailable");
                None
            }
            Ok(Err(_)) => {
                tracing::error!("Risk enrichment panicked");
                None
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.settings.enrichment_timeout.as_millis() as u64,
                    "Risk enrichment timed out"
                );
                None
            }
        }
    }

    async fn complete(
        &self,
        job_id: Uuid,
        report: DetectionReport,
    ) -> Result<IngestionJob, PipelineError> {
        let job = {
            let mut jobs = self.jobs.write().await;
            let entry = jobs
                .get_mut(&job_id)
                .ok_or(PipelineError::NotFound(job_id))?;
            entry.running = false;
            entry.job.advance(JobStatus::Completed)?;
            entry.report = Some(report.clone());
            entry.job.clone()
        };

        self.progress.publish(
            job_id,
            JobStatus::Completed,
            JobStatus::Completed.progress_percentage(),
            format!("completed: {} detections", report.detections.len()),
        );
        tracing::info!(
            job_id = %job_id,
            detections = report.detections.len(),
            files_scanned = report.files_scanned,
            highest_risk = ?report.highest_risk(),
            high_risk = report.count_at_least(RiskLevel::High),
            "Job completed"
        );

        if let Err(e) = self.sink.deliver(&job, &report).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to deliver detection report");
        }
        Ok(job)
    }

    async fn finish_failed(
        &self,
        job_id: Uuid,
        reason: FailureReason,
    ) -> Result<IngestionJob, PipelineError> {
        let job = {
            let mut jobs = self.jobs.write().await;
            let entry = jobs
                .get_mut(&job_id)
                .ok_or(PipelineError::NotFound(job_id))?;
            entry.running = false;
            entry.job.fail(reason.clone())?;
            entry.job.clone()
        };

        self.progress.publish(
            job_id,
            JobStatus::Failed,
            JobStatus::Failed.progress_percentage(),
            reason.client_message(),
        );
        log_failure(Some(job_id), &reason);
        Ok(job)
    }

    /// Fail a job whose run was torn down before it finished.
    ///
    /// Returns `None` when the job is unknown or already terminal.
    pub async fn recover_interrupted(&self, job_id: Uuid) -> Option<IngestionJob> {
        let stage = {
            let jobs = self.jobs.read().await;
            let entry = jobs.get(&job_id)?;
            if entry.job.is_terminal() {
                return None;
            }
            entry.job.status
        };
        self.finish_failed(job_id, FailureReason::InternalError { stage })
            .await
            .ok()
    }

    /// Request cancellation. Takes effect at the next stage boundary; a
    /// running scan is never interrupted.
    pub async fn cancel(&self, job_id: Uuid) -> Result<(), PipelineError> {
        let jobs = self.jobs.read().await;
        let entry = jobs.get(&job_id).ok_or(PipelineError::NotFound(job_id))?;
        if !entry.job.is_terminal() {
            entry.cancel.cancel();
            tracing::info!(job_id = %job_id, status = %entry.job.status, "Cancellation requested");
        }
        Ok(())
    }

    pub async fn job(&self, job_id: Uuid) -> Option<IngestionJob> {
        self.jobs.read().await.get(&job_id).map(|e| e.job.clone())
    }

    pub async fn report(&self, job_id: Uuid) -> Option<DetectionReport> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .and_then(|e| e.report.clone())
    }

    pub async fn jobs(&self) -> Vec<IngestionJob> {
        let mut jobs: Vec<IngestionJob> = self
            .jobs
            .read()
            .await
            .values()
            .map(|e| e.job.clone())
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    /// Drop a finished job and its report from memory.
    pub async fn forget(&self, job_id: Uuid) -> Result<IngestionJob, PipelineError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get(&job_id).ok_or(PipelineError::NotFound(job_id))?;
        if !entry.job.is_terminal() {
            return Err(PipelineError::NotTerminal(job_id));
        }
        jobs.remove(&job_id)
            .map(|e| e.job)
            .ok_or(PipelineError::NotFound(job_id))
    }
}

fn reject(reason: FailureReason) -> PipelineError {
    log_failure(None, &reason);
    PipelineError::Rejected(reason)
}

fn log_failure(job_id: Option<Uuid>, reason: &FailureReason) {
    let job_id = job_id.map(|id| id.to_string()).unwrap_or_default();
    let code = reason.error_code();
    match reason.log_level() {
        LogLevel::Debug => tracing::debug!(job_id = %job_id, code, reason = %reason, "Job failed"),
        LogLevel::Warn => tracing::warn!(job_id = %job_id, code, reason = %reason, "Job failed"),
        LogLevel::Error => tracing::error!(job_id = %job_id, code, reason = %reason, "Job failed"),
    }
}
