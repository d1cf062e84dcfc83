//! Persistence handoff for finished jobs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;

use sentinela_core::{DetectionReport, IngestionJob};

/// Receives every job that reached `Completed` together with its report.
#[async_trait]
pub trait DetectionSink: Send + Sync {
    async fn deliver(&self, job: &IngestionJob, report: &DetectionReport) -> Result<()>;
}

/// Discards results.
#[derive(Debug, Clone, Default)]
pub struct NoopSink;

#[async_trait]
impl DetectionSink for NoopSink {
    async fn deliver(&self, job: &IngestionJob, report: &DetectionReport) -> Result<()> {
        tracing::debug!(
            job_id = %job.id,
            detections = report.detections.len(),
            "Discarding detection report (no sink configured)"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct JobRecord<'a> {
    job: &'a IngestionJob,
    report: &'a DetectionReport,
}

/// Writes `<job id>.json` into a directory.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DetectionSink for JsonFileSink {
    async fn deliver(&self, job: &IngestionJob, report: &DetectionReport) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create results directory {}", self.dir.display()))?;

        let body = serde_json::to_vec_pretty(&JobRecord { job, report })
            .context("Failed to serialize detection report")?;

        // Write then rename so readers never see a partial file
        let final_path = self.dir.join(format!("{}.json", job.id));
        let tmp_path = self.dir.join(format!(".{}.json.tmp", job.id));
        tokio::fs::write(&tmp_path, body)
            .await
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .with_context(|| format!("Failed to move report to {}", final_path.display()))?;

        tracing::info!(job_id = %job.id, path = %final_path.display(), "Detection report stored");
        Ok(())
    }
}
