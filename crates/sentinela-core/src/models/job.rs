use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{FailureReason, JobStateError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Scanning,
    Extracting,
    Detecting,
    Completed,
    Failed,
}

impl JobStatus {
    /// Position in the forward pipeline. `Failed` sits outside the sequence.
    fn rank(self) -> Option<u8> {
        match self {
            JobStatus::Queued => Some(0),
            JobStatus::Scanning => Some(1),
            JobStatus::Extracting => Some(2),
            JobStatus::Detecting => Some(3),
            JobStatus::Completed => Some(4),
            JobStatus::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `next` is a legal successor: one step forward, or `Failed`
    /// from any non-terminal state.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(from), Some(to)) => to == from + 1,
            (None, Some(_)) => false,
        }
    }

    /// Progress percentage reported to observers when the job enters this status.
    pub fn progress_percentage(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Scanning => 10,
            JobStatus::Extracting => 40,
            JobStatus::Detecting => 70,
            JobStatus::Completed | JobStatus::Failed => 100,
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Scanning => write!(f, "scanning"),
            JobStatus::Extracting => write!(f, "extracting"),
            JobStatus::Detecting => write!(f, "detecting"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "scanning" => Ok(JobStatus::Scanning),
            "extracting" => Ok(JobStatus::Extracting),
            "detecting" => Ok(JobStatus::Detecting),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid job status: {}", s)),
        }
    }
}

/// An archive handed over by the upload ingress: a local path that already
/// passed transport-level validation plus the size the client declared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionRequest {
    pub path: PathBuf,
    pub declared_size: u64,
}

impl IngestionRequest {
    pub fn new(path: impl Into<PathBuf>, declared_size: u64) -> Self {
        Self {
            path: path.into(),
            declared_size,
        }
    }
}

/// One archive submission and its position in the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: Uuid,
    pub source_archive_path: PathBuf,
    pub declared_size: u64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<FailureReason>,
}

impl IngestionJob {
    pub fn new(request: IngestionRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_archive_path: request.path,
            declared_size: request.declared_size,
            status: JobStatus::Queued,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failure_reason: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move the job one stage forward.
    ///
    /// Use [`IngestionJob::fail`] to enter `Failed`; it carries the reason.
    pub fn advance(&mut self, next: JobStatus) -> Result<(), JobStateError> {
        if next == JobStatus::Failed || !self.status.can_transition_to(next) {
            return Err(JobStateError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        if next == JobStatus::Completed {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Enter the terminal `Failed` state from any non-terminal state.
    pub fn fail(&mut self, reason: FailureReason) -> Result<(), JobStateError> {
        if self.status.is_terminal() {
            return Err(JobStateError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to: JobStatus::Failed,
            });
        }
        let now = Utc::now();
        self.status = JobStatus::Failed;
        self.updated_at = now;
        self.completed_at = Some(now);
        self.failure_reason = Some(reason);
        Ok(())
    }
}
