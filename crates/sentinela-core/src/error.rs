//! Error types module
//!
//! Stage errors (scan, extraction, detection) are defined next to the stage
//! that raises them. When a stage fails, the orchestrator records the failure
//! on the job as a [`FailureReason`]: a serializable, diagnostics-free value
//! that is safe to show to the uploading client.
//!
//! [`ErrorMetadata`] describes how a failure is presented and logged.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

use crate::models::JobStatus;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected outcomes like rejected uploads
    Debug,
    /// Warning level - for rejections that point at hostile input or a degraded engine
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for failure reporting - defines how a failure should be presented
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "ZIP_BOMB")
    fn error_code(&self) -> &'static str;

    /// Whether resubmitting the same archive may succeed
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message; never contains engine output or stack traces
    fn client_message(&self) -> String;

    /// Log level for this failure
    fn log_level(&self) -> LogLevel;
}

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    Infected { threats: Vec<String> },
    FileTooLarge { size: u64, max: u64 },
    PathRejected,
    EngineUnavailable,
    ScanTimeout { timeout_ms: u64 },
    EngineError,
    ZipBomb { detail: String },
    PathTraversal { entry: String },
    CorruptArchive,
    Cancelled { stage: JobStatus },
    InternalError { stage: JobStatus },
}

impl Display for FailureReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            FailureReason::Infected { threats } => write!(f, "infected ({})", threats.join(", ")),
            FailureReason::FileTooLarge { size, max } => {
                write!(f, "file too large ({} bytes, max {})", size, max)
            }
            FailureReason::PathRejected => write!(f, "path rejected"),
            FailureReason::EngineUnavailable => write!(f, "engine unavailable"),
            FailureReason::ScanTimeout { timeout_ms } => {
                write!(f, "scan timeout after {} ms", timeout_ms)
            }
            FailureReason::EngineError => write!(f, "engine error"),
            FailureReason::ZipBomb { detail } => write!(f, "zip bomb: {}", detail),
            FailureReason::PathTraversal { entry } => write!(f, "path traversal: {}", entry),
            FailureReason::CorruptArchive => write!(f, "corrupt archive"),
            FailureReason::Cancelled { stage } => write!(f, "cancelled before {}", stage),
            FailureReason::InternalError { stage } => write!(f, "internal error in {}", stage),
        }
    }
}

/// Static metadata for each variant: (error_code, recoverable, suggested_action, log_level).
fn failure_static_metadata(
    reason: &FailureReason,
) -> (&'static str, bool, Option<&'static str>, LogLevel) {
    match reason {
        FailureReason::Infected { .. } => (
            "INFECTED",
            false,
            Some("Remove the infected file and upload again"),
            LogLevel::Warn,
        ),
        FailureReason::FileTooLarge { .. } => (
            "FILE_TOO_LARGE",
            false,
            Some("Split the archive into smaller uploads"),
            LogLevel::Debug,
        ),
        FailureReason::PathRejected => (
            "PATH_REJECTED",
            false,
            Some("Upload the archive through the supported ingress"),
            LogLevel::Warn,
        ),
        FailureReason::EngineUnavailable => (
            "ENGINE_UNAVAILABLE",
            true,
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
        FailureReason::ScanTimeout { .. } => (
            "SCAN_TIMEOUT",
            true,
            Some("Retry after a short delay"),
            LogLevel::Warn,
        ),
        FailureReason::EngineError => (
            "ENGINE_ERROR",
            true,
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
        FailureReason::ZipBomb { .. } => (
            "ZIP_BOMB",
            false,
            Some("Upload an archive within the extraction limits"),
            LogLevel::Warn,
        ),
        FailureReason::PathTraversal { .. } => (
            "PATH_TRAVERSAL",
            false,
            Some("Rebuild the archive with relative entry names"),
            LogLevel::Warn,
        ),
        FailureReason::CorruptArchive => (
            "CORRUPT_ARCHIVE",
            false,
            Some("Check that the file is a valid ZIP archive"),
            LogLevel::Debug,
        ),
        FailureReason::Cancelled { .. } => ("CANCELLED", true, None, LogLevel::Debug),
        FailureReason::InternalError { .. } => (
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
    }
}

impl FailureReason {
    /// Short kind name, stable across releases (matches the serde tag).
    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::Infected { .. } => "infected",
            FailureReason::FileTooLarge { .. } => "file_too_large",
            FailureReason::PathRejected => "path_rejected",
            FailureReason::EngineUnavailable => "engine_unavailable",
            FailureReason::ScanTimeout { .. } => "scan_timeout",
            FailureReason::EngineError => "engine_error",
            FailureReason::ZipBomb { .. } => "zip_bomb",
            FailureReason::PathTraversal { .. } => "path_traversal",
            FailureReason::CorruptArchive => "corrupt_archive",
            FailureReason::Cancelled { .. } => "cancelled",
            FailureReason::InternalError { .. } => "internal_error",
        }
    }
}

impl ErrorMetadata for FailureReason {
    fn error_code(&self) -> &'static str {
        failure_static_metadata(self).0
    }

    fn is_recoverable(&self) -> bool {
        failure_static_metadata(self).1
    }

    fn suggested_action(&self) -> Option<&'static str> {
        failure_static_metadata(self).2
    }

    fn log_level(&self) -> LogLevel {
        failure_static_metadata(self).3
    }

    fn client_message(&self) -> String {
        match self {
            FailureReason::Infected { .. } => "file rejected: malware detected".to_string(),
            FailureReason::FileTooLarge { max, .. } => {
                format!("file rejected: exceeds maximum size of {} bytes", max)
            }
            FailureReason::PathRejected => "file rejected: invalid upload location".to_string(),
            FailureReason::EngineUnavailable => {
                "scan unavailable: antivirus engine is not reachable".to_string()
            }
            FailureReason::ScanTimeout { .. } => "scan failed: antivirus scan timed out".to_string(),
            FailureReason::EngineError => "scan failed: antivirus engine error".to_string(),
            FailureReason::ZipBomb { .. } => {
                "archive rejected: exceeds safe extraction limits".to_string()
            }
            FailureReason::PathTraversal { .. } => {
                "archive rejected: entry path escapes the archive root".to_string()
            }
            FailureReason::CorruptArchive => "archive rejected: not a valid ZIP file".to_string(),
            FailureReason::Cancelled { .. } => "job cancelled".to_string(),
            FailureReason::InternalError { .. } => "internal error while processing upload".to_string(),
        }
    }
}

/// Illegal job lifecycle operation.
#[derive(Debug, thiserror::Error)]
pub enum JobStateError {
    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job not found: {0}")]
    NotFound(Uuid),
}
