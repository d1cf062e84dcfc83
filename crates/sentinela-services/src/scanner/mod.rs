//! Antivirus scan gateways
//!
//! Every engine sits behind [`VirusScanner`]. The path and size checks run
//! before any engine is contacted, so an oversized or misplaced file never
//! reaches it.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sentinela_core::{FailureReason, JobStatus, ScanVerdict};

#[cfg(feature = "clamd")]
pub mod clamd;
pub mod process;

#[cfg(feature = "clamd")]
pub use clamd::ClamdScanGateway;
pub use process::ProcessScanGateway;

/// Threat name used when an engine reports an infection without naming it.
pub const UNKNOWN_THREAT: &str = "unknown";

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("File too large for scanning: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Path rejected for scanning: {path}: {reason}")]
    PathRejected { path: PathBuf, reason: String },

    #[error("Scan engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Scan timed out after {timeout_ms} ms")]
    ScanTimeout { timeout_ms: u64 },

    #[error("Scan engine failed (exit code {exit_code:?}): {stderr}")]
    EngineError {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Scan failed: {0}")]
    Internal(String),
}

impl ScanError {
    /// Client-safe failure recorded on the job; engine diagnostics are dropped.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            ScanError::FileTooLarge { size, max } => FailureReason::FileTooLarge {
                size: *size,
                max: *max,
            },
            ScanError::PathRejected { .. } => FailureReason::PathRejected,
            ScanError::EngineUnavailable(_) => FailureReason::EngineUnavailable,
            ScanError::ScanTimeout { timeout_ms } => FailureReason::ScanTimeout {
                timeout_ms: *timeout_ms,
            },
            ScanError::EngineError { .. } => FailureReason::EngineError,
            ScanError::Internal(_) => FailureReason::InternalError {
                stage: JobStatus::Scanning,
            },
        }
    }
}

#[async_trait]
pub trait VirusScanner: Send + Sync {
    /// Engine identifier recorded on verdicts
    fn engine_name(&self) -> &str;

    async fn scan(
        &self,
        path: &Path,
        max_size: u64,
        timeout: Duration,
    ) -> Result<ScanVerdict, ScanError>;

    /// Lightweight liveness probe.
    async fn is_available(&self) -> bool;
}

/// Resolves `path` and checks it against the allowed roots and `max_size`.
///
/// Returns the canonical path and the file size.
pub(crate) async fn prepare_target(
    path: &Path,
    allowed_roots: &[PathBuf],
    max_size: u64,
) -> Result<(PathBuf, u64), ScanError> {
    let rejected = |reason: &str| ScanError::PathRejected {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let canonical = tokio::fs::canonicalize(path)
        .await
        .map_err(|_| rejected("path does not resolve"))?;

    let mut inside_root = false;
    for root in allowed_roots {
        if let Ok(root) = tokio::fs::canonicalize(root).await {
            if canonical.starts_with(&root) {
                inside_root = true;
                break;
            }
        }
    }
    if !inside_root {
        return Err(rejected("outside allowed scan roots"));
    }

    let metadata = tokio::fs::metadata(&canonical)
        .await
        .map_err(|_| rejected("metadata unavailable"))?;
    if !metadata.is_file() {
        return Err(rejected("not a regular file"));
    }
    if metadata.len() > max_size {
        return Err(ScanError::FileTooLarge {
            size: metadata.len(),
            max: max_size,
        });
    }

    Ok((canonical, metadata.len()))
}

/// Extracts threat names from `<path>: <threat> FOUND` report lines.
pub(crate) fn parse_threat_names(report: &str) -> Vec<String> {
    report
        .lines()
        .filter_map(|line| line.trim_end().strip_suffix(" FOUND"))
        .filter_map(|line| line.rsplit_once(": ").map(|(_, threat)| threat.trim()))
        .filter(|threat| !threat.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_threat_names() {
        let report = "/srv/uploads/a.zip: Eicar-Signature FOUND\n\
                      /srv/uploads/a.zip: Win.Trojan.Agent-1 FOUND\n\
                      /srv/uploads/b.txt: OK\n";
        assert_eq!(
            parse_threat_names(report),
            vec!["Eicar-Signature", "Win.Trojan.Agent-1"]
        );
        assert!(parse_threat_names("").is_empty());
        assert!(parse_threat_names("stream: OK").is_empty());
    }

    #[test]
    fn test_failure_reason_mapping() {
        let err = ScanError::EngineError {
            exit_code: Some(2),
            stderr: "LibClamAV Error: cl_load(): No such file".to_string(),
        };
        assert_eq!(err.failure_reason(), FailureReason::EngineError);
        assert_eq!(
            ScanError::ScanTimeout { timeout_ms: 10 }.failure_reason(),
            FailureReason::ScanTimeout { timeout_ms: 10 }
        );
        assert_eq!(
            ScanError::Internal("join".to_string()).failure_reason(),
            FailureReason::InternalError {
                stage: JobStatus::Scanning
            }
        );
    }

    #[tokio::test]
    async fn test_prepare_target_checks() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let inside_file = root.path().join("upload.zip");
        std::fs::write(&inside_file, vec![0u8; 32]).unwrap();
        let outside_file = outside.path().join("other.zip");
        std::fs::write(&outside_file, b"x").unwrap();
        let roots = vec![root.path().to_path_buf()];

        let (canonical, size) = prepare_target(&inside_file, &roots, 64).await.unwrap();
        assert!(canonical.ends_with("upload.zip"));
        assert_eq!(size, 32);

        assert!(matches!(
            prepare_target(&inside_file, &roots, 16).await,
            Err(ScanError::FileTooLarge { size: 32, max: 16 })
        ));
        assert!(matches!(
            prepare_target(&outside_file, &roots, 64).await,
            Err(ScanError::PathRejected { .. })
        ));
        assert!(matches!(
            prepare_target(&root.path().join("missing.zip"), &roots, 64).await,
            Err(ScanError::PathRejected { .. })
        ));
        // escaping through `..` resolves outside the root
        let sneaky = root
            .path()
            .join("..")
            .join(outside.path().file_name().unwrap())
            .join("other.zip");
        assert!(matches!(
            prepare_target(&sneaky, &roots, 64).await,
            Err(ScanError::PathRejected { .. })
        ));
    }
}
