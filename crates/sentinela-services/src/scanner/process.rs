//! Subprocess scan engine: one `clamscan`-compatible process per file.
//!
//! Exit codes: 0 clean, 1 infected (threats on stdout as
//! `<path>: <threat> FOUND`), anything else is an engine failure.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use sentinela_core::ScanVerdict;

use super::{parse_threat_names, prepare_target, ScanError, VirusScanner, UNKNOWN_THREAT};

/// Per-stream ceiling on captured engine output.
pub const MAX_CAPTURED_OUTPUT: usize = 64 * 1024;

const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

#[derive(Clone, Debug)]
pub struct ProcessScanGateway {
    program: PathBuf,
    args: Vec<String>,
    allowed_roots: Vec<PathBuf>,
    probe_timeout: Duration,
}

impl ProcessScanGateway {
    /// Create a gateway for `program`.
    ///
    /// # Arguments
    /// * `program` - engine executable, e.g. `clamscan`
    /// * `args` - arguments placed before the file path
    /// * `allowed_roots` - directories files must resolve into
    pub fn new(
        program: impl Into<PathBuf>,
        args: Vec<String>,
        allowed_roots: Vec<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            allowed_roots,
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
        }
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn from_config(config: &sentinela_core::ScanConfig) -> Self {
        Self::new(
            config.clamscan_path.clone(),
            config.clamscan_args.clone(),
            config.allowed_roots.clone(),
        )
        .with_probe_timeout(config.probe_timeout())
    }
}

/// Reads at most `cap` bytes and drains the rest so the child never blocks
/// on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> Vec<u8> {
    let mut captured = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(captured.len());
                captured.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    captured
}

fn spawn_capture<R>(reader: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        match reader {
            Some(reader) => read_capped(reader, MAX_CAPTURED_OUTPUT).await,
            None => Vec::new(),
        }
    })
}

#[async_trait]
impl VirusScanner for ProcessScanGateway {
    fn engine_name(&self) -> &str {
        self.program
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("clamscan")
    }

    #[tracing::instrument(skip(self), fields(engine = %self.engine_name()))]
    async fn scan(
        &self,
        path: &Path,
        max_size: u64,
        timeout: Duration,
    ) -> Result<ScanVerdict, ScanError> {
        let (target, size) = prepare_target(path, &self.allowed_roots, max_size).await?;
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;
        tracing::debug!(size_bytes = size, "Starting antivirus scan");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(&target)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScanError::EngineUnavailable(e.to_string()))?;

        let stdout = spawn_capture(child.stdout.take());
        let stderr = spawn_capture(child.stderr.take());

        let status = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                stdout.abort();
                stderr.abort();
                return Err(ScanError::Internal(format!(
                    "Failed to wait for scan engine: {}",
                    e
                )));
            }
            Err(_) => {
                // kill() also reaps the child
                if let Err(e) = child.kill().await {
                    tracing::error!(error = %e, "Failed to kill timed out scan engine");
                }
                stdout.abort();
                stderr.abort();
                let timeout_ms = timeout.as_millis() as u64;
                tracing::warn!(timeout_ms, "Antivirus scan timed out");
                return Err(ScanError::ScanTimeout { timeout_ms });
            }
        };

        // A descendant still holding the pipes keeps the capture open
        let (stdout_abort, stderr_abort) = (stdout.abort_handle(), stderr.abort_handle());
        let (stdout, stderr) = match tokio::time::timeout_at(deadline, async {
            (stdout.await, stderr.await)
        })
        .await
        {
            Ok((stdout, stderr)) => (stdout.unwrap_or_default(), stderr.unwrap_or_default()),
            Err(_) => {
                stdout_abort.abort();
                stderr_abort.abort();
                let timeout_ms = timeout.as_millis() as u64;
                tracing::warn!(timeout_ms, "Scan engine output still open at timeout");
                return Err(ScanError::ScanTimeout { timeout_ms });
            }
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match status.code() {
            Some(0) => {
                tracing::info!(duration_ms = elapsed_ms, "File scan completed: clean");
                Ok(ScanVerdict::clean(target, elapsed_ms, self.engine_name()))
            }
            Some(1) => {
                let mut threats = parse_threat_names(&String::from_utf8_lossy(&stdout));
                if threats.is_empty() {
                    threats.push(UNKNOWN_THREAT.to_string());
                }
                tracing::warn!(
                    duration_ms = elapsed_ms,
                    threats = %threats.join(", "),
                    "File scan detected malware"
                );
                Ok(ScanVerdict::infected(
                    target,
                    threats,
                    elapsed_ms,
                    self.engine_name(),
                ))
            }
            exit_code => {
                let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
                tracing::error!(?exit_code, stderr = %stderr, "Scan engine failed");
                Err(ScanError::EngineError { exit_code, stderr })
            }
        }
    }

    async fn is_available(&self) -> bool {
        let probe = Command::new(&self.program)
            .args(&self.args)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(self.probe_timeout, probe).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, program = %self.program.display(), "Scan engine probe failed");
                false
            }
            Err(_) => {
                tracing::warn!(program = %self.program.display(), "Scan engine probe timed out");
                false
            }
        }
    }
}
