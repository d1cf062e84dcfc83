use async_trait::async_trait;
use clamav_client::{clean, Tcp};
use std::path::{Path, PathBuf};
use std::str;
use std::time::{Duration, Instant};

use sentinela_core::ScanVerdict;

use super::{parse_threat_names, prepare_target, ScanError, VirusScanner, UNKNOWN_THREAT};

const ENGINE_NAME: &str = "clamd";
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Scan engine backed by a clamd daemon reached over TCP.
///
/// File contents are streamed to the daemon (`INSTREAM`), so the daemon does
/// not need access to the upload directory.
#[derive(Clone, Debug)]
pub struct ClamdScanGateway {
    host: String,
    port: u16,
    allowed_roots: Vec<PathBuf>,
    probe_timeout: Duration,
}

enum ClamdOutcome {
    Clean,
    Infected(Vec<String>),
}

impl ClamdScanGateway {
    /// Create a new ClamdScanGateway.
    ///
    /// # Arguments
    /// * `host` - clamd hostname
    /// * `port` - clamd port (typically 3310)
    /// * `allowed_roots` - directories files must resolve into
    pub fn new(host: String, port: u16, allowed_roots: Vec<PathBuf>) -> Self {
        Self {
            host,
            port,
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
            config.clamd_host.clone(),
            config.clamd_port,
            config.allowed_roots.clone(),
        )
        .with_probe_timeout(config.probe_timeout())
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_trait]
impl VirusScanner for ClamdScanGateway {
    fn engine_name(&self) -> &str {
        ENGINE_NAME
    }

    /// Uses the sync client inside spawn_blocking to avoid !Send tokio futures.
    #[tracing::instrument(skip(self), fields(host = %self.host, port = %self.port))]
    async fn scan(
        &self,
        path: &Path,
        max_size: u64,
        timeout: Duration,
    ) -> Result<ScanVerdict, ScanError> {
        let (target, size) = prepare_target(path, &self.allowed_roots, max_size).await?;
        let start = Instant::now();
        tracing::debug!(size_bytes = size, "Starting clamd scan");

        let address = self.address();
        let file = target.clone();
        let result = tokio::time::timeout(
            timeout,
            tokio::task::spawn_blocking(move || {
                let connection = Tcp {
                    host_address: address.as_str(),
                };
                let response = clamav_client::scan_file(&file, connection, None)
                    .map_err(|e| ScanError::EngineUnavailable(e.to_string()))?;
                let is_clean = clean(&response).map_err(|e| ScanError::EngineError {
                    exit_code: None,
                    stderr: format!("Failed to parse clamd response: {}", e),
                })?;
                if is_clean {
                    return Ok(ClamdOutcome::Clean);
                }
                let response = str::from_utf8(&response)
                    .unwrap_or("")
                    .trim_end_matches('\0')
                    .trim();
                if response.ends_with("ERROR") {
                    return Err(ScanError::EngineError {
                        exit_code: None,
                        stderr: response.to_string(),
                    });
                }
                let mut threats = parse_threat_names(response);
                if threats.is_empty() {
                    threats.push(UNKNOWN_THREAT.to_string());
                }
                Ok(ClamdOutcome::Infected(threats))
            }),
        )
        .await;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(Ok(Ok(ClamdOutcome::Clean))) => {
                tracing::info!(duration_ms = elapsed_ms, "File scan completed: clean");
                Ok(ScanVerdict::clean(target, elapsed_ms, ENGINE_NAME))
            }
            Ok(Ok(Ok(ClamdOutcome::Infected(threats)))) => {
                tracing::warn!(
                    duration_ms = elapsed_ms,
                    threats = %threats.join(", "),
                    "File scan detected malware"
                );
                Ok(ScanVerdict::infected(target, threats, elapsed_ms, ENGINE_NAME))
            }
            Ok(Ok(Err(e))) => {
                tracing::error!(error = %e, "clamd scan failed");
                Err(e)
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "clamd scan task panicked");
                Err(ScanError::Internal(format!("clamd scan task join error: {}", e)))
            }
            Err(_) => {
                let timeout_ms = timeout.as_millis() as u64;
                tracing::warn!(timeout_ms, "clamd scan timed out");
                Err(ScanError::ScanTimeout { timeout_ms })
            }
        }
    }

    async fn is_available(&self) -> bool {
        let address = self.address();
        let probe = tokio::task::spawn_blocking(move || {
            let connection = Tcp {
                host_address: address.as_str(),
            };
            clamav_client::ping(connection)
        });

        match tokio::time::timeout(self.probe_timeout, probe).await {
            Ok(Ok(Ok(response))) => response.starts_with(b"PONG"),
            Ok(Ok(Err(e))) => {
                tracing::warn!(error = %e, address = %self.address(), "clamd ping failed");
                false
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "clamd ping task panicked");
                false
            }
            Err(_) => {
                tracing::warn!(address = %self.address(), "clamd ping timed out");
                false
            }
        }
    }
}
