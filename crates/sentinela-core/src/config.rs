//! Configuration module
//!
//! All limits are supplied externally through environment variables (a `.env`
//! file is honoured). The fallbacks below are the documented defaults; nothing
//! else is hard-coded.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::models::ExtractionLimits;

// Common constants
const SCAN_TIMEOUT_SECS: u64 = 60;
const SCAN_PROBE_TIMEOUT_SECS: u64 = 5;
const SCAN_MAX_FILE_SIZE_MB: u64 = 100;
const CLAMD_PORT: u16 = 3310;
const ARCHIVE_MAX_TOTAL_MB: u64 = 1024;
const ARCHIVE_MAX_ENTRY_MB: u64 = 100;
const ARCHIVE_MAX_RATIO: f64 = 100.0;
const ARCHIVE_MAX_ENTRIES: usize = 10_000;
const DETECTION_MAX_READ_MB: u64 = 20;
const WORKER_POOL_SIZE: usize = 4;
const QUEUE_POLL_INTERVAL_MS: u64 = 500;
const ENRICHMENT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CLAMSCAN_ARGS: &str = "--no-summary,--infected";

const MB: u64 = 1024 * 1024;

/// Which antivirus capability backs the scan stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEngineKind {
    /// One `clamscan`-compatible subprocess per file
    Clamscan,
    /// A clamd daemon reached over TCP
    Clamd,
}

impl FromStr for ScanEngineKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "clamscan" | "process" => Ok(ScanEngineKind::Clamscan),
            "clamd" | "daemon" => Ok(ScanEngineKind::Clamd),
            _ => Err(anyhow::anyhow!("Unsupported scan engine: {}", s)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScanConfig {
    pub engine: ScanEngineKind,
    pub clamscan_path: String,
    pub clamscan_args: Vec<String>,
    pub clamd_host: String,
    pub clamd_port: u16,
    pub timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub max_file_size_bytes: u64,
    /// Directories the gateway is allowed to hand to the engine
    pub allowed_roots: Vec<PathBuf>,
}

impl ScanConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub pool_size: usize,
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: WORKER_POOL_SIZE,
            poll_interval_ms: QUEUE_POLL_INTERVAL_MS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EnrichmentConfig {
    /// Endpoint of the semantic risk classifier; enrichment is off when unset
    pub url: Option<String>,
    pub timeout_secs: u64,
}

impl EnrichmentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Pipeline configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    pub scan: ScanConfig,
    pub extraction: ExtractionLimits,
    pub detection_max_read_bytes: u64,
    pub worker: WorkerConfig,
    /// Parent directory of per-job extraction workspaces
    pub work_dir: PathBuf,
    /// Where the upload ingress drops accepted archives
    pub upload_dir: PathBuf,
    pub custom_patterns_path: Option<PathBuf>,
    pub enrichment: EnrichmentConfig,
    /// Where the JSON sink writes finished jobs; results are not persisted when unset
    pub results_dir: Option<PathBuf>,
}

fn env_parse<T: FromStr>(key: &str, fallback: T) -> Result<T, anyhow::Error> {
    parse_value(key, env::var(key).ok().as_deref(), fallback)
}

/// A set but unparsable value is an error rather than a silent fallback.
fn parse_value<T: FromStr>(
    key: &str,
    raw: Option<&str>,
    fallback: T,
) -> Result<T, anyhow::Error> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(value) => value
            .parse::<T>()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {:?}", key, value)),
        None => Ok(fallback),
    }
}

fn env_megabytes(key: &str, fallback_mb: u64) -> Result<u64, anyhow::Error> {
    megabytes(key, env_parse(key, fallback_mb)?)
}

fn megabytes(key: &str, mb: u64) -> Result<u64, anyhow::Error> {
    mb.checked_mul(MB)
        .ok_or_else(|| anyhow::anyhow!("{} is too large: {} MB", key, mb))
}

fn env_list(key: &str, fallback: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_else(|_| fallback.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    /// Documented fallbacks rooted at `work_dir`, without reading the environment.
    pub fn with_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        let upload_dir = work_dir.join("uploads");
        Self {
            environment: "development".to_string(),
            scan: ScanConfig {
                engine: ScanEngineKind::Clamscan,
                clamscan_path: "clamscan".to_string(),
                clamscan_args: DEFAULT_CLAMSCAN_ARGS
                    .split(',')
                    .map(str::to_string)
                    .collect(),
                clamd_host: "localhost".to_string(),
                clamd_port: CLAMD_PORT,
                timeout_secs: SCAN_TIMEOUT_SECS,
                probe_timeout_secs: SCAN_PROBE_TIMEOUT_SECS,
                max_file_size_bytes: SCAN_MAX_FILE_SIZE_MB * MB,
                allowed_roots: vec![upload_dir.clone(), work_dir.clone()],
            },
            extraction: ExtractionLimits {
                max_total_bytes: ARCHIVE_MAX_TOTAL_MB * MB,
                max_entry_bytes: ARCHIVE_MAX_ENTRY_MB * MB,
                max_compression_ratio: ARCHIVE_MAX_RATIO,
                max_entries: ARCHIVE_MAX_ENTRIES,
            },
            detection_max_read_bytes: DETECTION_MAX_READ_MB * MB,
            worker: WorkerConfig::default(),
            work_dir,
            upload_dir,
            custom_patterns_path: None,
            enrichment: EnrichmentConfig {
                url: None,
                timeout_secs: ENRICHMENT_TIMEOUT_SECS,
            },
            results_dir: None,
        }
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let work_dir = env::var("WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir().join("sentinela"));
        let upload_dir = env::var("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| work_dir.join("uploads"));

        let engine = match env::var("SCAN_ENGINE") {
            Ok(value) => value.parse()?,
            Err(_) => ScanEngineKind::Clamscan,
        };

        let allowed_roots = match env::var("SCAN_ALLOWED_ROOTS") {
            Ok(value) => value
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect(),
            Err(_) => vec![upload_dir.clone(), work_dir.clone()],
        };

        let config = Config {
            environment,
            scan: ScanConfig {
                engine,
                clamscan_path: env::var("CLAMSCAN_PATH").unwrap_or_else(|_| "clamscan".to_string()),
                clamscan_args: env_list("CLAMSCAN_ARGS", DEFAULT_CLAMSCAN_ARGS),
                clamd_host: env::var("CLAMD_HOST").unwrap_or_else(|_| "localhost".to_string()),
                clamd_port: env_parse("CLAMD_PORT", CLAMD_PORT)?,
                timeout_secs: env_parse("SCAN_TIMEOUT_SECS", SCAN_TIMEOUT_SECS)?,
                probe_timeout_secs: env_parse(
                    "SCAN_PROBE_TIMEOUT_SECS",
                    SCAN_PROBE_TIMEOUT_SECS,
                )?,
                max_file_size_bytes: env_megabytes(
                    "SCAN_MAX_FILE_SIZE_MB",
                    SCAN_MAX_FILE_SIZE_MB,
                )?,
                allowed_roots,
            },
            extraction: ExtractionLimits {
                max_total_bytes: env_megabytes("ARCHIVE_MAX_TOTAL_MB", ARCHIVE_MAX_TOTAL_MB)?,
                max_entry_bytes: env_megabytes("ARCHIVE_MAX_ENTRY_MB", ARCHIVE_MAX_ENTRY_MB)?,
                max_compression_ratio: env_parse("ARCHIVE_MAX_RATIO", ARCHIVE_MAX_RATIO)?,
                max_entries: env_parse("ARCHIVE_MAX_ENTRIES", ARCHIVE_MAX_ENTRIES)?,
            },
            detection_max_read_bytes: env_megabytes(
                "DETECTION_MAX_READ_MB",
                DETECTION_MAX_READ_MB,
            )?,
            worker: WorkerConfig {
                pool_size: env_parse("WORKER_POOL_SIZE", WORKER_POOL_SIZE)?,
                poll_interval_ms: env_parse("QUEUE_POLL_INTERVAL_MS", QUEUE_POLL_INTERVAL_MS)?,
            },
            work_dir,
            upload_dir,
            custom_patterns_path: env::var("CUSTOM_PATTERNS_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            enrichment: EnrichmentConfig {
                url: env::var("ENRICHMENT_URL").ok().filter(|s| !s.is_empty()),
                timeout_secs: env_parse("ENRICHMENT_TIMEOUT_SECS", ENRICHMENT_TIMEOUT_SECS)?,
            },
            results_dir: env::var("RESULTS_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.scan.timeout_secs == 0 {
            return Err(anyhow::anyhow!("SCAN_TIMEOUT_SECS must be greater than zero"));
        }
        if self.scan.probe_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "SCAN_PROBE_TIMEOUT_SECS must be greater than zero"
            ));
        }
        if self.scan.max_file_size_bytes == 0 {
            return Err(anyhow::anyhow!(
                "SCAN_MAX_FILE_SIZE_MB must be greater than zero"
            ));
        }
        if self.scan.allowed_roots.is_empty() {
            return Err(anyhow::anyhow!(
                "SCAN_ALLOWED_ROOTS must name at least one directory"
            ));
        }
        if self.scan.engine == ScanEngineKind::Clamscan && self.scan.clamscan_path.is_empty() {
            return Err(anyhow::anyhow!(
                "CLAMSCAN_PATH must be set when SCAN_ENGINE=clamscan"
            ));
        }
        if self.extraction.max_total_bytes == 0 || self.extraction.max_entry_bytes == 0 {
            return Err(anyhow::anyhow!(
                "ARCHIVE_MAX_TOTAL_MB and ARCHIVE_MAX_ENTRY_MB must be greater than zero"
            ));
        }
        if self.extraction.max_entry_bytes > self.extraction.max_total_bytes {
            return Err(anyhow::anyhow!(
                "ARCHIVE_MAX_ENTRY_MB cannot exceed ARCHIVE_MAX_TOTAL_MB"
            ));
        }
        if !(self.extraction.max_compression_ratio >= 1.0) {
            return Err(anyhow::anyhow!("ARCHIVE_MAX_RATIO must be at least 1"));
        }
        if self.extraction.max_entries == 0 {
            return Err(anyhow::anyhow!("ARCHIVE_MAX_ENTRIES must be greater than zero"));
        }
        if self.detection_max_read_bytes == 0 {
            return Err(anyhow::anyhow!(
                "DETECTION_MAX_READ_MB must be greater than zero"
            ));
        }
        if self.worker.pool_size == 0 {
            return Err(anyhow::anyhow!("WORKER_POOL_SIZE must be greater than zero"));
        }
        Ok(())
    }
}
