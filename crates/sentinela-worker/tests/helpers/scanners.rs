use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

use sentinela_core::ScanVerdict;
use sentinela_services::{ScanError, VirusScanner};

const ENGINE: &str = "fake";

/// Returns a fixed verdict and counts scans.
pub struct StaticScanner {
    threats: Vec<String>,
    scans: AtomicUsize,
}

impl StaticScanner {
    pub fn clean() -> Self {
        Self {
            threats: Vec::new(),
            scans: AtomicUsize::new(0),
        }
    }

    pub fn infected(threat: &str) -> Self {
        Self {
            threats: vec![threat.to_string()],
            scans: AtomicUsize::new(0),
        }
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VirusScanner for StaticScanner {
    fn engine_name(&self) -> &str {
        ENGINE
    }

    async fn scan(
        &self,
        path: &Path,
        max_size: u64,
        _timeout: Duration,
    ) -> Result<ScanVerdict, ScanError> {
        let size = std::fs::metadata(path)
            .map_err(|e| ScanError::Internal(e.to_string()))?
            .len();
        if size > max_size {
            return Err(ScanError::FileTooLarge {
                size,
                max: max_size,
            });
        }
        self.scans.fetch_add(1, Ordering::SeqCst);
        if self.threats.is_empty() {
            Ok(ScanVerdict::clean(path, 1, ENGINE))
        } else {
            Ok(ScanVerdict::infected(path, self.threats.clone(), 1, ENGINE))
        }
    }

    async fn is_available(&self) -> bool {
        true
    }
}

pub struct PanickingScanner;

#[async_trait]
impl VirusScanner for PanickingScanner {
    fn engine_name(&self) -> &str {
        ENGINE
    }

    async fn scan(
        &self,
        _path: &Path,
        _max_size: u64,
        _timeout: Duration,
    ) -> Result<ScanVerdict, ScanError> {
        panic!("engine bindings crashed");
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// Clean scanner that holds every scan until released.
#[derive(Default)]
pub struct GatedScanner {
    pub started: Notify,
    pub release: Notify,
}

#[async_trait]
impl VirusScanner for GatedScanner {
    fn engine_name(&self) -> &str {
        ENGINE
    }

    async fn scan(
        &self,
        path: &Path,
        _max_size: u64,
        _timeout: Duration,
    ) -> Result<ScanVerdict, ScanError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(ScanVerdict::clean(path, 1, ENGINE))
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// Clean scanner that sleeps inside every scan and records how many scans
/// were running at once.
pub struct SlowScanner {
    delay: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowScanner {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VirusScanner for SlowScanner {
    fn engine_name(&self) -> &str {
        ENGINE
    }

    async fn scan(
        &self,
        path: &Path,
        _max_size: u64,
        _timeout: Duration,
    ) -> Result<ScanVerdict, ScanError> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(ScanVerdict::clean(path, 1, ENGINE))
    }

    async fn is_available(&self) -> bool {
        true
    }
}
