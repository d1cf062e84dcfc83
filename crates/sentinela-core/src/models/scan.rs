use serde::Serialize;
use std::path::{Path, PathBuf};

/// Outcome of an antivirus inspection of one file.
///
/// Built only through [`ScanVerdict::clean`] and [`ScanVerdict::infected`],
/// so a clean verdict never carries threat names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanVerdict {
    is_infected: bool,
    threat_names: Vec<String>,
    scanned_path: PathBuf,
    elapsed_ms: u64,
    engine: String,
}

impl ScanVerdict {
    pub fn clean(scanned_path: impl Into<PathBuf>, elapsed_ms: u64, engine: &str) -> Self {
        Self {
            is_infected: false,
            threat_names: Vec::new(),
            scanned_path: scanned_path.into(),
            elapsed_ms,
            engine: engine.to_string(),
        }
    }

    pub fn infected(
        scanned_path: impl Into<PathBuf>,
        threat_names: Vec<String>,
        elapsed_ms: u64,
        engine: &str,
    ) -> Self {
        Self {
            is_infected: true,
            threat_names,
            scanned_path: scanned_path.into(),
            elapsed_ms,
            engine: engine.to_string(),
        }
    }

    pub fn is_infected(&self) -> bool {
        self.is_infected
    }

    pub fn threat_names(&self) -> &[String] {
        &self.threat_names
    }

    pub fn scanned_path(&self) -> &Path {
        &self.scanned_path
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_verdict_has_no_threats() {
        let verdict = ScanVerdict::clean("/tmp/a.zip", 12, "clamscan");
        assert!(!verdict.is_infected());
        assert!(verdict.threat_names().is_empty());
        assert_eq!(verdict.engine(), "clamscan");
    }

    #[test]
    fn infected_verdict_keeps_threat_order() {
        let verdict = ScanVerdict::infected(
            "/tmp/a.zip",
            vec!["Eicar-Signature".to_string(), "Win.Trojan.Agent".to_string()],
            40,
            "clamd",
        );
        assert!(verdict.is_infected());
        assert_eq!(
            verdict.threat_names(),
            ["Eicar-Signature".to_string(), "Win.Trojan.Agent".to_string()]
        );
        assert_eq!(verdict.scanned_path(), Path::new("/tmp/a.zip"));
    }
}
