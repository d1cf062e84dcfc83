use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use sentinela_core::{Detection, DetectionReport, ExtractedFile};

use crate::patterns::PatternRegistry;
use crate::risk::SeverityTable;

/// Leading bytes inspected for NUL to classify a file as binary.
pub const BINARY_SNIFF_BYTES: usize = 8 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("Failed to read extracted file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Runs the active patterns of a registry over extracted files.
#[derive(Debug, Clone)]
pub struct DetectionEngine {
    max_read_bytes: u64,
    severity: SeverityTable,
}

impl DetectionEngine {
    /// `max_read_bytes` caps how much of each file is inspected.
    pub fn new(max_read_bytes: u64) -> Self {
        Self {
            max_read_bytes,
            severity: SeverityTable::default(),
        }
    }

    pub fn with_severity_table(mut self, severity: SeverityTable) -> Self {
        self.severity = severity;
        self
    }

    pub fn severity(&self) -> &SeverityTable {
        &self.severity
    }

    /// Blocking: reads every file. Call from a blocking thread in async code.
    ///
    /// Detections come back ordered by file path, then offset, then pattern
    /// registration order.
    pub fn detect(
        &self,
        files: &[ExtractedFile],
        registry: &PatternRegistry,
    ) -> Result<DetectionReport, DetectionError> {
        let started = Instant::now();
        let patterns: Vec<_> = registry.active_patterns().collect();
        let mut report = DetectionReport::default();
        let mut ranked: Vec<(usize, Detection)> = Vec::new();

        for file in files {
            let bytes = self.read_capped(&file.path)?;
            let truncated = bytes.len() as u64 >= self.max_read_bytes;
            report.files_scanned += 1;

            if is_binary(&bytes) {
                tracing::debug!(file = %file.relative_path.display(), "Skipping binary file");
                report.skipped_binary.push(file.relative_path.clone());
                continue;
            }

            let text = decode_text(bytes, truncated);
            for (rank, pattern) in patterns.iter().enumerate() {
                for found in pattern.regex.find_iter(&text) {
                    let value = found.as_str();
                    // Patterns without a validator are trusted as matched
                    if pattern
                        .validator
                        .as_ref()
                        .is_some_and(|validator| !validator.check(value))
                    {
                        continue;
                    }
                    ranked.push((
                        rank,
                        Detection {
                            pattern_name: pattern.name.clone(),
                            category: pattern.category,
                            matched_value: value.to_string(),
                            source_file: file.relative_path.clone(),
                            offset: found.start(),
                            validated: true,
                            risk_level: self.severity.base_level(pattern.category),
                            corroborated: false,
                        },
                    ));
                }
            }
        }

        ranked.sort_by(|(rank_a, a), (rank_b, b)| {
            a.source_file
                .cmp(&b.source_file)
                .then(a.offset.cmp(&b.offset))
                .then(rank_a.cmp(rank_b))
        });
        let mut detections: Vec<Detection> = ranked.into_iter().map(|(_, d)| d).collect();
        self.severity.apply_corroboration(&mut detections);
        report.detections = detections;

        tracing::debug!(
            files = report.files_scanned,
            skipped_binary = report.skipped_binary.len(),
            detections = report.detections.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Detection finished"
        );
        Ok(report)
    }

    fn read_capped(&self, path: &Path) -> Result<Vec<u8>, DetectionError> {
        let read_error = |source| DetectionError::Read {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(read_error)?;
        let mut bytes = Vec::new();
        file.take(self.max_read_bytes)
            .read_to_end(&mut bytes)
            .map_err(read_error)?;
        Ok(bytes)
    }
}

fn is_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(BINARY_SNIFF_BYTES).any(|&b| b == 0)
}

/// UTF-8 when possible, Latin-1 otherwise.
///
/// When the read ceiling cut a multi-byte sequence, the incomplete tail is
/// dropped instead of falling back to Latin-1.
fn decode_text(bytes: Vec<u8>, truncated: bool) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            let utf8 = err.utf8_error();
            let bytes = err.into_bytes();
            if truncated && utf8.error_len().is_none() {
                let valid = utf8.valid_up_to();
                return String::from_utf8_lossy(&bytes[..valid]).into_owned();
            }
            bytes.iter().map(|&b| char::from(b)).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::{DetectionPattern, Validator};
    use sentinela_core::{PatternCategory, RiskLevel};
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &[u8]) -> ExtractedFile {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        ExtractedFile {
            relative_path: PathBuf::from(name),
            path,
            size_bytes: content.len() as u64,
        }
    }

    fn engine() -> DetectionEngine {
        DetectionEngine::new(1024 * 1024)
    }

    #[test]
    fn test_single_valid_cpf() {
        let dir = TempDir::new().unwrap();
        let files = vec![write(&dir, "dados.txt", b"CPF: 123.456.789-09")];
        let report = engine().detect(&files, &PatternRegistry::new()).unwrap();

        assert_eq!(report.detections.len(), 1);
        let detection = &report.detections[0];
        assert_eq!(detection.pattern_name, "CPF");
        assert_eq!(detection.matched_value, "123.456.789-09");
        assert_eq!(detection.offset, 5);
        assert!(detection.validated);
        assert!(detection.risk_level >= RiskLevel::High);
    }

    #[test]
    fn test_repeated_digit_cpf_is_dropped() {
        let dir = TempDir::new().unwrap();
        let files = vec![write(&dir, "dados.txt", b"CPF: 111.111.111-11")];
        let report = engine().detect(&files, &PatternRegistry::new()).unwrap();
        assert!(report.detections.iter().all(|d| d.pattern_name != "CPF"));
    }

    #[test]
    fn test_disabled_pattern_is_ignored_until_reenabled() {
        let dir = TempDir::new().unwrap();
        let files = vec![write(&dir, "dados.txt", b"CPF: 123.456.789-09")];
        let mut registry = PatternRegistry::new();

        registry.set_enabled("CPF", false).unwrap();
        let report = engine().detect(&files, &registry).unwrap();
        assert!(report.detections.is_empty());

        registry.set_enabled("CPF", true).unwrap();
        let report = engine().detect(&files, &registry).unwrap();
        assert_eq!(report.detections.len(), 1);
    }

    #[test]
    fn test_name_corroborates_document() {
        let dir = TempDir::new().unwrap();
        let files = vec![write(
            &dir,
            "ficha.txt",
            "Titular: Maria da Silva, CPF 123.456.789-09".as_bytes(),
        )];
        let report = engine().detect(&files, &PatternRegistry::new()).unwrap();

        let cpf = report
            .detections
            .iter()
            .find(|d| d.pattern_name == "CPF")
            .unwrap();
        assert_eq!(cpf.risk_level, RiskLevel::Critical);
        assert!(cpf.corroborated);

        let name = report
            .detections
            .iter()
            .find(|d| d.pattern_name == "Name")
            .unwrap();
        assert_eq!(name.matched_value, "Maria da Silva");
        assert_eq!(name.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_ordering_by_file_offset_and_registration() {
        let dir = TempDir::new().unwrap();
        let mut registry = PatternRegistry::empty();
        registry
            .register(DetectionPattern::new("digits", r"\d+", PatternCategory::Custom).unwrap())
            .unwrap();
        registry
            .register(DetectionPattern::new("number", r"\d+", PatternCategory::Custom).unwrap())
            .unwrap();
        let files = vec![
            write(&dir, "b.txt", b"7 and 8"),
            write(&dir, "a.txt", b"1"),
        ];
        let report = engine().detect(&files, &registry).unwrap();
        let order: Vec<(String, usize, &str)> = report
            .detections
            .iter()
            .map(|d| {
                (
                    d.source_file.display().to_string(),
                    d.offset,
                    d.pattern_name.as_str(),
                )
            })
            .collect();
        assert_eq!(
            order,
            vec![
                ("a.txt".to_string(), 0, "digits"),
                ("a.txt".to_string(), 0, "number"),
                ("b.txt".to_string(), 0, "digits"),
                ("b.txt".to_string(), 0, "number"),
                ("b.txt".to_string(), 6, "digits"),
                ("b.txt".to_string(), 6, "number"),
            ]
        );
        assert!(report.detections.iter().all(|d| d.validated));
    }

    #[test]
    fn test_matches_without_validator_are_validated() {
        let dir = TempDir::new().unwrap();
        let files = vec![write(
            &dir,
            "contatos.txt",
            b"contato: fulano@example.com\nRG 12.345.678-X\n",
        )];
        let report = engine().detect(&files, &PatternRegistry::new()).unwrap();

        let email = report
            .detections
            .iter()
            .find(|d| d.pattern_name == "Email")
            .unwrap();
        assert_eq!(email.matched_value, "fulano@example.com");
        assert!(email.validated);

        let rg = report
            .detections
            .iter()
            .find(|d| d.pattern_name == "RG")
            .unwrap();
        assert_eq!(rg.matched_value, "12.345.678-X");
        assert!(rg.validated);
    }

    #[test]
    fn test_binary_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            write(&dir, "image.bin", b"\x89PNG\0\0CPF: 123.456.789-09"),
            write(&dir, "notes.txt", b"nada aqui"),
        ];
        let report = engine().detect(&files, &PatternRegistry::new()).unwrap();
        assert_eq!(report.files_scanned, 2);
        assert_eq!(report.skipped_binary, vec![PathBuf::from("image.bin")]);
        assert!(report.detections.is_empty());
    }

    #[test]
    fn test_latin1_text_is_decoded() {
        let dir = TempDir::new().unwrap();
        // "João da Conceição" in Latin-1
        let mut content = b"Jo\xe3o da Concei\xe7\xe3o".to_vec();
        content.extend_from_slice(b" CPF 123.456.789-09");
        let files = vec![write(&dir, "legado.txt", &content)];
        let report = engine().detect(&files, &PatternRegistry::new()).unwrap();
        let name = report
            .detections
            .iter()
            .find(|d| d.pattern_name == "Name")
            .unwrap();
        assert_eq!(name.matched_value, "João da Conceição");
    }

    #[test]
    fn test_read_ceiling_limits_inspected_bytes() {
        let dir = TempDir::new().unwrap();
        let mut content = "x".repeat(64).into_bytes();
        content.extend_from_slice(b" 123.456.789-09");
        let files = vec![write(&dir, "big.txt", &content)];
        let report = DetectionEngine::new(64)
            .detect(&files, &PatternRegistry::new())
            .unwrap();
        assert!(report.detections.is_empty());
        assert_eq!(report.files_scanned, 1);
    }

    #[test]
    fn test_truncated_utf8_tail_is_dropped() {
        assert_eq!(decode_text("ação".as_bytes()[..2].to_vec(), true), "a");
        assert_eq!(decode_text(b"caf\xe9".to_vec(), false), "café");
    }

    #[test]
    fn test_custom_validator_filters_matches() {
        let dir = TempDir::new().unwrap();
        let mut registry = PatternRegistry::empty();
        registry
            .register(
                DetectionPattern::new("Matricula", r"MAT-\d{4}", PatternCategory::Custom)
                    .unwrap()
                    .with_validator(Validator::custom(|s| s.ends_with('0'))),
            )
            .unwrap();
        let files = vec![write(&dir, "rh.txt", b"MAT-1230 MAT-1231")];
        let report = engine().detect(&files, &registry).unwrap();
        assert_eq!(report.detections.len(), 1);
        assert_eq!(report.detections[0].matched_value, "MAT-1230");
        assert_eq!(report.detections[0].risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let files = vec![ExtractedFile {
            relative_path: PathBuf::from("gone.txt"),
            path: PathBuf::from("/nonexistent/sentinela/gone.txt"),
            size_bytes: 0,
        }];
        assert!(matches!(
            engine().detect(&files, &PatternRegistry::new()),
            Err(DetectionError::Read { .. })
        ));
    }
}
