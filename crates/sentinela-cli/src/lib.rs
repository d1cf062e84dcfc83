//! Wiring shared by the `sentinela` subcommands.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use sentinela_core::{
    Config, DetectionReport, IngestionJob, JobStatus, PatternCategory, ProgressEvent,
    ScanConfig, ScanEngineKind,
};
use sentinela_detection::{PatternRegistry, Validator};
use sentinela_infra::ErrorResponse;
use sentinela_services::{
    ClamdScanGateway, HttpRiskEnricher, JsonFileSink, ProcessScanGateway, VirusScanner,
};
use sentinela_worker::{shared_registry, Orchestrator, OrchestratorSettings, ProgressChannel};

pub fn build_scanner(config: &ScanConfig) -> Arc<dyn VirusScanner> {
    match config.engine {
        ScanEngineKind::Clamscan => Arc::new(ProcessScanGateway::from_config(config)),
        ScanEngineKind::Clamd => Arc::new(ClamdScanGateway::from_config(config)),
    }
}

/// Built-in patterns plus the custom definitions in `custom_patterns_path`.
pub fn load_registry(custom_patterns_path: Option<&Path>) -> Result<PatternRegistry> {
    let mut registry = PatternRegistry::new();
    if let Some(path) = custom_patterns_path {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read custom patterns from {}", path.display()))?;
        let count = registry
            .load_custom_from_json(&json)
            .with_context(|| format!("Invalid custom patterns in {}", path.display()))?;
        tracing::info!(count, path = %path.display(), "Custom patterns loaded");
    }
    Ok(registry)
}

pub fn build_orchestrator(config: &Config, progress: ProgressChannel) -> Result<Orchestrator> {
    let registry = load_registry(config.custom_patterns_path.as_deref())?;
    let scanner = build_scanner(&config.scan);
    tracing::info!(engine = scanner.engine_name(), patterns = registry.len(), "Pipeline configured");

    if config.is_production() && config.results_dir.is_none() {
        tracing::warn!("RESULTS_DIR is not set in production; detection reports are discarded");
    }

    let mut orchestrator = Orchestrator::new(
        scanner,
        shared_registry(registry),
        progress,
        OrchestratorSettings::from_config(config),
    );
    if let Some(dir) = &config.results_dir {
        orchestrator = orchestrator.with_sink(Arc::new(JsonFileSink::new(dir)));
    }
    if let Some(url) = &config.enrichment.url {
        let enricher = HttpRiskEnricher::new(url.clone(), config.enrichment.timeout())
            .context("Failed to create risk enrichment client")?;
        orchestrator = orchestrator.with_enricher(Arc::new(enricher));
    }
    Ok(orchestrator)
}

#[derive(Debug, Serialize)]
pub struct PatternSummary {
    pub name: String,
    pub category: PatternCategory,
    pub enabled: bool,
    pub builtin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validator: Option<String>,
    pub regex: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

pub fn pattern_summaries(registry: &PatternRegistry) -> Vec<PatternSummary> {
    registry
        .patterns()
        .iter()
        .map(|pattern| PatternSummary {
            name: pattern.name.clone(),
            category: pattern.category,
            enabled: pattern.enabled,
            builtin: pattern.builtin,
            validator: pattern.validator.as_ref().map(|validator| match validator {
                Validator::Builtin(builtin) => builtin.id().to_string(),
                Validator::Custom(_) => "custom".to_string(),
            }),
            regex: pattern.regex.as_str().to_string(),
            description: pattern.description.clone(),
        })
        .collect()
}

/// Job fields safe to show a client. The failure reason is reported only
/// through [`ErrorResponse`].
#[derive(Debug, Serialize)]
pub struct JobSummary<'a> {
    pub id: Uuid,
    pub source_archive_path: &'a Path,
    pub declared_size: u64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl<'a> From<&'a IngestionJob> for JobSummary<'a> {
    fn from(job: &'a IngestionJob) -> Self {
        Self {
            id: job.id,
            source_archive_path: &job.source_archive_path,
            declared_size: job.declared_size,
            status: job.status,
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
        }
    }
}

/// Final line printed for a job.
#[derive(Debug, Serialize)]
pub struct JobOutcome<'a> {
    pub job: JobSummary<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<&'a DetectionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

impl<'a> JobOutcome<'a> {
    pub fn new(job: &'a IngestionJob, report: Option<&'a DetectionReport>) -> Self {
        Self {
            job: JobSummary::from(job),
            report,
            error: job.failure_reason.as_ref().map(ErrorResponse::from),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProgressLine<'a> {
    pub progress: &'a ProgressEvent,
}

/// One compact JSON document per line on stdout.
pub fn print_json_line(value: &impl Serialize) -> Result<()> {
    let out = serde_json::to_string(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinela_core::{FailureReason, IngestionRequest};
    use std::io::Write;

    #[test]
    fn load_registry_without_custom_file() {
        let registry = load_registry(None).unwrap();
        assert!(registry.get("CPF").is_some());
        assert!(registry.get("CNPJ").is_some());
    }

    #[test]
    fn load_registry_with_custom_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"name": "Matricula", "regex": "MAT-\\d{{6}}", "category": "document"}}]"#
        )
        .unwrap();

        let registry = load_registry(Some(file.path())).unwrap();
        let pattern = registry.get("Matricula").unwrap();
        assert_eq!(pattern.category, PatternCategory::Document);
        assert!(!pattern.builtin);
    }

    #[test]
    fn load_registry_reports_the_failing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"name": "Broken", "regex": "("}}]"#).unwrap();

        let err = load_registry(Some(file.path())).unwrap_err();
        assert!(format!("{:#}", err).contains(&file.path().display().to_string()));
    }

    #[test]
    fn summaries_name_builtin_validators() {
        let summaries = pattern_summaries(&PatternRegistry::new());
        let cpf = summaries.iter().find(|s| s.name == "CPF").unwrap();
        assert_eq!(cpf.validator.as_deref(), Some("cpf"));
        assert!(cpf.builtin);
        assert!(cpf.enabled);
    }

    #[test]
    fn scanner_follows_configured_engine() {
        let mut config = Config::with_work_dir(std::env::temp_dir().join("sentinela-cli-test"));
        assert_eq!(build_scanner(&config.scan).engine_name(), "clamscan");

        config.scan.engine = ScanEngineKind::Clamd;
        assert_eq!(build_scanner(&config.scan).engine_name(), "clamd");
    }

    #[test]
    fn failed_job_outcome_carries_client_error() {
        let mut job = IngestionJob::new(IngestionRequest::new("/tmp/upload.zip", 10));
        job.fail(FailureReason::ZipBomb {
            detail: "entry 'a' compression ratio 900.0 exceeds 100".to_string(),
        })
        .unwrap();

        let value = serde_json::to_value(JobOutcome::new(&job, None)).unwrap();
        assert_eq!(value["error"]["code"], "ZIP_BOMB");
        assert_eq!(value["job"]["status"], "failed");
        assert!(value.get("report").is_none());
        assert!(!value.to_string().contains("900.0"));
    }

    #[test]
    fn infected_outcome_hides_threat_names() {
        let mut job = IngestionJob::new(IngestionRequest::new("/tmp/upload.zip", 10));
        job.advance(JobStatus::Scanning).unwrap();
        job.fail(FailureReason::Infected {
            threats: vec!["Win.Test.EICAR_HDB-1".to_string()],
        })
        .unwrap();

        let line = serde_json::to_string(&JobOutcome::new(&job, None)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["error"]["code"], "INFECTED");
        assert_eq!(value["job"]["status"], "failed");
        assert!(value["job"].get("failure_reason").is_none());
        assert!(!line.contains("EICAR"));
    }
}
