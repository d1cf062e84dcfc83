#![allow(dead_code)]

pub mod fixtures;
pub mod scanners;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

use sentinela_core::{Config, IngestionJob, IngestionRequest, ProgressEvent};
use sentinela_detection::PatternRegistry;
use sentinela_services::{JsonFileSink, VirusScanner};
use sentinela_worker::{shared_registry, Orchestrator, OrchestratorSettings, ProgressChannel};

/// Orchestrator wired to a temporary work dir, upload dir and JSON sink.
pub struct TestPipeline {
    pub orchestrator: Arc<Orchestrator>,
    pub progress: ProgressChannel,
    pub uploads: PathBuf,
    pub work_dir: PathBuf,
    pub results: PathBuf,
    pub _temp_dir: TempDir,
}

impl TestPipeline {
    /// Write a ZIP with `entries` into the upload dir and build its request.
    pub fn upload(&self, name: &str, entries: &[(&str, &[u8])]) -> IngestionRequest {
        let path = self.uploads.join(name);
        fixtures::write_zip(&path, entries);
        let size = std::fs::metadata(&path).unwrap().len();
        IngestionRequest::new(path, size)
    }

    pub fn upload_raw(&self, name: &str, bytes: &[u8]) -> IngestionRequest {
        let path = self.uploads.join(name);
        std::fs::write(&path, bytes).unwrap();
        IngestionRequest::new(path, bytes.len() as u64)
    }

    pub async fn admit_and_run(&self, request: IngestionRequest) -> IngestionJob {
        let job = self.orchestrator.admit(request).await.unwrap();
        self.orchestrator.run_job(job.id).await.unwrap()
    }

    /// Job workspaces still present below the work dir.
    pub fn leftover_workspaces(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.work_dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn result_file(&self, job: &IngestionJob) -> PathBuf {
        self.results.join(format!("{}.json", job.id))
    }
}

pub fn setup_pipeline(scanner: Arc<dyn VirusScanner>) -> TestPipeline {
    setup_pipeline_with(scanner, |_| {}, |orchestrator| orchestrator)
}

pub fn setup_pipeline_with(
    scanner: Arc<dyn VirusScanner>,
    configure: impl FnOnce(&mut OrchestratorSettings),
    extend: impl FnOnce(Orchestrator) -> Orchestrator,
) -> TestPipeline {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::with_work_dir(temp_dir.path().join("work"));
    std::fs::create_dir_all(&config.upload_dir).unwrap();
    let results = temp_dir.path().join("results");

    let mut settings = OrchestratorSettings::from_config(&config);
    // Uploads live below the work dir in the default layout; keep job
    // workspaces apart so they can be counted
    settings.work_dir = temp_dir.path().join("jobs");
    configure(&mut settings);

    let progress = ProgressChannel::new();
    let orchestrator = Orchestrator::new(
        scanner,
        shared_registry(PatternRegistry::new()),
        progress.clone(),
        settings.clone(),
    )
    .with_sink(Arc::new(JsonFileSink::new(&results)));

    TestPipeline {
        orchestrator: Arc::new(extend(orchestrator)),
        progress,
        uploads: config.upload_dir.clone(),
        work_dir: settings.work_dir,
        results,
        _temp_dir: temp_dir,
    }
}

/// Collect events until one with a terminal stage arrives.
pub async fn collect_until_terminal(
    rx: &mut UnboundedReceiver<ProgressEvent>,
) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for progress")
            .expect("progress channel closed");
        let terminal = event.stage.is_terminal();
        events.push(event);
        if terminal {
            return events;
        }
    }
}

pub fn assert_not_below(root: &Path, name: &str) {
    for entry in walk(root) {
        assert_ne!(
            entry.file_name().and_then(|n| n.to_str()),
            Some(name),
            "unexpected {} at {}",
            name,
            entry.display()
        );
    }
}

fn walk(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            found.push(path);
        }
    }
    found
}
