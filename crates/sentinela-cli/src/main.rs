//! Sentinela CLI: archive malware gate and Brazilian PII detection.
//!
//! Configuration comes from the environment (and `.env`); see
//! `sentinela_core::Config::from_env`. Results and progress are printed to
//! stdout as JSON lines, logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use uuid::Uuid;

use sentinela_cli::{
    build_orchestrator, load_registry, pattern_summaries, print_json_line, JobOutcome,
    ProgressLine,
};
use sentinela_core::{Config, IngestionRequest, JobStatus};
use sentinela_detection::BuiltinValidator;
use sentinela_infra::{init_telemetry, ErrorResponse, LogFormat};
use sentinela_worker::{
    InMemoryJobQueue, IngestionWorkerPool, Orchestrator, PipelineError, ProgressReceiver,
};

/// Exit code for archives that were rejected or failed in the pipeline.
const EXIT_REJECTED: u8 = 2;

#[derive(Parser)]
#[command(name = "sentinela", about = "Archive malware gate and Brazilian PII detection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan, extract and inspect one ZIP archive
    Scan {
        /// Path to the archive
        archive: PathBuf,
        /// Size declared by the uploader; defaults to the size on disk
        #[arg(long)]
        declared_size: Option<u64>,
        /// Do not print progress events
        #[arg(long)]
        quiet: bool,
    },
    /// Run the worker pool on `{"path": .., "declared_size": ..}` lines from stdin
    Worker,
    /// List the detection patterns
    Patterns,
    /// Run a validator against a value
    Check {
        /// Validator id: cpf, cnpj, pis_pasep, voter_id, phone, cep, brazilian_name
        validator: String,
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    init_telemetry(LogFormat::from_env())?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            archive,
            declared_size,
            quiet,
        } => run_scan(archive, declared_size, quiet).await,
        Commands::Worker => run_worker().await,
        Commands::Patterns => {
            let config = Config::from_env().context("Failed to load configuration")?;
            let registry = load_registry(config.custom_patterns_path.as_deref())?;
            for summary in pattern_summaries(&registry) {
                print_json_line(&summary)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check { validator, value } => {
            let validator: BuiltinValidator = validator.parse()?;
            let valid = validator.check(&value);
            print_json_line(&json!({
                "validator": validator.id(),
                "value": value,
                "valid": valid,
            }))?;
            Ok(if valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

async fn run_scan(archive: PathBuf, declared_size: Option<u64>, quiet: bool) -> Result<ExitCode> {
    let mut config = Config::from_env().context("Failed to load configuration")?;
    let archive = tokio::fs::canonicalize(&archive)
        .await
        .with_context(|| format!("Archive not found: {}", archive.display()))?;
    // The operator named this file explicitly, so its directory may be scanned
    if let Some(parent) = archive.parent() {
        config.scan.allowed_roots.push(parent.to_path_buf());
    }
    let declared_size = match declared_size {
        Some(size) => size,
        None => tokio::fs::metadata(&archive)
            .await
            .with_context(|| format!("Failed to stat {}", archive.display()))?
            .len(),
    };

    let orchestrator = build_orchestrator(&config, Default::default())?;
    let printer = (!quiet).then(|| spawn_progress_printer(orchestrator.progress().subscribe()));

    let job = match orchestrator
        .admit(IngestionRequest::new(&archive, declared_size))
        .await
    {
        Ok(job) => job,
        Err(PipelineError::Rejected(reason)) => {
            print_json_line(&json!({
                "path": archive,
                "error": ErrorResponse::from(&reason),
            }))?;
            return Ok(ExitCode::from(EXIT_REJECTED));
        }
        Err(e) => return Err(e.into()),
    };

    let job = orchestrator.run_job(job.id).await?;
    let report = orchestrator.report(job.id).await;

    // Closing the channel ends the printer once it drained every event
    drop(orchestrator);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    print_json_line(&JobOutcome::new(&job, report.as_ref()))?;
    Ok(if job.status == JobStatus::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_REJECTED)
    })
}

async fn run_worker() -> Result<ExitCode> {
    let config = Config::from_env().context("Failed to load configuration")?;
    let orchestrator = Arc::new(build_orchestrator(&config, Default::default())?);
    let printer = spawn_progress_printer(orchestrator.progress().subscribe());
    let pool = IngestionWorkerPool::start(
        orchestrator.clone(),
        Arc::new(InMemoryJobQueue::new()),
        config.worker.clone(),
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut submitted = Vec::new();
    let mut interrupted = false;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read request from stdin")? {
                    Some(line) => {
                        if let Some(job_id) = submit_line(&pool, &line).await {
                            submitted.push(job_id);
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received, stopping intake");
                interrupted = true;
                break;
            }
        }
    }

    if !interrupted {
        wait_for_jobs(&orchestrator, &submitted, config.worker.poll_interval_ms).await;
    }
    pool.shutdown().await;

    drop(orchestrator);
    let _ = printer.await;
    Ok(ExitCode::SUCCESS)
}

async fn submit_line(pool: &IngestionWorkerPool, line: &str) -> Option<Uuid> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let request: IngestionRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed request line");
            return None;
        }
    };
    let path = request.path.clone();

    match pool.submit(request).await {
        Ok(job) => Some(job.id),
        Err(e) => {
            match e.downcast_ref::<PipelineError>() {
                Some(PipelineError::Rejected(reason)) => {
                    let rejection = json!({ "path": path, "error": ErrorResponse::from(reason) });
                    if let Err(e) = print_json_line(&rejection) {
                        tracing::error!(error = %e, "Failed to print rejection");
                    }
                }
                _ => tracing::error!(error = %e, path = %path.display(), "Failed to submit job"),
            }
            None
        }
    }
}

/// Stdin is closed; let the pool finish what was submitted.
async fn wait_for_jobs(orchestrator: &Orchestrator, job_ids: &[Uuid], poll_interval_ms: u64) {
    let poll_interval = Duration::from_millis(poll_interval_ms);
    for job_id in job_ids {
        while orchestrator
            .job(*job_id)
            .await
            .is_some_and(|job| !job.is_terminal())
        {
            tokio::time::sleep(poll_interval).await;
        }
    }
}

fn spawn_progress_printer(mut rx: ProgressReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = print_json_line(&ProgressLine { progress: &event }) {
                tracing::warn!(error = %e, "Failed to print progress event");
            }
        }
    })
}
