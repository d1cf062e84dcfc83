//! Sentinela Core Library
//!
//! This crate provides the domain models, error taxonomy and configuration
//! shared by every stage of the ingestion pipeline (scan, extract, detect)
//! and by the worker that orchestrates them.

pub mod config;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use config::{Config, EnrichmentConfig, ScanConfig, ScanEngineKind, WorkerConfig};
pub use error::{ErrorMetadata, FailureReason, JobStateError, LogLevel};
pub use models::{
    Detection, DetectionReport, EnrichmentResult, ExtractedFile, ExtractionLimits,
    IngestionJob, IngestionRequest, JobStatus, PatternCategory, ProgressEvent, RiskLevel,
    ScanVerdict,
};
