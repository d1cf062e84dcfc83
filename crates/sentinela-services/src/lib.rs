//! Sentinela Services Layer
//!
//! Stage implementations and external collaborators used by the worker:
//! the antivirus scan gateways, the sandboxed ZIP extractor, the optional
//! semantic risk enrichment client and the sinks that receive finished
//! detection reports.

pub mod archive;
pub mod enrichment;
pub mod scanner;
pub mod sink;

pub use archive::{ArchiveExtractor, ExtractionError};
#[cfg(feature = "enrichment")]
pub use enrichment::HttpRiskEnricher;
pub use enrichment::RiskEnricher;
#[cfg(feature = "clamd")]
pub use scanner::ClamdScanGateway;
pub use scanner::{ProcessScanGateway, ScanError, VirusScanner};
pub use sink::{DetectionSink, JsonFileSink, NoopSink};
