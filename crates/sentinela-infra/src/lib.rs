//! Sentinela Infrastructure Library
//!
//! Shared infrastructure for the Sentinela binaries:
//! - Telemetry initialization (tracing subscriber, human or JSON output)
//! - Client-facing error bodies for failed jobs

pub mod error;
pub mod telemetry;

pub use error::ErrorResponse;
pub use telemetry::{init_telemetry, LogFormat};
