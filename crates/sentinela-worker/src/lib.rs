//! Sentinela Worker
//!
//! Drives archives through the pipeline: the [`Orchestrator`] owns job state
//! and runs the scan, extract and detect stages for one job; the
//! [`IngestionWorkerPool`] pulls jobs from a [`JobQueue`] and runs them with
//! bounded concurrency; the [`ProgressChannel`] forwards stage transitions to
//! observers.

pub mod orchestrator;
pub mod pool;
pub mod progress;
pub mod queue;

use std::sync::Arc;
use tokio::sync::RwLock;

use sentinela_detection::PatternRegistry;

pub use orchestrator::{Orchestrator, OrchestratorSettings, PipelineError};
pub use pool::IngestionWorkerPool;
pub use progress::{ProgressChannel, ProgressReceiver};
pub use queue::{Delivery, InMemoryJobQueue, JobQueue};

/// Pattern registry shared by all jobs. Writers (pattern administration)
/// take the lock exclusively; jobs read a snapshot.
pub type SharedRegistry = Arc<RwLock<PatternRegistry>>;

pub fn shared_registry(registry: PatternRegistry) -> SharedRegistry {
    Arc::new(RwLock::new(registry))
}
