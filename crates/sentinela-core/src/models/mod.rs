//! Data models for the pipeline
//!
//! Each sub-module holds the values produced or consumed by one stage.
//! Stage outputs are immutable values; only [`IngestionJob`] carries state
//! that changes over time, and only the orchestrator changes it.

mod archive;
mod detection;
mod job;
mod progress;
mod scan;

pub use archive::*;
pub use detection::*;
pub use job::*;
pub use progress::*;
pub use scan::*;
