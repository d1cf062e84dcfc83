//! Sentinela Detection
//!
//! Finds Brazilian PII in extracted archive content. Patterns live in an
//! injected [`PatternRegistry`]; candidates are confirmed by the checksum and
//! structural checks in [`validators`] and scored by a [`SeverityTable`].

pub mod engine;
pub mod patterns;
pub mod risk;
pub mod validators;

pub use engine::{DetectionEngine, DetectionError, BINARY_SNIFF_BYTES};
pub use patterns::{
    BuiltinValidator, DetectionPattern, PatternRegistry, PatternSpec, RegistryError, Validator,
};
pub use risk::SeverityTable;
