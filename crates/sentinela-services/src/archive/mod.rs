//! Sandboxed ZIP extraction.

mod extractor;

pub use extractor::{normalize_entry_name, ArchiveExtractor, ExtractionError};
