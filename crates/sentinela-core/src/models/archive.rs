use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default ceiling on the sum of uncompressed entry sizes (1 GiB).
pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 1024 * 1024 * 1024;
/// Default ceiling on a single uncompressed entry (100 MiB).
pub const DEFAULT_MAX_ENTRY_BYTES: u64 = 100 * 1024 * 1024;
/// Default ceiling on uncompressed/compressed size for one entry.
pub const DEFAULT_MAX_COMPRESSION_RATIO: f64 = 100.0;
/// Default ceiling on the number of entries in one archive.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Resource ceilings applied while extracting an untrusted archive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtractionLimits {
    pub max_total_bytes: u64,
    pub max_entry_bytes: u64,
    pub max_compression_ratio: f64,
    pub max_entries: usize,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self {
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            max_compression_ratio: DEFAULT_MAX_COMPRESSION_RATIO,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// A regular file pulled out of an archive.
///
/// `path` points inside the job's extraction workspace; the file lives as
/// long as that workspace does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFile {
    /// Sanitized, archive-root-relative path without `..` segments
    pub relative_path: PathBuf,
    /// Location of the content on disk
    pub path: PathBuf,
    pub size_bytes: u64,
}
