use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use zip::result::ZipError;
use zip::ZipArchive;

use sentinela_core::{ExtractedFile, ExtractionLimits, FailureReason, JobStatus};

/// Bytes copied per read while streaming an entry to disk.
const COPY_CHUNK_BYTES: usize = 64 * 1024;

/// Unix file-type bits marking a symbolic link.
const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Zip bomb detected: {0}")]
    ZipBomb(String),

    #[error("Path traversal in archive entry: {entry}")]
    PathTraversal { entry: String },

    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("Extraction I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractionError {
    /// Client-safe failure recorded on the job.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            ExtractionError::ZipBomb(detail) => FailureReason::ZipBomb {
                detail: detail.clone(),
            },
            ExtractionError::PathTraversal { entry } => FailureReason::PathTraversal {
                entry: entry.clone(),
            },
            ExtractionError::CorruptArchive(_) => FailureReason::CorruptArchive,
            ExtractionError::Io(_) => FailureReason::InternalError {
                stage: JobStatus::Extracting,
            },
        }
    }
}

impl From<ZipError> for ExtractionError {
    fn from(err: ZipError) -> Self {
        ExtractionError::CorruptArchive(err.to_string())
    }
}

/// Normalizes an entry name into a root-relative path.
///
/// `.` segments and `..` segments that stay inside the root are folded;
/// absolute names, drive prefixes and `..` escaping the root are rejected.
/// Returns `Ok(None)` for names that normalize to the root itself.
pub fn normalize_entry_name(name: &str) -> Result<Option<PathBuf>, ExtractionError> {
    let traversal = || ExtractionError::PathTraversal {
        entry: name.to_string(),
    };

    if name.contains('\0') {
        return Err(traversal());
    }
    let unified = name.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(traversal());
    }
    let mut chars = unified.chars();
    if let (Some(drive), Some(':')) = (chars.next(), chars.next()) {
        if drive.is_ascii_alphabetic() {
            return Err(traversal());
        }
    }

    let mut parts: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(traversal());
                }
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Ok(None);
    }

    let relative: PathBuf = parts.iter().collect();
    // A segment the platform still reads as a root or prefix
    if !relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
    {
        return Err(traversal());
    }
    Ok(Some(relative))
}

/// Streams ZIP archives into a sandboxed directory under resource ceilings.
#[derive(Debug, Clone, Default)]
pub struct ArchiveExtractor;

impl ArchiveExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract `archive_path` below `dest_root`.
    ///
    /// Blocking. Entries are written to a staging directory inside
    /// `dest_root` that is promoted only once every entry passed; on any
    /// error the staging directory is removed and `dest_root` is left as it
    /// was.
    #[tracing::instrument(skip(self, limits), fields(archive = %archive_path.display()))]
    pub fn extract(
        &self,
        archive_path: &Path,
        dest_root: &Path,
        limits: &ExtractionLimits,
    ) -> Result<Vec<ExtractedFile>, ExtractionError> {
        let start = Instant::now();
        let file = File::open(archive_path)
            .map_err(|e| ExtractionError::CorruptArchive(format!("cannot open archive: {}", e)))?;
        let mut archive = ZipArchive::new(file)?;

        if archive.len() > limits.max_entries {
            return Err(ExtractionError::ZipBomb(format!(
                "{} entries exceeds limit of {}",
                archive.len(),
                limits.max_entries
            )));
        }

        fs::create_dir_all(dest_root)?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(dest_root)?;

        let staged = self.extract_entries(&mut archive, staging.path(), limits)?;

        let mut files = Vec::with_capacity(staged.len());
        promote(staging.path(), dest_root)?;
        for (relative_path, size_bytes) in staged {
            files.push(ExtractedFile {
                path: dest_root.join(&relative_path),
                relative_path,
                size_bytes,
            });
        }

        tracing::info!(
            files = files.len(),
            total_bytes = files.iter().map(|f| f.size_bytes).sum::<u64>(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Archive extracted"
        );
        Ok(files)
    }

    fn extract_entries<R: Read + Seek>(
        &self,
        archive: &mut ZipArchive<R>,
        staging: &Path,
        limits: &ExtractionLimits,
    ) -> Result<Vec<(PathBuf, u64)>, ExtractionError> {
        let mut total_bytes: u64 = 0;
        let mut staged: Vec<(PathBuf, u64)> = Vec::new();
        let mut buffer = vec![0u8; COPY_CHUNK_BYTES];

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            let name = entry.name().to_string();

            let Some(relative) = normalize_entry_name(&name)? else {
                continue;
            };

            if entry
                .unix_mode()
                .is_some_and(|mode| mode & S_IFMT == S_IFLNK)
            {
                tracing::warn!(entry = %name, "Skipping symlink entry");
                continue;
            }

            let target = staging.join(&relative);
            if entry.is_dir() {
                check_layout(staging, &relative, &name, true)?;
                fs::create_dir_all(&target)?;
                continue;
            }

            // Declared sizes first; the copy loop re-checks actual bytes.
            let declared = entry.size();
            let compressed = entry.compressed_size();
            if declared > limits.max_entry_bytes {
                return Err(ExtractionError::ZipBomb(format!(
                    "entry '{}' declares {} bytes, limit {}",
                    name, declared, limits.max_entry_bytes
                )));
            }
            if total_bytes.saturating_add(declared) > limits.max_total_bytes {
                return Err(ExtractionError::ZipBomb(format!(
                    "archive exceeds {} uncompressed bytes",
                    limits.max_total_bytes
                )));
            }
            check_ratio(&name, declared, compressed, limits)?;

            if staged.iter().any(|(existing, _)| existing == &relative) {
                tracing::warn!(entry = %name, "Skipping duplicate entry");
                continue;
            }
            check_layout(staging, &relative, &name, false)?;

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)?;

            let mut written: u64 = 0;
            loop {
                let n = entry
                    .read(&mut buffer)
                    .map_err(|e| ExtractionError::CorruptArchive(format!("{}: {}", name, e)))?;
                if n == 0 {
                    break;
                }
                written += n as u64;
                if written > limits.max_entry_bytes {
                    return Err(ExtractionError::ZipBomb(format!(
                        "entry '{}' exceeds {} bytes",
                        name, limits.max_entry_bytes
                    )));
                }
                if total_bytes + written > limits.max_total_bytes {
                    return Err(ExtractionError::ZipBomb(format!(
                        "archive exceeds {} uncompressed bytes",
                        limits.max_total_bytes
                    )));
                }
                check_ratio(&name, written, compressed, limits)?;
                out.write_all(&buffer[..n])?;
            }
            out.flush()?;

            total_bytes += written;
            staged.push((relative, written));
        }

        Ok(staged)
    }
}

fn check_ratio(
    name: &str,
    uncompressed: u64,
    compressed: u64,
    limits: &ExtractionLimits,
) -> Result<(), ExtractionError> {
    if uncompressed == 0 {
        return Ok(());
    }
    let ratio = if compressed == 0 {
        f64::INFINITY
    } else {
        uncompressed as f64 / compressed as f64
    };
    if ratio > limits.max_compression_ratio {
        return Err(ExtractionError::ZipBomb(format!(
            "entry '{}' compression ratio {:.1} exceeds {}",
            name, ratio, limits.max_compression_ratio
        )));
    }
    Ok(())
}

/// Rejects an entry whose path needs a file as a directory or a directory
/// as a file, given what earlier entries already staged.
fn check_layout(
    staging: &Path,
    relative: &Path,
    name: &str,
    is_dir: bool,
) -> Result<(), ExtractionError> {
    let components: Vec<Component<'_>> = relative.components().collect();
    let mut current = staging.to_path_buf();
    for (index, component) in components.iter().enumerate() {
        current.push(component);
        let metadata = match fs::symlink_metadata(&current) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let is_last = index + 1 == components.len();
        let conflict = if is_last && !is_dir {
            metadata.is_dir()
        } else {
            !metadata.is_dir()
        };
        if conflict {
            return Err(ExtractionError::CorruptArchive(format!(
                "entry '{}' collides with an earlier file or directory",
                name
            )));
        }
    }
    Ok(())
}

/// Moves the staged top-level entries into `dest_root`.
///
/// Entries already moved are removed again if a later one fails, so
/// `dest_root` keeps only what it held before.
fn promote(staging: &Path, dest_root: &Path) -> Result<(), ExtractionError> {
    let mut promoted: Vec<PathBuf> = Vec::new();
    let result = promote_children(staging, dest_root, &mut promoted);
    if result.is_err() {
        for path in promoted.iter().rev() {
            let removed = if path.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };
            if let Err(e) = removed {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to roll back promoted entry"
                );
            }
        }
    }
    result
}

fn promote_children(
    staging: &Path,
    dest_root: &Path,
    promoted: &mut Vec<PathBuf>,
) -> Result<(), ExtractionError> {
    for child in fs::read_dir(staging)? {
        let child = child?;
        let destination = dest_root.join(child.file_name());
        if destination.exists() {
            return Err(ExtractionError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", destination.display()),
            )));
        }
        fs::rename(child.path(), &destination)?;
        promoted.push(destination);
    }
    Ok(())
}
