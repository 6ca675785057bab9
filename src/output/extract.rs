//! ZIP integrity checks and extraction
//!
//! Both functions are blocking; async callers run them via `spawn_blocking`.

use super::{OutputError, OutputResult};
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::ZipArchive;

/// Check that `reader` holds a readable, non-empty ZIP archive.
///
/// Returns the number of entries.
pub fn verify_archive<R: Read + Seek>(reader: R) -> OutputResult<usize> {
    let archive =
        ZipArchive::new(reader).map_err(|e| OutputError::InvalidArchive(e.to_string()))?;
    if archive.is_empty() {
        return Err(OutputError::InvalidArchive("archive has no entries".to_string()));
    }
    Ok(archive.len())
}

/// Unpack `archive_path` into its own directory.
///
/// Returns the extracted file paths.
pub fn extract_archive(archive_path: &Path) -> OutputResult<Vec<PathBuf>> {
    let dest = archive_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let file = File::open(archive_path).map_err(|e| {
        OutputError::IoError(format!("Failed to open {}: {}", archive_path.display(), e))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|e| OutputError::InvalidArchive(e.to_string()))?;

    let mut extracted = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| OutputError::InvalidArchive(e.to_string()))?;

        let relative = entry
            .enclosed_name()
            .ok_or_else(|| OutputError::UnsafeEntry(entry.name().to_string()))?;
        let out_path = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)
                .map_err(|e| OutputError::IoError(e.to_string()))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| OutputError::IoError(e.to_string()))?;
        }
        let mut out = File::create(&out_path).map_err(|e| {
            OutputError::IoError(format!("Failed to create {}: {}", out_path.display(), e))
        })?;
        std::io::copy(&mut entry, &mut out).map_err(|e| OutputError::IoError(e.to_string()))?;

        debug!(path = %out_path.display(), "extracted archive entry");
        extracted.push(out_path);
    }

    Ok(extracted)
}
