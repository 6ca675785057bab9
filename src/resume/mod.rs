//! Resume capability for bulk downloads
//!
//! A run is resumable because every committed archive is a complete file at its final
//! path, and nothing else ever is. The [`ResumeFilter`] partitions a catalog into
//! targets that are already satisfied on disk and targets that still need fetching.
//! When the [`DownloadManifest`] knows a file, its recorded size (and optionally its
//! SHA-256) must match as well.

pub mod lock;
pub mod state;

pub use lock::{RunLock, LOCK_FILE_NAME};
pub use state::{DownloadManifest, ManifestEntry, ResumeError, MANIFEST_FILE_NAME};

use crate::catalog::RetrievalTarget;
use crate::downloader::config::MIN_FILE_SIZE;
use crate::output::is_temp_artifact;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Result of filtering a catalog against the local tree
#[derive(Debug, Default)]
pub struct ResumePartition {
    /// Targets that still need fetching, in catalog order
    pub pending: Vec<RetrievalTarget>,
    /// Targets already satisfied on disk, in catalog order
    pub skipped: Vec<RetrievalTarget>,
}

/// Decides which targets are already present locally
#[derive(Debug)]
pub struct ResumeFilter {
    output_root: PathBuf,
    manifest: DownloadManifest,
    min_file_size: u64,
    verify_checksums: bool,
}

impl ResumeFilter {
    /// Create a filter over `output_root` using `manifest` for verification
    pub fn new(output_root: impl Into<PathBuf>, manifest: DownloadManifest) -> Self {
        Self {
            output_root: output_root.into(),
            manifest,
            min_file_size: MIN_FILE_SIZE,
            verify_checksums: false,
        }
    }

    /// Minimum size for an existing file to count as present
    pub fn with_min_file_size(mut self, min_file_size: u64) -> Self {
        self.min_file_size = min_file_size;
        self
    }

    /// Re-hash files the manifest knows and compare checksums
    pub fn with_checksum_verification(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Hand the manifest back (entries for files found invalid are removed)
    pub fn into_manifest(self) -> DownloadManifest {
        self.manifest
    }

    /// Split `targets` into pending and skipped, preserving order.
    ///
    /// Blocking: touches the filesystem and may hash files.
    pub fn partition(&mut self, targets: Vec<RetrievalTarget>) -> ResumePartition {
        let mut partition = ResumePartition::default();
        for target in targets {
            if self.is_satisfied(&target) {
                partition.skipped.push(target);
            } else {
                partition.pending.push(target);
            }
        }
        debug!(
            pending = partition.pending.len(),
            skipped = partition.skipped.len(),
            "Resume filter partitioned catalog"
        );
        partition
    }

    /// Whether `target` already has a valid file at its local path
    pub fn is_satisfied(&mut self, target: &RetrievalTarget) -> bool {
        let metadata = match std::fs::metadata(&target.local_path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return false,
            Err(e) => {
                warn!(path = %target.local_path.display(), error = %e, "Cannot stat existing file; treating as missing");
                return false;
            }
        };

        if !metadata.is_file() || metadata.len() < self.min_file_size {
            return false;
        }

        let Some(key) = DownloadManifest::relative_key(&self.output_root, &target.local_path) else {
            return true;
        };
        let Some(entry) = self.manifest.get(&key) else {
            // Files from earlier tools or runs without a manifest are trusted by size.
            return true;
        };

        if entry.bytes != metadata.len() {
            warn!(
                target = %target,
                expected = entry.bytes,
                actual = metadata.len(),
                "Local file size differs from manifest; scheduling re-download"
            );
            self.manifest.remove(&key);
            return false;
        }

        if self.verify_checksums {
            match file_sha256(&target.local_path) {
                Ok(actual) if actual == entry.sha256 => {}
                Ok(actual) => {
                    warn!(
                        target = %target,
                        expected = %entry.sha256,
                        actual = %actual,
                        "Local file checksum differs from manifest; scheduling re-download"
                    );
                    self.manifest.remove(&key);
                    return false;
                }
                Err(e) => {
                    warn!(target = %target, error = %e, "Cannot hash local file; scheduling re-download");
                    return false;
                }
            }
        }

        true
    }
}

/// Remove abandoned `.prism-*.part` files from the directories `targets` write into.
///
/// Returns the number of files removed. Must only run while holding the [`RunLock`].
pub fn sweep_temp_files(targets: &[RetrievalTarget]) -> usize {
    let dirs: BTreeSet<&Path> = targets
        .iter()
        .filter_map(|t| t.local_path.parent())
        .collect();

    let mut removed = 0;
    for dir in dirs {
        let Ok(entries) = std::fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !is_temp_artifact(&name.to_string_lossy()) {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to remove stale temp file"),
            }
        }
    }

    if removed > 0 {
        debug!(removed, "Swept stale temp files");
    }
    removed
}

/// Lowercase hex SHA-256 of a file's contents
pub fn file_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
