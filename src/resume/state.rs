//! Download manifest persistence
//!
//! The manifest lives at `<output_root>/.prism-manifest.json` and records every archive
//! this tool committed: its size, SHA-256 and completion time. The resume filter uses
//! it to tell a finished download apart from a file that was truncated or replaced
//! behind our back.
//!
//! Saves are atomic (temp file, fsync, rename, fsync of the directory). Callers hold the
//! run lock for the whole run, so no per-save locking is done here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Manifest filename under the output root
pub const MANIFEST_FILE_NAME: &str = ".prism-manifest.json";

/// Current manifest schema version
const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum manifest size accepted on load (64 MB)
pub const MAX_MANIFEST_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// One committed archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// File size in bytes
    pub bytes: u64,
    /// Lowercase hex SHA-256 of the file
    pub sha256: String,
    /// When the file was committed
    pub completed_at: DateTime<Utc>,
}

/// Persistent record of committed archives, keyed by path relative to the output root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadManifest {
    schema_version: String,
    entries: BTreeMap<String, ManifestEntry>,
    updated_at: DateTime<Utc>,
}

impl Default for DownloadManifest {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadManifest {
    /// Create an empty manifest
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            entries: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Manifest location for an output root
    pub fn path_for(output_root: &Path) -> PathBuf {
        output_root.join(MANIFEST_FILE_NAME)
    }

    /// Manifest key for `path`: the `/`-joined path relative to `output_root`
    pub fn relative_key(output_root: &Path, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(output_root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Option<_>>()?;
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }

    /// Look up an entry
    pub fn get(&self, key: &str) -> Option<&ManifestEntry> {
        self.entries.get(key)
    }

    /// Insert or replace an entry
    pub fn record(&mut self, key: String, entry: ManifestEntry) {
        self.entries.insert(key, entry);
        self.updated_at = Utc::now();
    }

    /// Drop an entry, returning it if present
    pub fn remove(&mut self, key: &str) -> Option<ManifestEntry> {
        self.entries.remove(key)
    }

    /// Number of recorded archives
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in key order
    pub fn entries(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.entries.iter()
    }

    /// Save atomically to `path`
    pub fn save(&self, path: &Path) -> Result<(), ResumeError> {
        debug!(path = %path.display(), entries = self.entries.len(), "Saving download manifest");

        let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent_dir).map_err(|e| ResumeError::IoError(e.to_string()))?;

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ResumeError::SerializationError(e.to_string()))?;

        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| ResumeError::IoError(format!("Failed to create temp file: {e}")))?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| ResumeError::IoError(format!("Failed to write to temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| ResumeError::IoError(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| ResumeError::IoError(format!("Failed to sync temp file: {e}")))?;
        temp_file
            .persist(path)
            .map_err(|e| ResumeError::IoError(format!("Failed to persist temp file: {e}")))?;

        sync_directory(parent_dir);

        info!(path = %path.display(), entries = self.entries.len(), "Download manifest saved");
        Ok(())
    }

    /// Load from `path`, validating size and schema version
    pub fn load(path: &Path) -> Result<Self, ResumeError> {
        let metadata = std::fs::metadata(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        if metadata.len() > MAX_MANIFEST_FILE_SIZE {
            return Err(ResumeError::StateTooLarge {
                size: metadata.len(),
                max: MAX_MANIFEST_FILE_SIZE,
            });
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        let manifest: DownloadManifest = serde_json::from_str(&contents)
            .map_err(|e| ResumeError::DeserializationError(e.to_string()))?;

        if manifest.schema_version != SCHEMA_VERSION {
            return Err(ResumeError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: manifest.schema_version,
            });
        }

        debug!(path = %path.display(), entries = manifest.entries.len(), "Download manifest loaded");
        Ok(manifest)
    }

    /// Load from `path`, starting empty when the file is missing or unusable
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::new();
        }
        match Self::load(path) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Ignoring unusable download manifest; existing files are trusted by size only"
                );
                Self::new()
            }
        }
    }
}

/// Fsync a directory so a rename inside it is durable
pub(crate) fn sync_directory(dir: &Path) {
    if let Ok(handle) = std::fs::File::open(dir) {
        let _ = handle.sync_all();
    }
}

/// Errors related to resume state
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// Another run holds the output root
    #[error("output directory is locked by another run: {}", .0.display())]
    Locked(PathBuf),

    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// Manifest file too large
    #[error("manifest file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),
}
