//! Local archive layout and post-download archive handling

pub mod extract;
pub mod path;

pub use extract::{extract_archive, verify_archive};
pub use path::{archive_file_name, TargetPathBuilder};

/// Prefix of in-progress download files
pub const TEMP_PREFIX: &str = ".prism-";

/// Suffix of in-progress download files
pub const TEMP_SUFFIX: &str = ".part";

/// Whether a filename belongs to an in-progress (or abandoned) download
pub fn is_temp_artifact(file_name: &str) -> bool {
    file_name.starts_with(TEMP_PREFIX) && file_name.ends_with(TEMP_SUFFIX)
}

/// Archive handling errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// The file is not a readable ZIP archive
    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    /// An entry would be written outside the extraction directory
    #[error("unsafe archive entry: {0}")]
    UnsafeEntry(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
