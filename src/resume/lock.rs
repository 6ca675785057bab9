//! Run lock on the output root
//!
//! Advisory exclusive lock via fd-lock, held for the lifetime of a run so two
//! processes never write into the same archive tree.

use super::state::ResumeError;
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Lock filename under the output root
pub const LOCK_FILE_NAME: &str = ".prism-download.lock";

/// Exclusive lock on an output root; released on drop
pub struct RunLock {
    _lock: RwLock<File>,
    path: PathBuf,
}

impl std::fmt::Debug for RunLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLock").field("path", &self.path).finish()
    }
}

impl RunLock {
    /// Try to take the lock without blocking.
    ///
    /// Returns [`ResumeError::Locked`] when another run holds it.
    pub fn try_acquire(output_root: &Path) -> Result<Self, ResumeError> {
        std::fs::create_dir_all(output_root).map_err(|e| ResumeError::IoError(e.to_string()))?;

        let path = output_root.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| ResumeError::LockError(format!("Failed to open lock file: {e}")))?;

        let mut lock = RwLock::new(file);
        {
            let mut guard = match lock.try_write() {
                Ok(guard) => guard,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    return Err(ResumeError::Locked(path));
                }
                Err(e) => {
                    return Err(ResumeError::LockError(format!("Failed to acquire lock: {e}")));
                }
            };

            // Best effort: record the owner pid for humans inspecting the tree.
            let _ = guard.set_len(0);
            let _ = guard.seek(SeekFrom::Start(0));
            let _ = write!(*guard, "{}", std::process::id());

            // The OS lock is tied to the open file handle, not the guard; it stays held
            // until `_lock` is dropped and the handle closes.
            std::mem::forget(guard);
        }

        Ok(Self { _lock: lock, path })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}
