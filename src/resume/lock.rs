//! Exclusive lock for a resume directory
//!
//! Two runs sharing a resume directory would overwrite each other's budget
//! snapshot. Holding a [`RunLock`] for the duration of a run prevents that.

use super::state::ResumeError;
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Name of the lock file inside the resume directory
pub const RUN_LOCK_FILE: &str = "run.lock";

/// Advisory lock held while a collection run uses a resume directory
#[derive(Debug)]
pub struct RunLock {
    #[allow(dead_code)]
    lock: RwLock<File>,
    path: PathBuf,
}

impl RunLock {
    /// Acquire the lock, blocking until it is available.
    pub fn acquire(dir: &Path) -> Result<Self, ResumeError> {
        let (mut lock, path) = open(dir)?;
        let guard = lock
            .write()
            .map_err(|e| ResumeError::LockError(format!("Failed to acquire lock: {e}")))?;
        // keep the lock until the file is closed on drop
        std::mem::forget(guard);
        Ok(Self { lock, path })
    }

    /// Try to acquire the lock without blocking
    ///
    /// Returns an error immediately if another run holds it.
    pub fn try_acquire(dir: &Path) -> Result<Self, ResumeError> {
        let (mut lock, path) = open(dir)?;
        let guard = lock.try_write().map_err(|e| {
            ResumeError::LockError(format!(
                "Another run is using {}: {e}",
                dir.display()
            ))
        })?;
        std::mem::forget(guard);
        Ok(Self { lock, path })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open(dir: &Path) -> Result<(RwLock<File>, PathBuf), ResumeError> {
    std::fs::create_dir_all(dir).map_err(|e| ResumeError::IoError(e.to_string()))?;

    let path = dir.join(RUN_LOCK_FILE);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| ResumeError::LockError(format!("Failed to open lock file: {e}")))?;

    Ok((RwLock::new(file), path))
}
