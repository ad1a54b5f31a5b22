//! Run state persistence
//!
//! Keeps what a later run needs to know about earlier ones: today's budget
//! consumption, the cells that failed, and the last summary. The optional
//! response cache snapshot lives in its own file. Both are written atomically
//! under an advisory lock.

use crate::collector::budget::{BudgetState, RequestBudget};
use crate::collector::cache::{CacheEntry, ResponseCache};
use crate::collector::cell::CellKey;
use crate::collector::summary::{FailedCell, RunSummary};
use fd_lock::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

/// Current run state schema version
const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum allowed state file size (10 MB) to prevent memory exhaustion
pub const MAX_STATE_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum allowed cache snapshot size (256 MB)
pub const MAX_CACHE_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// State carried between collection runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    schema_version: String,
    budgets: Vec<BudgetState>,
    failed_cells: Vec<FailedCell>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_summary: Option<RunSummary>,
    created_at: i64,
    updated_at: i64,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    /// Create an empty run state
    pub fn new() -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            budgets: Vec::new(),
            failed_cells: Vec::new(),
            last_summary: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Budget snapshot of the last run
    pub fn budgets(&self) -> &[BudgetState] {
        &self.budgets
    }

    /// Cells that failed in the last run
    pub fn failed_cells(&self) -> &[FailedCell] {
        &self.failed_cells
    }

    /// Keys of the failed cells, for re-running just those
    pub fn failed_cell_keys(&self) -> HashSet<CellKey> {
        self.failed_cells.iter().map(|f| f.cell.clone()).collect()
    }

    /// Summary of the last run
    pub fn last_summary(&self) -> Option<&RunSummary> {
        self.last_summary.as_ref()
    }

    /// Last update, in milliseconds since the epoch
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Record the outcome of a run.
    ///
    /// Failures are merged: cells done in this run leave the list, cells that
    /// failed again take their new reason, and cells the run never reached stay.
    pub fn record_run(&mut self, budget: &RequestBudget, summary: &RunSummary) {
        self.budgets = budget.snapshot();

        let settled: HashSet<&CellKey> = summary
            .completed
            .iter()
            .chain(summary.failures.iter().map(|f| &f.cell))
            .collect();
        self.failed_cells.retain(|f| !settled.contains(&f.cell));
        self.failed_cells.extend(summary.failures.iter().cloned());

        self.last_summary = Some(summary.clone());
        self.updated_at = chrono::Utc::now().timestamp_millis();

        debug!(
            budgets = self.budgets.len(),
            failed_cells = self.failed_cells.len(),
            "Recorded run outcome"
        );
    }

    /// Validate schema version (accepts current version only)
    pub fn validate_schema_version(&self) -> Result<(), ResumeError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ResumeError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: self.schema_version.clone(),
            });
        }
        Ok(())
    }

    /// Save state to file with atomic writes and file locking
    pub fn save(&self, path: &Path) -> Result<(), ResumeError> {
        write_json_atomic(path, self)?;
        info!(
            path = %path.display(),
            failed_cells = self.failed_cells.len(),
            "Run state saved successfully"
        );
        Ok(())
    }

    /// Load state from file with locking
    pub fn load(path: &Path) -> Result<Self, ResumeError> {
        let state: RunState = read_json_locked(path, MAX_STATE_FILE_SIZE)?;

        if let Err(e) = state.validate_schema_version() {
            warn!(
                found_version = %state.schema_version,
                expected_version = SCHEMA_VERSION,
                "Run state schema version mismatch"
            );
            return Err(e);
        }

        info!(
            failed_cells = state.failed_cells.len(),
            budgets = state.budgets.len(),
            "Run state loaded successfully"
        );
        Ok(state)
    }

    /// Load state if the file exists, otherwise start fresh
    pub fn load_or_new(path: &Path) -> Result<Self, ResumeError> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!(path = %path.display(), "No run state found, starting fresh");
            Ok(Self::new())
        }
    }
}

/// Persisted response cache
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheSnapshot {
    schema_version: String,
    entries: Vec<CacheEntry>,
}

/// Write every cache entry to `path`
pub fn save_cache(path: &Path, cache: &ResponseCache) -> Result<usize, ResumeError> {
    let snapshot = CacheSnapshot {
        schema_version: SCHEMA_VERSION.to_string(),
        entries: cache.snapshot(),
    };
    write_json_atomic(path, &snapshot)?;
    info!(
        path = %path.display(),
        entries = snapshot.entries.len(),
        "Response cache saved"
    );
    Ok(snapshot.entries.len())
}

/// Seed `cache` from `path`. A missing file seeds nothing.
pub fn load_cache(path: &Path, cache: &ResponseCache) -> Result<usize, ResumeError> {
    if !path.exists() {
        return Ok(0);
    }

    let snapshot: CacheSnapshot = read_json_locked(path, MAX_CACHE_FILE_SIZE)?;
    if snapshot.schema_version != SCHEMA_VERSION {
        return Err(ResumeError::SchemaVersionMismatch {
            expected: SCHEMA_VERSION.to_string(),
            found: snapshot.schema_version,
        });
    }

    let added = cache
        .seed(snapshot.entries)
        .map_err(|e| ResumeError::DeserializationError(format!("Corrupt cache snapshot: {e}")))?;
    info!(path = %path.display(), entries = added, "Response cache seeded");
    Ok(added)
}

/// Serialize `value` and atomically replace `path` with it
///
/// Uses tempfile::NamedTempFile for the atomic rename and fd-lock for
/// concurrency safety.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ResumeError> {
    debug!(path = %path.display(), "Saving JSON state");

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;
    }

    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ResumeError::SerializationError(e.to_string()))?;

    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path.with_extension("lock"))
        .map_err(|e| ResumeError::LockError(format!("Failed to create lock file: {e}")))?;

    let mut lock = RwLock::new(lock_file);
    let _guard = lock
        .write()
        .map_err(|e| ResumeError::LockError(format!("Failed to acquire write lock: {e}")))?;

    let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
        .map_err(|e| ResumeError::IoError(format!("Failed to create temp file: {e}")))?;

    temp_file
        .write_all(json.as_bytes())
        .map_err(|e| ResumeError::IoError(format!("Failed to write to temp file: {e}")))?;

    // Flush and sync before the rename so the new file is complete on disk
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

    if let Some(parent) = path.parent() {
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// Read and deserialize `path` under a shared lock, refusing files over `max_size`
fn read_json_locked<T: DeserializeOwned>(path: &Path, max_size: u64) -> Result<T, ResumeError> {
    debug!(path = %path.display(), "Loading JSON state");

    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path.with_extension("lock"))
        .map_err(|e| ResumeError::LockError(format!("Failed to create lock file: {e}")))?;

    let lock = RwLock::new(lock_file);
    let _guard = lock
        .read()
        .map_err(|e| ResumeError::LockError(format!("Failed to acquire read lock: {e}")))?;

    let metadata = std::fs::metadata(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
    if metadata.len() > max_size {
        return Err(ResumeError::StateTooLarge {
            size: metadata.len(),
            max: max_size,
        });
    }

    let contents =
        std::fs::read_to_string(path).map_err(|e| ResumeError::IoError(e.to_string()))?;

    serde_json::from_str(&contents).map_err(|e| {
        warn!(error = %e, "Failed to deserialize state file");
        ResumeError::DeserializationError(e.to_string())
    })
}

/// Errors related to persisted run state
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// State file too large
    #[error("state file too large: {size} bytes (max: {max} bytes)")]
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
