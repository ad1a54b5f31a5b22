//! Persisted run state
//!
//! Budget snapshot, failed cells and an optional response cache snapshot, stored
//! in a resume directory with atomic writes and file locking.

use std::path::{Path, PathBuf};

pub mod lock;
pub mod state;

pub use lock::RunLock;
pub use state::{load_cache, save_cache, ResumeError, RunState};

/// Run state file name
pub const STATE_FILE: &str = "run_state.json";

/// Response cache snapshot file name
pub const CACHE_FILE: &str = "response_cache.json";

/// Path of the run state inside `dir`
pub fn state_path(dir: &Path) -> PathBuf {
    dir.join(STATE_FILE)
}

/// Path of the cache snapshot inside `dir`
pub fn cache_path(dir: &Path) -> PathBuf {
    dir.join(CACHE_FILE)
}
