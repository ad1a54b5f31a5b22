//! Collection engine
//!
//! This module turns a [`CollectionRequest`] into API calls without exceeding the
//! daily allowance of any endpoint category, and reports what happened in a
//! [`RunSummary`].
//!
//! # Overview
//!
//! 1. **Request**: dates, slots and targets are expanded into cells by [`cell`]
//! 2. **Resume**: cells the sink already holds are skipped
//! 3. **Budget**: every uncached call reserves one unit from [`budget::RequestBudget`]
//! 4. **Cache**: identical requests are answered by [`cache::ResponseCache`]
//! 5. **Retry**: transient failures are retried by [`retry::RetryExecutor`]
//! 6. **Scheduling**: [`scheduler::CollectionScheduler`] drives one loop per category
//!
//! # Error Handling
//!
//! Budget exhaustion and failed cells are reported in the summary, not as errors.
//! Only a conflicting cache write or a failing sink ends a run with
//! [`CollectError`], and both carry the partial summary.
//!
//! # Related Modules
//!
//! - [`crate::fetcher`] - API client and transport
//! - [`crate::output`] - Persistence sinks
//! - [`crate::resume`] - Persisted run state

pub mod budget;
pub mod cache;
pub mod cell;
pub mod config;
pub mod retry;
pub mod scheduler;
pub mod summary;

pub use budget::{BudgetState, Clock, ManualClock, RequestBudget, SystemClock};
pub use cache::{CacheEntry, CacheError, CacheKey, ResponseCache};
pub use cell::{CellKey, CellStatus, CellTarget, CollectionRequest, ScheduleCell};
pub use retry::{RetryExecutor, RetryPolicy, RetryTrace};
pub use scheduler::CollectionScheduler;
pub use summary::{CategoryHalt, FailedCell, FailureKind, HaltReason, RunSummary};

use crate::output::OutputError;

/// Errors that end a collection run
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// The request cannot be scheduled
    #[error("invalid collection request: {0}")]
    InvalidRequest(String),

    /// Two different payloads arrived for one cache key
    #[error("cache integrity violation: {source}")]
    Integrity {
        /// Conflicting write
        source: CacheError,
        /// State of the run when it stopped
        summary: Box<RunSummary>,
    },

    /// The sink could not persist or look up a cell
    #[error("sink failure: {source}")]
    Sink {
        /// Sink error
        source: OutputError,
        /// State of the run when it stopped
        summary: Box<RunSummary>,
    },
}

impl CollectError {
    /// Partial summary of a run that stopped on this error
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            CollectError::InvalidRequest(_) => None,
            CollectError::Integrity { summary, .. } | CollectError::Sink { summary, .. } => {
                Some(summary)
            }
        }
    }
}
