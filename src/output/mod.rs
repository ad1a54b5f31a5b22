//! Persistence sinks
//!
//! The scheduler hands every successfully fetched cell to a [`PersistenceSink`]
//! and asks it, before doing any work, which cells it already holds.

use crate::collector::cell::CellKey;
use crate::{BoardEntry, BoardType, Connection};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

pub mod csv;
pub mod path;

pub use self::csv::CsvSink;
pub use path::{OutputPathBuilder, YearMonth};

/// Output errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),

    /// Records do not match the cell's category
    #[error("records do not match cell {0}")]
    MismatchedRecords(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Parsed records of one cell
#[derive(Debug, Clone, PartialEq)]
pub enum CellRecords {
    /// Station board rows
    Board {
        /// Arrival or departure board
        board_type: BoardType,
        /// Rows, possibly empty
        entries: Vec<BoardEntry>,
    },
    /// Connection search results
    Connections(Vec<Connection>),
}

impl CellRecords {
    /// Number of rows
    pub fn len(&self) -> usize {
        match self {
            CellRecords::Board { entries, .. } => entries.len(),
            CellRecords::Connections(connections) => connections.len(),
        }
    }

    /// Whether there are no rows
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where collected cells are stored.
///
/// `write` must be idempotent per cell: writing a cell again replaces its rows.
/// `exists` must return true for every cell a previous `write` completed.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Persist the records of `cell`
    async fn write(&self, cell: &CellKey, records: &CellRecords) -> OutputResult<()>;

    /// Whether `cell` was persisted before
    async fn exists(&self, cell: &CellKey) -> OutputResult<bool>;
}

/// Sink that keeps records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    written: Mutex<Vec<(CellKey, CellRecords)>>,
    existing: Mutex<HashSet<CellKey>>,
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that reports `cells` as already persisted
    pub fn with_existing(cells: impl IntoIterator<Item = CellKey>) -> Self {
        Self {
            written: Mutex::new(Vec::new()),
            existing: Mutex::new(cells.into_iter().collect()),
        }
    }

    /// Writes in the order they happened
    pub fn writes(&self) -> Vec<(CellKey, CellRecords)> {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Keys written, in order
    pub fn written_keys(&self) -> Vec<CellKey> {
        self.writes().into_iter().map(|(key, _)| key).collect()
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn write(&self, cell: &CellKey, records: &CellRecords) -> OutputResult<()> {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((cell.clone(), records.clone()));
        self.existing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cell.clone());
        Ok(())
    }

    async fn exists(&self, cell: &CellKey) -> OutputResult<bool> {
        Ok(self
            .existing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(cell))
    }
}
