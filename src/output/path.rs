//! Hierarchical path generation for file organization
//!
//! Collected data is laid out per month, one file per entity and day:
//!
//! ```text
//! data/raw/2025-01/Luzern_2025-01-03.csv
//! data/raw/2025-01/connection_Zürich_HB_to_Luzern_2025-01-03.csv
//! data/raw/2025-01/_manifest.json
//! ```
//!
//! # Usage Example
//!
//! ```rust
//! use transit_collector::collector::cell::{CellKey, CellTarget};
//! use transit_collector::output::OutputPathBuilder;
//! use transit_collector::{Category, TimeSlot};
//! use chrono::NaiveDate;
//! use std::path::PathBuf;
//!
//! let key = CellKey::new(
//!     NaiveDate::from_ymd_opt(2025, 1, 3).unwrap(),
//!     TimeSlot::new(6, 0).unwrap(),
//!     CellTarget::pair("Zürich HB", "Luzern"),
//!     Category::Connections,
//! );
//!
//! let path = OutputPathBuilder::new(PathBuf::from("data/raw")).for_cell(&key).build();
//! assert_eq!(
//!     path,
//!     PathBuf::from("data/raw/2025-01/connection_Zürich_HB_to_Luzern_2025-01-03.csv")
//! );
//! ```

use crate::collector::cell::{CellKey, CellTarget};
use chrono::{Datelike, NaiveDate};
use std::path::PathBuf;

/// Name of the per-month completion manifest
pub const MANIFEST_FILE: &str = "_manifest.json";

/// Year and month representation for directory names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct YearMonth {
    /// Year (e.g., 2025)
    pub year: i32,
    /// Month (1-12)
    pub month: u32,
}

impl YearMonth {
    /// Month containing `date`
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl std::fmt::Display for YearMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Path builder for the per-month layout
#[derive(Debug, Clone)]
pub struct OutputPathBuilder {
    root_dir: PathBuf,
    month: Option<YearMonth>,
    file_name: Option<String>,
}

impl OutputPathBuilder {
    /// Builder rooted at `root_dir` (e.g., "data/raw")
    pub fn new(root_dir: PathBuf) -> Self {
        Self {
            root_dir,
            month: None,
            file_name: None,
        }
    }

    /// Target the data file of `cell`
    pub fn for_cell(mut self, cell: &CellKey) -> Self {
        self.month = Some(YearMonth::from_date(cell.date));
        self.file_name = Some(format!(
            "{}_{}.csv",
            entity_name(&cell.target),
            cell.date.format("%Y-%m-%d")
        ));
        self
    }

    /// Target the manifest of `month`
    pub fn for_manifest(mut self, month: YearMonth) -> Self {
        self.month = Some(month);
        self.file_name = Some(MANIFEST_FILE.to_string());
        self
    }

    /// Month directory, or the root when no month is set
    pub fn month_dir(&self) -> PathBuf {
        match self.month {
            Some(month) => self.root_dir.join(month.to_string()),
            None => self.root_dir.clone(),
        }
    }

    /// Complete file path
    pub fn build(&self) -> PathBuf {
        let dir = self.month_dir();
        match &self.file_name {
            Some(name) => dir.join(name),
            None => dir,
        }
    }
}

/// File name stem of a target: the station, or `connection_<from>_to_<to>`
pub fn entity_name(target: &CellTarget) -> String {
    match target {
        CellTarget::Station { name, .. } => sanitize_component(name),
        CellTarget::Pair { from, to } => format!(
            "connection_{}_to_{}",
            sanitize_component(from),
            sanitize_component(to)
        ),
    }
}

/// Sanitize a name for use in a file name
///
/// Prevents path traversal by replacing dangerous characters:
/// - `/`, `\`, `:` → `_` (directory separators)
/// - `..` → `__` (parent directory reference)
/// - whitespace → `_`
///
/// Preserves case and non-ASCII letters (e.g., "Zürich", "Genève").
pub fn sanitize_component(name: &str) -> String {
    name.trim()
        .replace("..", "__")
        .replace(['/', '\\', ':'], "_")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}
