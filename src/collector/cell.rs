//! Schedule cells and collection requests
//!
//! A cell is one unit of work: a (date, slot, target, category) tuple that maps to
//! exactly one API call. Cells only move forward:
//! `Pending -> InProgress -> {Done, PermanentlyFailed}`. An in-flight cell that is
//! cancelled or halted returns to `Pending`, since nothing was persisted for it.

use super::config::{default_board_slots, default_connection_slots};
use super::CollectError;
use crate::{BoardType, Category, TimeSlot, TimeWindow};
use chrono::{Duration as ChronoDuration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// What a cell collects
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CellTarget {
    /// Station board of one station
    Station {
        /// Display name (used for file naming)
        name: String,
        /// Station id sent to the API when known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Connection search between two stations
    Pair {
        /// Origin
        from: String,
        /// Destination
        to: String,
    },
}

impl CellTarget {
    /// Station target without a known id
    pub fn station(name: impl Into<String>) -> Self {
        CellTarget::Station {
            name: name.into(),
            id: None,
        }
    }

    /// Station target queried by id
    pub fn station_with_id(name: impl Into<String>, id: impl Into<String>) -> Self {
        CellTarget::Station {
            name: name.into(),
            id: Some(id.into()),
        }
    }

    /// Connection pair target
    pub fn pair(from: impl Into<String>, to: impl Into<String>) -> Self {
        CellTarget::Pair {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Category this target is collected under
    pub fn category(&self) -> Category {
        match self {
            CellTarget::Station { .. } => Category::StationBoard,
            CellTarget::Pair { .. } => Category::Connections,
        }
    }
}

impl fmt::Display for CellTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellTarget::Station { name, .. } => write!(f, "{name}"),
            CellTarget::Pair { from, to } => write!(f, "{from} -> {to}"),
        }
    }
}

/// Identity of a cell, also the persistence key.
///
/// Station board cells also carry the board type: an arrival board and a
/// departure board of the same station and slot are different cells.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    /// Calendar date
    pub date: NaiveDate,
    /// Time of day
    pub slot: TimeSlot,
    /// Station or pair
    pub target: CellTarget,
    /// Call category
    pub category: Category,
    /// Arrival or departure, station boards only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_type: Option<BoardType>,
}

impl CellKey {
    /// Create a key. Station board keys default to the arrival board.
    pub fn new(date: NaiveDate, slot: TimeSlot, target: CellTarget, category: Category) -> Self {
        let board_type = (category == Category::StationBoard).then(BoardType::default);
        Self {
            date,
            slot,
            target,
            category,
            board_type,
        }
    }

    /// Same key for another board type. No effect on non-board keys.
    pub fn with_board_type(mut self, board_type: BoardType) -> Self {
        if self.category == Category::StationBoard {
            self.board_type = Some(board_type);
        }
        self
    }

    /// Request window of this cell
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.date, self.slot)
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.category,
            self.date.format("%Y-%m-%d"),
            self.slot,
            self.target
        )?;
        if let Some(board_type) = self.board_type {
            write!(f, " ({board_type})")?;
        }
        Ok(())
    }
}

/// Lifecycle state of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    /// Not attempted yet
    #[default]
    Pending,
    /// Request in flight
    InProgress,
    /// Records persisted
    Done,
    /// Given up for this run
    PermanentlyFailed,
}

/// A cell plus its status, owned by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleCell {
    key: CellKey,
    status: CellStatus,
}

impl ScheduleCell {
    /// New pending cell
    pub fn new(key: CellKey) -> Self {
        Self {
            key,
            status: CellStatus::Pending,
        }
    }

    /// Cell whose records the sink already holds
    pub fn already_done(key: CellKey) -> Self {
        Self {
            key,
            status: CellStatus::Done,
        }
    }

    /// Identity
    pub fn key(&self) -> &CellKey {
        &self.key
    }

    /// Current status
    pub fn status(&self) -> CellStatus {
        self.status
    }

    /// `Pending -> InProgress`. Returns false from any other state.
    pub fn begin(&mut self) -> bool {
        self.transition(CellStatus::Pending, CellStatus::InProgress)
    }

    /// `InProgress -> Done`
    pub fn complete(&mut self) -> bool {
        self.transition(CellStatus::InProgress, CellStatus::Done)
    }

    /// `InProgress -> PermanentlyFailed`
    pub fn fail(&mut self) -> bool {
        self.transition(CellStatus::InProgress, CellStatus::PermanentlyFailed)
    }

    /// `InProgress -> Pending` for a cell whose call was halted or cancelled
    pub fn abandon(&mut self) -> bool {
        self.transition(CellStatus::InProgress, CellStatus::Pending)
    }

    fn transition(&mut self, from: CellStatus, to: CellStatus) -> bool {
        if self.status == from {
            self.status = to;
            true
        } else {
            false
        }
    }
}

/// A validated description of what to collect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRequest {
    /// First date (inclusive)
    pub start_date: NaiveDate,
    /// Last date (inclusive)
    pub end_date: NaiveDate,
    /// Station board targets, in collection order
    pub stations: Vec<CellTarget>,
    /// Connection targets, in collection order
    pub pairs: Vec<CellTarget>,
    /// Categories to collect
    pub categories: Vec<Category>,
    /// Station board slots, ascending
    pub board_slots: Vec<TimeSlot>,
    /// Connection slots, ascending
    pub connection_slots: Vec<TimeSlot>,
    /// Arrival or departure boards
    pub board_type: BoardType,
    /// Restrict the run to these cells
    pub only_cells: Option<HashSet<CellKey>>,
}

impl CollectionRequest {
    /// Start building a request for `start..=end`
    pub fn builder(start_date: NaiveDate, end_date: NaiveDate) -> CollectionRequestBuilder {
        CollectionRequestBuilder::new(start_date, end_date)
    }

    /// Dates in the range, ascending
    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut dates = Vec::new();
        let mut date = self.start_date;
        while date <= self.end_date {
            dates.push(date);
            date += ChronoDuration::days(1);
        }
        dates
    }

    /// Slots and targets of `category`
    fn plan(&self, category: Category) -> (&[TimeSlot], &[CellTarget]) {
        match category {
            Category::StationBoard => (self.board_slots.as_slice(), self.stations.as_slice()),
            Category::Connections => (self.connection_slots.as_slice(), self.pairs.as_slice()),
            Category::Locations => (&[], &[]),
        }
    }

    /// Cell keys of `category` in processing order: date, then slot, then target
    /// in input order. The `only_cells` filter is applied.
    pub fn cell_keys(&self, category: Category) -> Vec<CellKey> {
        let (slots, targets) = self.plan(category);
        let mut keys = Vec::with_capacity(slots.len() * targets.len());

        for date in self.dates() {
            for slot in slots {
                for target in targets {
                    let key = CellKey::new(date, *slot, target.clone(), category)
                        .with_board_type(self.board_type);
                    if self
                        .only_cells
                        .as_ref()
                        .map_or(true, |only| only.contains(&key))
                    {
                        keys.push(key);
                    }
                }
            }
        }
        keys
    }

    /// Total number of cells across all categories
    pub fn total_cells(&self) -> usize {
        self.categories.iter().map(|c| self.cell_keys(*c).len()).sum()
    }

    /// Check the invariants the scheduler relies on
    pub fn validate(&self) -> Result<(), CollectError> {
        let invalid = |msg: String| Err(CollectError::InvalidRequest(msg));

        if self.start_date > self.end_date {
            return invalid(format!(
                "start date {} is after end date {}",
                self.start_date, self.end_date
            ));
        }
        if self.categories.is_empty() {
            return invalid("no categories selected".to_string());
        }

        for category in &self.categories {
            let (slots, targets) = self.plan(*category);
            match category {
                Category::Locations => {
                    return invalid("locations are looked up, not collected".to_string())
                }
                _ if targets.is_empty() => {
                    return invalid(format!("no targets given for {category}"));
                }
                _ if slots.is_empty() => {
                    return invalid(format!("no time slots given for {category}"));
                }
                _ => {}
            }
            if let Some(target) = targets.iter().find(|t| t.category() != *category) {
                return invalid(format!("target {target} cannot be collected as {category}"));
            }
            if slots.windows(2).any(|w| w[0] >= w[1]) {
                return invalid(format!("time slots for {category} must be strictly ascending"));
            }
        }
        Ok(())
    }
}

/// Builder for [`CollectionRequest`]
#[derive(Debug, Clone)]
pub struct CollectionRequestBuilder {
    start_date: NaiveDate,
    end_date: NaiveDate,
    stations: Vec<CellTarget>,
    pairs: Vec<CellTarget>,
    categories: Option<Vec<Category>>,
    board_slots: Vec<TimeSlot>,
    connection_slots: Vec<TimeSlot>,
    board_type: BoardType,
    only_cells: Option<HashSet<CellKey>>,
}

impl CollectionRequestBuilder {
    fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
            stations: Vec::new(),
            pairs: Vec::new(),
            categories: None,
            board_slots: default_board_slots(),
            connection_slots: default_connection_slots(),
            board_type: BoardType::default(),
            only_cells: None,
        }
    }

    /// Add a station by name
    pub fn station(mut self, name: impl Into<String>) -> Self {
        self.stations.push(CellTarget::station(name));
        self
    }

    /// Add a station target (name, optionally with id)
    pub fn station_target(mut self, target: CellTarget) -> Self {
        self.stations.push(target);
        self
    }

    /// Add a connection pair
    pub fn pair(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.pairs.push(CellTarget::pair(from, to));
        self
    }

    /// Categories to collect. Defaults to every category that has targets.
    pub fn categories(mut self, categories: Vec<Category>) -> Self {
        self.categories = Some(categories);
        self
    }

    /// Station board slots
    pub fn board_slots(mut self, slots: Vec<TimeSlot>) -> Self {
        self.board_slots = slots;
        self
    }

    /// Connection slots
    pub fn connection_slots(mut self, slots: Vec<TimeSlot>) -> Self {
        self.connection_slots = slots;
        self
    }

    /// Arrival or departure boards
    pub fn board_type(mut self, board_type: BoardType) -> Self {
        self.board_type = board_type;
        self
    }

    /// Restrict the run to `cells`
    pub fn only_cells(mut self, cells: HashSet<CellKey>) -> Self {
        self.only_cells = Some(cells);
        self
    }

    /// Sort and de-duplicate slots, then validate
    pub fn build(self) -> Result<CollectionRequest, CollectError> {
        let categories = self.categories.unwrap_or_else(|| {
            let mut categories = Vec::new();
            if !self.stations.is_empty() {
                categories.push(Category::StationBoard);
            }
            if !self.pairs.is_empty() {
                categories.push(Category::Connections);
            }
            categories
        });

        let mut unique = Vec::with_capacity(categories.len());
        for category in categories {
            if !unique.contains(&category) {
                unique.push(category);
            }
        }

        let request = CollectionRequest {
            start_date: self.start_date,
            end_date: self.end_date,
            stations: self.stations,
            pairs: self.pairs,
            categories: unique,
            board_slots: sorted_unique(self.board_slots),
            connection_slots: sorted_unique(self.connection_slots),
            board_type: self.board_type,
            only_cells: self.only_cells,
        };
        request.validate()?;
        Ok(request)
    }
}

fn sorted_unique(mut slots: Vec<TimeSlot>) -> Vec<TimeSlot> {
    slots.sort();
    slots.dedup();
    slots
}
