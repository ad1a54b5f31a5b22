//! # Transit Collector Library
//!
//! A quota-aware, resumable collector for station boards and station-to-station
//! connections from the Swiss public transport API (`transport.opendata.ch`).
//!
//! ## Features
//!
//! - **Daily Quota Accounting**: Independent per-category call budgets with lazy UTC day rollover
//! - **Response Cache**: Identical requests are served once per run (and optionally across runs)
//! - **Retry with Backoff**: Bounded exponential backoff with jitter, transient vs terminal classification
//! - **Resume Capability**: Cells already persisted are never fetched again
//! - **Graceful Shutdown**: Cooperative stop between cells, partial runs end with a clean summary
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use transit_collector::collector::{CollectionRequest, CollectionScheduler};
//! use transit_collector::fetcher::ApiClient;
//! use transit_collector::output::csv::CsvSink;
//! use transit_collector::Category;
//! use chrono::NaiveDate;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(ApiClient::with_defaults("http://transport.opendata.ch/v1"));
//! let sink = Arc::new(CsvSink::new("data/raw"));
//!
//! let request = CollectionRequest::builder(
//!     NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
//! )
//! .station("Luzern")
//! .pair("Zürich HB", "Luzern")
//! .categories(vec![Category::StationBoard, Category::Connections])
//! .build()?;
//!
//! let scheduler = CollectionScheduler::new(client, sink);
//! let summary = scheduler.run(&request).await?;
//! println!("done: {}, pending: {}", summary.done, summary.pending);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`collector`] - Budget, cache, retry executor and the cell scheduler
//! - [`fetcher`] - Transport seam, typed API client and payload parsing
//! - [`output`] - Persistence sink contract and the CSV implementation
//! - [`resume`] - Persisted run state (budget snapshot, failed cells, cache snapshot)
//! - [`registry`] - Embedded default stations and connection pairs
//! - [`shutdown`] - Cooperative stop signal

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// CLI command implementations
pub mod cli;

/// Collection engine: budget, cache, retry and scheduling
pub mod collector;

/// API client and transport
pub mod fetcher;

/// Metrics collection and Prometheus exporter
pub mod metrics;

/// Persistence sinks
pub mod output;

/// Default stations and connection pairs
pub mod registry;

/// Persisted run state
pub mod resume;

/// Cooperative stop signal shared across collection loops
pub mod shutdown;

/// Call category. Each metered category has its own daily ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Station search (`/locations`)
    Locations,
    /// Arrival/departure boards (`/stationboard`)
    StationBoard,
    /// Connection search (`/connections`)
    Connections,
}

impl Category {
    /// Endpoint path relative to the API base URL
    pub fn endpoint(&self) -> &'static str {
        match self {
            Category::Locations => "/locations",
            Category::StationBoard => "/stationboard",
            Category::Connections => "/connections",
        }
    }

    /// All categories, in a fixed order
    pub fn all() -> [Category; 3] {
        [
            Category::Locations,
            Category::StationBoard,
            Category::Connections,
        ]
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Locations => "locations",
            Category::StationBoard => "stationboard",
            Category::Connections => "connections",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "locations" | "location" => Ok(Category::Locations),
            "stationboard" | "board" => Ok(Category::StationBoard),
            "connections" | "connection" => Ok(Category::Connections),
            _ => Err(format!("Invalid category: {s}")),
        }
    }
}

/// Which side of the station board to request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardType {
    /// Arrivals at the station
    #[default]
    Arrival,
    /// Departures from the station
    Departure,
}

impl std::fmt::Display for BoardType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoardType::Arrival => write!(f, "arrival"),
            BoardType::Departure => write!(f, "departure"),
        }
    }
}

impl FromStr for BoardType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "arrival" => Ok(BoardType::Arrival),
            "departure" => Ok(BoardType::Departure),
            _ => Err(format!("Invalid board type: {s}")),
        }
    }
}

/// Time of day at minute resolution, ordered chronologically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeSlot {
    hour: u8,
    minute: u8,
}

impl TimeSlot {
    /// Create a slot, rejecting out-of-range components
    pub fn new(hour: u8, minute: u8) -> Result<Self, String> {
        if hour > 23 || minute > 59 {
            return Err(format!("Invalid time slot: {hour:02}:{minute:02}"));
        }
        Ok(Self { hour, minute })
    }

    /// Hour component (0-23)
    pub fn hour(&self) -> u8 {
        self.hour
    }

    /// Minute component (0-59)
    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// Minutes since midnight
    pub fn minutes_of_day(&self) -> u32 {
        self.hour as u32 * 60 + self.minute as u32
    }

    /// Round down to a multiple of `granularity_minutes`
    pub fn truncate_to(&self, granularity_minutes: u32) -> Self {
        let granularity = granularity_minutes.clamp(1, 24 * 60);
        let minutes = self.minutes_of_day() / granularity * granularity;
        Self {
            hour: (minutes / 60) as u8,
            minute: (minutes % 60) as u8,
        }
    }

    /// Hourly slots from `start_hour` through `end_hour` inclusive
    pub fn hourly(start_hour: u8, end_hour: u8) -> Vec<Self> {
        (start_hour..=end_hour.min(23))
            .map(|hour| Self { hour, minute: 0 })
            .collect()
    }
}

impl std::fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("Invalid time slot: {s} (expected HH:MM)"))?;
        let hour = h
            .parse::<u8>()
            .map_err(|_| format!("Invalid hour in time slot: {s}"))?;
        let minute = m
            .parse::<u8>()
            .map_err(|_| format!("Invalid minute in time slot: {s}"))?;
        Self::new(hour, minute)
    }
}

impl Serialize for TimeSlot {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeSlot {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TimeSlot::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// A date plus time-of-day slot, the time parameter of board and connection requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Calendar date (local to the API, no time zone conversion)
    pub date: NaiveDate,
    /// Time of day
    pub slot: TimeSlot,
}

impl TimeWindow {
    /// Create a window
    pub fn new(date: NaiveDate, slot: TimeSlot) -> Self {
        Self { date, slot }
    }

    /// `YYYY-MM-DD` form used for the `date` query parameter
    pub fn date_param(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// `HH:MM` form used for the `time` query parameter
    pub fn time_param(&self) -> String {
        self.slot.to_string()
    }
}

/// WGS84 coordinate as reported by the API
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude
    pub x: Option<f64>,
    /// Longitude
    pub y: Option<f64>,
}

/// Station (or other location) metadata
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Station {
    /// Station identifier (e.g., "8505000" for Luzern)
    pub id: Option<String>,
    /// Display name
    pub name: Option<String>,
    /// Location, when provided
    pub coordinate: Option<Coordinate>,
}

/// One row of a station board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardEntry {
    /// Station the board was requested for
    pub station: Station,
    /// Train category (e.g., "IC", "S")
    pub category: Option<String>,
    /// Train number
    pub number: Option<String>,
    /// Operator (e.g., "SBB")
    pub operator: Option<String>,
    /// Final destination
    pub to: Option<String>,
    /// Scheduled departure at this station
    pub departure: Option<DateTime<FixedOffset>>,
    /// Scheduled arrival at this station
    pub arrival: Option<DateTime<FixedOffset>>,
    /// Delay in minutes, when the API reports one
    pub delay: Option<i64>,
    /// Scheduled platform
    pub platform: Option<String>,
    /// Forecast departure
    pub prognosis_departure: Option<DateTime<FixedOffset>>,
    /// Forecast arrival
    pub prognosis_arrival: Option<DateTime<FixedOffset>>,
    /// Forecast platform
    pub prognosis_platform: Option<String>,
    /// First class occupancy estimate
    pub capacity1st: Option<i64>,
    /// Second class occupancy estimate
    pub capacity2nd: Option<i64>,
    /// Stop before this station on the train's route
    pub previous_stop: Option<ConnectionStop>,
    /// Stop after this station on the train's route
    pub next_stop: Option<ConnectionStop>,
}

/// A stop on a route: either end of a connection, or a neighbour on a board entry's route
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectionStop {
    /// Station
    pub station: Station,
    /// Scheduled departure
    pub departure: Option<DateTime<FixedOffset>>,
    /// Scheduled arrival
    pub arrival: Option<DateTime<FixedOffset>>,
    /// Delay in minutes
    pub delay: Option<i64>,
    /// Platform
    pub platform: Option<String>,
}

/// One connection between two stations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// Origin
    pub from: ConnectionStop,
    /// Destination
    pub to: ConnectionStop,
    /// Travel duration as reported (e.g., "00d00:46:00")
    pub duration: Option<String>,
    /// Number of changes (sections - 1)
    pub transfers: u32,
    /// Train categories of the journey sections, in order
    pub products: Vec<String>,
    /// First class occupancy estimate
    pub capacity1st: Option<i64>,
    /// Second class occupancy estimate
    pub capacity2nd: Option<i64>,
}

impl Connection {
    /// Scheduled door-to-door duration in minutes
    pub fn duration_minutes(&self) -> Option<i64> {
        let dep = self.from.departure?;
        let arr = self.to.arrival?;
        Some((arr - dep).num_minutes())
    }
}
