//! CSV persistence sink
//!
//! One file per entity and day, one row per board entry or connection. Every row
//! carries the `request_date` and `request_time` of the cell it came from, so a
//! cell can be rewritten by replacing the rows of its slot. Arrival and departure
//! boards share a file and are told apart by `board_type`. Completed cells are
//! listed in a per-month `_manifest.json`, which is what [`CsvSink::exists`] reads.

use super::path::{OutputPathBuilder, YearMonth};
use super::{CellRecords, OutputError, OutputResult, PersistenceSink};
use crate::collector::cell::CellKey;
use crate::{BoardEntry, BoardType, Category, Connection, ConnectionStop};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use fd_lock::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB buffer

/// Manifest schema version
const MANIFEST_VERSION: &str = "1.0.0";

/// CSV record for a station board entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct BoardRecord {
    request_date: String,
    request_time: String,
    board_type: String,
    station_id: Option<String>,
    station_name: Option<String>,
    category: Option<String>,
    number: Option<String>,
    operator: Option<String>,
    to: Option<String>,
    departure: Option<String>,
    arrival: Option<String>,
    delay: Option<i64>,
    platform: Option<String>,
    prognosis_departure: Option<String>,
    prognosis_arrival: Option<String>,
    prognosis_platform: Option<String>,
    capacity1st: Option<i64>,
    capacity2nd: Option<i64>,
    previous_stop: Option<String>,
    previous_stop_departure: Option<String>,
    next_stop: Option<String>,
    next_stop_arrival: Option<String>,
}

impl BoardRecord {
    fn new(cell: &CellKey, board_type: BoardType, entry: &BoardEntry) -> Self {
        Self {
            request_date: cell.date.format("%Y-%m-%d").to_string(),
            request_time: cell.slot.to_string(),
            board_type: board_type.to_string(),
            station_id: entry.station.id.clone(),
            station_name: entry.station.name.clone(),
            category: entry.category.clone(),
            number: entry.number.clone(),
            operator: entry.operator.clone(),
            to: entry.to.clone(),
            departure: timestamp(entry.departure),
            arrival: timestamp(entry.arrival),
            delay: entry.delay,
            platform: entry.platform.clone(),
            prognosis_departure: timestamp(entry.prognosis_departure),
            prognosis_arrival: timestamp(entry.prognosis_arrival),
            prognosis_platform: entry.prognosis_platform.clone(),
            capacity1st: entry.capacity1st,
            capacity2nd: entry.capacity2nd,
            previous_stop: stop_name(entry.previous_stop.as_ref()),
            previous_stop_departure: entry
                .previous_stop
                .as_ref()
                .and_then(|s| timestamp(s.departure)),
            next_stop: stop_name(entry.next_stop.as_ref()),
            next_stop_arrival: entry.next_stop.as_ref().and_then(|s| timestamp(s.arrival)),
        }
    }
}

/// CSV record for a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ConnectionRecord {
    request_date: String,
    request_time: String,
    from_id: Option<String>,
    from_name: Option<String>,
    departure: Option<String>,
    departure_delay: Option<i64>,
    departure_platform: Option<String>,
    to_id: Option<String>,
    to_name: Option<String>,
    arrival: Option<String>,
    arrival_delay: Option<i64>,
    arrival_platform: Option<String>,
    duration: Option<String>,
    duration_minutes: Option<i64>,
    transfers: u32,
    products: String,
    capacity1st: Option<i64>,
    capacity2nd: Option<i64>,
}

impl ConnectionRecord {
    fn new(cell: &CellKey, connection: &Connection) -> Self {
        Self {
            request_date: cell.date.format("%Y-%m-%d").to_string(),
            request_time: cell.slot.to_string(),
            from_id: connection.from.station.id.clone(),
            from_name: connection.from.station.name.clone(),
            departure: timestamp(connection.from.departure),
            departure_delay: connection.from.delay,
            departure_platform: connection.from.platform.clone(),
            to_id: connection.to.station.id.clone(),
            to_name: connection.to.station.name.clone(),
            arrival: timestamp(connection.to.arrival),
            arrival_delay: connection.to.delay,
            arrival_platform: connection.to.platform.clone(),
            duration: connection.duration.clone(),
            duration_minutes: connection.duration_minutes(),
            transfers: connection.transfers,
            products: connection.products.join("|"),
            capacity1st: connection.capacity1st,
            capacity2nd: connection.capacity2nd,
        }
    }
}

fn timestamp(value: Option<DateTime<FixedOffset>>) -> Option<String> {
    value.map(|t| t.to_rfc3339())
}

fn stop_name(stop: Option<&ConnectionStop>) -> Option<String> {
    stop.and_then(|s| s.station.name.clone())
}

/// Completed cells of one month
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Manifest {
    schema_version: String,
    cells: BTreeSet<CellKey>,
}

/// Sink writing per-entity daily CSV files under `root`
#[derive(Debug, Clone)]
pub struct CsvSink {
    root: PathBuf,
    manifests: Arc<Mutex<HashMap<YearMonth, BTreeSet<CellKey>>>>,
}

impl CsvSink {
    /// Create a sink rooted at `root` (e.g., "data/raw")
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            manifests: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Data file of `cell`
    pub fn data_path(&self, cell: &CellKey) -> PathBuf {
        OutputPathBuilder::new(self.root.clone()).for_cell(cell).build()
    }

    /// Completed cells recorded for `month`
    pub fn completed_cells(&self, month: YearMonth) -> OutputResult<BTreeSet<CellKey>> {
        let manifests = self.manifests.lock().unwrap_or_else(PoisonError::into_inner);
        match manifests.get(&month) {
            Some(cells) => Ok(cells.clone()),
            None => load_manifest(&self.manifest_path(month)).map(|m| m.cells),
        }
    }

    fn manifest_path(&self, month: YearMonth) -> PathBuf {
        OutputPathBuilder::new(self.root.clone())
            .for_manifest(month)
            .build()
    }

    fn write_blocking(&self, cell: &CellKey, records: &CellRecords) -> OutputResult<()> {
        let path = self.data_path(cell);
        let slot = cell.slot.to_string();

        match (cell.category, records) {
            (Category::StationBoard, CellRecords::Board { board_type, entries }) => {
                let rows = entries
                    .iter()
                    .map(|entry| BoardRecord::new(cell, *board_type, entry))
                    .collect();
                let board = board_type.to_string();
                replace_slot_rows(&path, rows, |row: &BoardRecord| {
                    row.request_time == slot && row.board_type == board
                })?;
            }
            (Category::Connections, CellRecords::Connections(connections)) => {
                let rows = connections
                    .iter()
                    .map(|connection| ConnectionRecord::new(cell, connection))
                    .collect();
                replace_slot_rows(&path, rows, |row: &ConnectionRecord| {
                    row.request_time == slot
                })?;
            }
            _ => return Err(OutputError::MismatchedRecords(cell.to_string())),
        }

        // The manifest is only updated after the data file is in place
        let month = YearMonth::from_date(cell.date);
        let mut manifests = self.manifests.lock().unwrap_or_else(PoisonError::into_inner);
        let manifest_path = self.manifest_path(month);
        let cells = match manifests.entry(month) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(load_manifest(&manifest_path)?.cells)
            }
        };
        cells.insert(cell.clone());

        save_manifest(
            &manifest_path,
            &Manifest {
                schema_version: MANIFEST_VERSION.to_string(),
                cells: cells.clone(),
            },
        )?;

        debug!(
            cell = %cell,
            rows = records.len(),
            path = %path.display(),
            "Cell persisted"
        );
        Ok(())
    }

    fn exists_blocking(&self, cell: &CellKey) -> OutputResult<bool> {
        let month = YearMonth::from_date(cell.date);
        let mut manifests = self.manifests.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cells) = manifests.get(&month) {
            return Ok(cells.contains(cell));
        }

        let manifest = load_manifest(&self.manifest_path(month))?;
        let found = manifest.cells.contains(cell);
        manifests.insert(month, manifest.cells);
        Ok(found)
    }
}

#[async_trait]
impl PersistenceSink for CsvSink {
    async fn write(&self, cell: &CellKey, records: &CellRecords) -> OutputResult<()> {
        let sink = self.clone();
        let cell = cell.clone();
        let records = records.clone();
        tokio::task::spawn_blocking(move || sink.write_blocking(&cell, &records))
            .await
            .map_err(|e| OutputError::IoError(format!("Write task failed: {e}")))?
    }

    async fn exists(&self, cell: &CellKey) -> OutputResult<bool> {
        let sink = self.clone();
        let cell = cell.clone();
        tokio::task::spawn_blocking(move || sink.exists_blocking(&cell))
            .await
            .map_err(|e| OutputError::IoError(format!("Lookup task failed: {e}")))?
    }
}

/// Rewrite `path`, dropping rows matched by `same_cell` and appending `rows`
fn replace_slot_rows<R, F>(path: &Path, rows: Vec<R>, same_cell: F) -> OutputResult<()>
where
    R: Serialize + DeserializeOwned,
    F: Fn(&R) -> bool,
{
    let mut kept = Vec::new();
    let mut replaced = 0usize;
    if path.exists() {
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| OutputError::CsvError(format!("Failed to open {}: {e}", path.display())))?;
        for row in reader.deserialize::<R>() {
            let row =
                row.map_err(|e| OutputError::CsvError(format!("Failed to read row: {e}")))?;
            if same_cell(&row) {
                replaced += 1;
            } else {
                kept.push(row);
            }
        }
    }

    if replaced > 0 {
        info!(
            path = %path.display(),
            replaced,
            "Replacing rows of a previously written slot"
        );
    }

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)
        .map_err(|e| OutputError::IoError(format!("Failed to create directory: {e}")))?;

    let temp_file = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| OutputError::IoError(format!("Failed to create temp file: {e}")))?;
    let mut writer =
        csv::Writer::from_writer(BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, temp_file));

    for row in kept.iter().chain(rows.iter()) {
        writer
            .serialize(row)
            .map_err(|e| OutputError::CsvError(format!("Failed to write row: {e}")))?;
    }

    let buf_writer = writer
        .into_inner()
        .map_err(|e| OutputError::IoError(format!("Failed to get inner writer: {e}")))?;
    let temp_file = buf_writer
        .into_inner()
        .map_err(|e| OutputError::IoError(format!("Failed to get file handle: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| OutputError::IoError(format!("Failed to sync file: {e}")))?;
    temp_file
        .persist(path)
        .map_err(|e| OutputError::IoError(format!("Failed to persist file: {e}")))?;
    Ok(())
}

fn load_manifest(path: &Path) -> OutputResult<Manifest> {
    if !path.exists() {
        return Ok(Manifest::default());
    }
    let contents = std::fs::read_to_string(path)
        .map_err(|e| OutputError::IoError(format!("Failed to read manifest: {e}")))?;
    serde_json::from_str(&contents)
        .map_err(|e| OutputError::SerializationError(format!("Invalid manifest: {e}")))
}

fn save_manifest(path: &Path, manifest: &Manifest) -> OutputResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)
        .map_err(|e| OutputError::IoError(format!("Failed to create directory: {e}")))?;

    let json = serde_json::to_string_pretty(manifest)
        .map_err(|e| OutputError::SerializationError(e.to_string()))?;

    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path.with_extension("lock"))
        .map_err(|e| OutputError::LockError(format!("Failed to create lock file: {e}")))?;
    let mut lock = RwLock::new(lock_file);
    let _guard = lock
        .write()
        .map_err(|e| OutputError::LockError(format!("Failed to acquire write lock: {e}")))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| OutputError::IoError(format!("Failed to create temp file: {e}")))?;
    temp_file
        .write_all(json.as_bytes())
        .map_err(|e| OutputError::IoError(format!("Failed to write manifest: {e}")))?;
    temp_file
        .flush()
        .map_err(|e| OutputError::IoError(format!("Failed to flush manifest: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| OutputError::IoError(format!("Failed to sync manifest: {e}")))?;
    temp_file
        .persist(path)
        .map_err(|e| OutputError::IoError(format!("Failed to persist manifest: {e}")))?;

    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}
