//! Station registry with the default collection targets
//!
//! The registry lists the stations (with their API ids) and connection pairs that
//! are collected when a run names no targets of its own.

use crate::collector::cache::normalize_station_name;
use crate::collector::cell::CellTarget;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Embedded registry data
const REGISTRY_JSON: &str = include_str!("stations.json");

/// Global registry instance (loaded once)
static REGISTRY: Lazy<Result<StationRegistry, RegistryError>> =
    Lazy::new(|| StationRegistry::from_json(REGISTRY_JSON));

/// Registry of default stations and pairs
#[derive(Debug, Clone)]
pub struct StationRegistry {
    #[allow(dead_code)]
    schema_version: String,
    #[allow(dead_code)]
    last_updated: String,
    stations: Vec<StationEntry>,
    pairs: Vec<PairEntry>,
}

impl StationRegistry {
    /// Load the embedded registry
    ///
    /// This is a singleton operation - the registry is loaded once and cached.
    pub fn load() -> Result<&'static Self, &'static RegistryError> {
        REGISTRY.as_ref()
    }

    /// Load embedded registry, returning an owned copy
    pub fn load_embedded() -> Result<Self, RegistryError> {
        Self::from_json(REGISTRY_JSON)
    }

    /// Parse registry from JSON string
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let raw: RawRegistry = serde_json::from_str(json)
            .map_err(|e| RegistryError::ParseError(format!("Failed to parse registry: {e}")))?;

        let registry = Self {
            schema_version: raw.schema_version,
            last_updated: raw.last_updated,
            stations: raw.stations,
            pairs: raw.pairs,
        };

        for pair in &registry.pairs {
            for name in [&pair.from, &pair.to] {
                if registry.find_station(name).is_none() {
                    return Err(RegistryError::NotFound(format!(
                        "Pair {} -> {} names unknown station {name}",
                        pair.from, pair.to
                    )));
                }
            }
        }
        Ok(registry)
    }

    /// All stations, in registry order
    pub fn stations(&self) -> &[StationEntry] {
        &self.stations
    }

    /// All pairs, in registry order
    pub fn pairs(&self) -> &[PairEntry] {
        &self.pairs
    }

    /// Find a station by name, ignoring case and extra whitespace
    pub fn find_station(&self, name: &str) -> Option<&StationEntry> {
        let wanted = normalize_station_name(name);
        self.stations
            .iter()
            .find(|s| normalize_station_name(&s.name) == wanted)
    }

    /// Station board target for `name`, with the registry id when known
    pub fn station_target(&self, name: &str) -> CellTarget {
        match self.find_station(name) {
            Some(entry) => entry.target(),
            None => CellTarget::station(name.trim()),
        }
    }

    /// Board targets of every registered station
    pub fn default_station_targets(&self) -> Vec<CellTarget> {
        self.stations.iter().map(StationEntry::target).collect()
    }

    /// Connection targets of every registered pair
    pub fn default_pair_targets(&self) -> Vec<CellTarget> {
        self.pairs.iter().map(PairEntry::target).collect()
    }
}

/// A registered station
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationEntry {
    name: String,
    id: String,
}

impl StationEntry {
    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// API station id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Board target queried by id
    pub fn target(&self) -> CellTarget {
        CellTarget::station_with_id(self.name.clone(), self.id.clone())
    }
}

/// A registered connection pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairEntry {
    from: String,
    to: String,
}

impl PairEntry {
    /// Origin
    pub fn from(&self) -> &str {
        &self.from
    }

    /// Destination
    pub fn to(&self) -> &str {
        &self.to
    }

    /// Connection target
    pub fn target(&self) -> CellTarget {
        CellTarget::pair(self.from.clone(), self.to.clone())
    }
}

/// Raw registry structure for deserialization
#[derive(Debug, Deserialize)]
struct RawRegistry {
    schema_version: String,
    last_updated: String,
    stations: Vec<StationEntry>,
    pairs: Vec<PairEntry>,
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Failed to parse registry JSON
    #[error("registry parse error: {0}")]
    ParseError(String),

    /// Station not found in registry
    #[error("station not found: {0}")]
    NotFound(String),
}
