//! Append-only response cache keyed by endpoint and canonical parameters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, error};

/// Cache key: endpoint plus parameters sorted by name.
///
/// Callers are expected to canonicalise parameter values
/// (see [`normalize_station_name`]); the key only fixes the ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    endpoint: String,
    params: Vec<(String, String)>,
}

impl CacheKey {
    /// Build a key. Parameter order does not matter.
    pub fn new<K, V>(endpoint: &str, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut params: Vec<(String, String)> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        params.sort();
        Self {
            endpoint: endpoint.to_string(),
            params,
        }
    }

    /// Endpoint path
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sorted parameters
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoint)?;
        for (i, (name, value)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{name}={value}")?;
        }
        Ok(())
    }
}

/// Canonical form of a station name: trimmed, inner whitespace collapsed, lower-cased
pub fn normalize_station_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A cached successful payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Key the payload was fetched under
    pub key: CacheKey,
    /// Raw JSON payload
    pub value: serde_json::Value,
    /// When the payload was fetched
    pub fetched_at: DateTime<Utc>,
}

/// Cache errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    /// A different payload is already stored under this key
    #[error("duplicate cache key with a different payload: {0}")]
    DuplicateKey(CacheKey),
}

/// In-memory response cache. Entries are never replaced or evicted.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl ResponseCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored entry for `key`, if any
    pub fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Store a payload fetched now
    pub fn store(&self, key: CacheKey, value: serde_json::Value) -> Result<(), CacheError> {
        self.insert(CacheEntry {
            key,
            value,
            fetched_at: Utc::now(),
        })
    }

    /// Insert an entry.
    ///
    /// Re-inserting an identical payload is a no-op; a different payload under an
    /// existing key fails with [`CacheError::DuplicateKey`].
    fn insert(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.entry(entry.key.clone()) {
            Entry::Occupied(existing) => {
                if existing.get().value == entry.value {
                    debug!(key = %entry.key, "Identical payload already cached");
                    Ok(())
                } else {
                    error!(key = %entry.key, "Conflicting payload for cached key");
                    Err(CacheError::DuplicateKey(entry.key))
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    /// Load entries from an earlier run. Returns the number of entries added.
    pub fn seed(&self, entries: impl IntoIterator<Item = CacheEntry>) -> Result<usize, CacheError> {
        let before = self.len();
        for entry in entries {
            self.insert(entry)?;
        }
        Ok(self.len() - before)
    }

    /// All entries, ordered by key
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot: Vec<CacheEntry> = entries.values().cloned().collect();
        snapshot.sort_by(|a, b| a.key.cmp(&b.key));
        snapshot
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
