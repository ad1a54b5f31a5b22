//! Collection configuration constants

use crate::{Category, TimeSlot};
use std::collections::HashMap;
use std::time::Duration;

/// Base URL of the public transport API.
pub const DEFAULT_BASE_URL: &str = "http://transport.opendata.ch/v1";

/// Daily ceiling for connection searches.
/// The upstream API allows 1,000 `/connections` calls per day per client.
pub const CONNECTIONS_DAILY_CEILING: u32 = 1_000;

/// Daily ceiling for station boards.
/// 10,080 `/stationboard` calls per day (one every ~8.6 seconds around the clock).
pub const STATIONBOARD_DAILY_CEILING: u32 = 10_080;

/// Maximum number of retries after the first attempt.
/// 3 retries with 5s initial backoff waits at most 5+10+20s (plus jitter) per call.
pub const MAX_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 5_000;

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// HTTP status used by the API to signal rate limiting.
pub const RATE_LIMIT_STATUS: u16 = 429;

/// 4xx statuses that are transient and worth retrying.
pub const TRANSIENT_STATUS_CODES: &[u16] = &[408, RATE_LIMIT_STATUS];

/// Entries requested per station board call.
pub const STATION_BOARD_LIMIT: u32 = 10;

/// Connections requested per connection search.
pub const CONNECTIONS_LIMIT: u32 = 4;

/// Granularity (minutes) that request times are truncated to before they are
/// sent and used as cache keys.
pub const SLOT_GRANULARITY_MINUTES: u32 = 15;

/// First hourly station board slot (05:00).
pub const BOARD_FIRST_HOUR: u8 = 5;

/// Last hourly station board slot (23:00).
pub const BOARD_LAST_HOUR: u8 = 23;

/// Connection search slots, every two hours through the main travel day.
pub const CONNECTION_SLOTS: &[(u8, u8)] = &[
    (6, 0),
    (8, 0),
    (10, 0),
    (12, 0),
    (14, 0),
    (16, 0),
    (18, 0),
    (20, 0),
];

/// Default station board slots: hourly from 05:00 through 23:00
pub fn default_board_slots() -> Vec<TimeSlot> {
    TimeSlot::hourly(BOARD_FIRST_HOUR, BOARD_LAST_HOUR)
}

/// Default connection slots
pub fn default_connection_slots() -> Vec<TimeSlot> {
    CONNECTION_SLOTS
        .iter()
        .filter_map(|&(h, m)| TimeSlot::new(h, m).ok())
        .collect()
}

/// Default daily ceilings. Station lookups are not metered.
pub fn default_ceilings() -> HashMap<Category, u32> {
    HashMap::from([
        (Category::StationBoard, STATIONBOARD_DAILY_CEILING),
        (Category::Connections, CONNECTIONS_DAILY_CEILING),
    ])
}

/// Calculate the wait before re-attempting after failed attempt `attempt` (0-based).
///
/// `base * 2^attempt + jitter`, capped at `max`. The caller supplies the jitter so
/// the formula stays deterministic.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration, jitter: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    let exponential = base.checked_mul(factor).unwrap_or(max);
    exponential.saturating_add(jitter).min(max)
}
