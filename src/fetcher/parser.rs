//! Transport API payload parsing
//!
//! Turns the JSON documents returned by `/locations`, `/stationboard` and
//! `/connections` into typed records. Any deviation from the expected shape is a
//! [`PayloadError`], which the client reports as a terminal failure.

use crate::{BoardEntry, Connection, ConnectionStop, Coordinate, Station};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Timestamp layout used by the API (e.g., `2025-01-01T08:04:00+0100`)
const API_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Payload errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PayloadError {
    /// The document does not have the expected structure
    #[error("unexpected payload shape: {0}")]
    Shape(String),

    /// A timestamp could not be parsed
    #[error("invalid timestamp: {0}")]
    Timestamp(String),

    /// The API answered with an error document
    #[error("API error: {0}")]
    Api(String),
}

/// Parse a `/locations` payload
pub fn parse_locations(value: &Value) -> Result<Vec<Station>, PayloadError> {
    check_api_errors(value)?;
    let raw: RawLocationsResponse = decode(value)?;
    Ok(raw.stations.into_iter().map(Station::from).collect())
}

/// Parse a `/stationboard` payload.
///
/// Arrival boards often leave `stop.arrival`, `stop.delay` and `stop.platform`
/// empty; those are filled from the board station's own entry in `passList`.
pub fn parse_board(value: &Value) -> Result<Vec<BoardEntry>, PayloadError> {
    check_api_errors(value)?;
    let raw: RawStationboardResponse = decode(value)?;
    let board_station_id = raw.station.as_ref().and_then(|s| s.id.clone());

    raw.stationboard
        .into_iter()
        .map(|journey| board_entry(journey, board_station_id.as_deref()))
        .collect()
}

/// Parse a `/connections` payload
pub fn parse_connections(value: &Value) -> Result<Vec<Connection>, PayloadError> {
    check_api_errors(value)?;
    let raw: RawConnectionsResponse = decode(value)?;
    raw.connections.into_iter().map(connection).collect()
}

/// Parse an API timestamp. RFC 3339 is accepted as well.
pub fn parse_api_datetime(s: &str) -> Result<DateTime<FixedOffset>, PayloadError> {
    DateTime::parse_from_str(s, API_DATETIME_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .map_err(|e| PayloadError::Timestamp(format!("{s}: {e}")))
}

fn parse_opt_datetime(s: Option<&str>) -> Result<Option<DateTime<FixedOffset>>, PayloadError> {
    s.filter(|s| !s.is_empty()).map(parse_api_datetime).transpose()
}

fn decode<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T, PayloadError> {
    T::deserialize(value).map_err(|e| PayloadError::Shape(e.to_string()))
}

fn check_api_errors(value: &Value) -> Result<(), PayloadError> {
    if !value.is_object() {
        return Err(PayloadError::Shape("expected a JSON object".to_string()));
    }
    match value.get("errors").and_then(Value::as_array) {
        Some(errors) if !errors.is_empty() => {
            let messages: Vec<String> = errors
                .iter()
                .map(|e| {
                    e.get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| e.to_string())
                })
                .collect();
            Err(PayloadError::Api(messages.join("; ")))
        }
        _ => Ok(()),
    }
}

fn board_entry(journey: RawJourney, board_station_id: Option<&str>) -> Result<BoardEntry, PayloadError> {
    let RawJourney {
        stop,
        category,
        number,
        operator,
        to,
        pass_list,
        capacity1st,
        capacity2nd,
    } = journey;

    let station_id = board_station_id.or_else(|| stop.station.as_ref().and_then(|s| s.id.as_deref()));
    let position = station_id.and_then(|id| {
        pass_list
            .iter()
            .position(|p| p.station.as_ref().and_then(|s| s.id.as_deref()) == Some(id))
    });
    let own_stop = position.map(|i| &pass_list[i]);

    let prognosis = stop.prognosis.clone().unwrap_or_default();
    let own_prognosis = own_stop
        .and_then(|s| s.prognosis.clone())
        .unwrap_or_default();

    let arrival = stop
        .arrival
        .clone()
        .or_else(|| own_stop.and_then(|s| s.arrival.clone()));
    let platform = non_empty(stop.platform.clone()).or_else(|| own_stop.and_then(|s| non_empty(s.platform.clone())));
    let prognosis_arrival = prognosis.arrival.or(own_prognosis.arrival);
    let prognosis_platform = prognosis.platform.or(own_prognosis.platform);

    let departure = parse_opt_datetime(stop.departure.as_deref())?;
    let arrival = parse_opt_datetime(arrival.as_deref())?;
    let prognosis_departure = parse_opt_datetime(prognosis.departure.as_deref())?;
    let prognosis_arrival = parse_opt_datetime(prognosis_arrival.as_deref())?;

    let delay = stop
        .delay
        .or_else(|| own_stop.and_then(|s| s.delay))
        .or_else(|| match (arrival, prognosis_arrival) {
            (Some(scheduled), Some(actual)) => Some((actual - scheduled).num_minutes()),
            _ => None,
        })
        .or_else(|| match (departure, prognosis_departure) {
            (Some(scheduled), Some(actual)) => Some((actual - scheduled).num_minutes()),
            _ => None,
        });

    let (previous_stop, next_stop) = match position {
        Some(i) => (
            i.checked_sub(1)
                .and_then(|p| pass_list.get(p))
                .map(connection_stop)
                .transpose()?,
            pass_list.get(i + 1).map(connection_stop).transpose()?,
        ),
        None => (None, None),
    };

    Ok(BoardEntry {
        station: stop.station.map(Station::from).unwrap_or_default(),
        category,
        number,
        operator,
        to,
        departure,
        arrival,
        delay,
        platform,
        prognosis_departure,
        prognosis_arrival,
        prognosis_platform,
        capacity1st,
        capacity2nd,
        previous_stop,
        next_stop,
    })
}

fn connection(raw: RawConnection) -> Result<Connection, PayloadError> {
    let products = raw
        .sections
        .iter()
        .filter_map(|s| s.journey.as_ref())
        .map(|j| j.category.clone().unwrap_or_default())
        .collect();

    Ok(Connection {
        from: connection_stop(&raw.from)?,
        to: connection_stop(&raw.to)?,
        duration: raw.duration,
        transfers: raw.sections.len().saturating_sub(1) as u32,
        products,
        capacity1st: raw.capacity1st,
        capacity2nd: raw.capacity2nd,
    })
}

fn connection_stop(raw: &RawStop) -> Result<ConnectionStop, PayloadError> {
    Ok(ConnectionStop {
        station: raw.station.clone().map(Station::from).unwrap_or_default(),
        departure: parse_opt_datetime(raw.departure.as_deref())?,
        arrival: parse_opt_datetime(raw.arrival.as_deref())?,
        delay: raw.delay,
        platform: non_empty(raw.platform.clone()),
    })
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

/// Accepts a string, a number or null
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, Deserialize)]
struct RawLocation {
    #[serde(default, deserialize_with = "string_or_number")]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    coordinate: Option<RawCoordinate>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCoordinate {
    #[serde(default)]
    x: Option<f64>,
    #[serde(default)]
    y: Option<f64>,
}

impl From<RawLocation> for Station {
    fn from(raw: RawLocation) -> Self {
        Station {
            id: raw.id,
            name: raw.name,
            coordinate: raw.coordinate.map(|c| Coordinate { x: c.x, y: c.y }),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawPrognosis {
    #[serde(default)]
    arrival: Option<String>,
    #[serde(default)]
    departure: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    platform: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawStop {
    #[serde(default)]
    station: Option<RawLocation>,
    #[serde(default)]
    arrival: Option<String>,
    #[serde(default)]
    departure: Option<String>,
    #[serde(default)]
    delay: Option<i64>,
    #[serde(default, deserialize_with = "string_or_number")]
    platform: Option<String>,
    #[serde(default)]
    prognosis: Option<RawPrognosis>,
}

#[derive(Debug, Deserialize)]
struct RawJourney {
    stop: RawStop,
    #[serde(default)]
    category: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    number: Option<String>,
    #[serde(default)]
    operator: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(rename = "passList", default)]
    pass_list: Vec<RawStop>,
    #[serde(default)]
    capacity1st: Option<i64>,
    #[serde(default)]
    capacity2nd: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawStationboardResponse {
    #[serde(default)]
    station: Option<RawLocation>,
    stationboard: Vec<RawJourney>,
}

#[derive(Debug, Deserialize)]
struct RawSectionJourney {
    #[serde(default)]
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSection {
    #[serde(default)]
    journey: Option<RawSectionJourney>,
}

#[derive(Debug, Deserialize)]
struct RawConnection {
    from: RawStop,
    to: RawStop,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    sections: Vec<RawSection>,
    #[serde(default)]
    capacity1st: Option<i64>,
    #[serde(default)]
    capacity2nd: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawConnectionsResponse {
    connections: Vec<RawConnection>,
}

#[derive(Debug, Deserialize)]
struct RawLocationsResponse {
    stations: Vec<RawLocation>,
}
