//! Fakes shared by the integration tests

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use transit_collector::collector::{
    CollectionRequest, RequestBudget, ResponseCache, RetryExecutor, RetryPolicy,
};
use transit_collector::fetcher::{ApiClient, RawResponse, Transport, TransportError};
use transit_collector::{Category, TimeSlot};

/// Station board with a single arrival at Luzern
pub const BOARD_BODY: &str = r#"{
    "station": {"id": "8505000", "name": "Luzern"},
    "stationboard": [{
        "stop": {
            "station": {"id": "8505000", "name": "Luzern"},
            "arrival": "2025-03-01T08:05:00+0100",
            "departure": null,
            "delay": 2,
            "platform": "7"
        },
        "category": "IR",
        "number": "2518",
        "operator": "SBB",
        "to": "Luzern",
        "passList": []
    }]
}"#;

/// A single direct connection
pub const CONNECTIONS_BODY: &str = r#"{
    "connections": [{
        "from": {
            "station": {"id": "8503000", "name": "Zürich HB"},
            "departure": "2025-03-01T07:04:00+0100",
            "platform": "8"
        },
        "to": {
            "station": {"id": "8505000", "name": "Luzern"},
            "arrival": "2025-03-01T07:45:00+0100",
            "platform": "5"
        },
        "duration": "00d00:41:00",
        "sections": [{"journey": {"category": "IR"}}]
    }]
}"#;

/// Location search with one hit
pub const LOCATIONS_BODY: &str = r#"{
    "stations": [{"id": "8505000", "name": "Luzern", "coordinate": {"x": 47.05, "y": 8.31}}]
}"#;

/// One recorded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub endpoint: String,
    pub params: Vec<(String, String)>,
}

impl Call {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

type Hook = Box<dyn Fn(usize) + Send + Sync>;

/// Scripted API keyed by endpoint. Unscripted calls get the endpoint's default.
pub struct FakeApi {
    scripts: Mutex<HashMap<String, VecDeque<Result<RawResponse, TransportError>>>>,
    defaults: Mutex<HashMap<String, Result<RawResponse, TransportError>>>,
    calls: Mutex<Vec<Call>>,
    hook: Mutex<Option<Hook>>,
    stall_from: Mutex<Option<usize>>,
}

impl FakeApi {
    pub fn new() -> Self {
        let defaults = HashMap::from([
            ("/stationboard".to_string(), Ok(RawResponse::ok(BOARD_BODY))),
            ("/connections".to_string(), Ok(RawResponse::ok(CONNECTIONS_BODY))),
            ("/locations".to_string(), Ok(RawResponse::ok(LOCATIONS_BODY))),
        ]);
        Self {
            scripts: Mutex::new(HashMap::new()),
            defaults: Mutex::new(defaults),
            calls: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
            stall_from: Mutex::new(None),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Answer every unscripted call to `endpoint` with `response`
    pub fn respond_always(&self, endpoint: &str, response: Result<RawResponse, TransportError>) {
        self.defaults
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), response);
    }

    /// Queue one response for `endpoint`
    pub fn push(&self, endpoint: &str, response: Result<RawResponse, TransportError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .push_back(response);
    }

    /// Run `hook` with the 1-based call number before each response
    pub fn on_call(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// Calls numbered `n` and later hang for an hour before answering
    pub fn stall_from(&self, n: usize) {
        *self.stall_from.lock().unwrap() = Some(n);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_to(&self, endpoint: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.endpoint == endpoint)
            .count()
    }
}

#[async_trait]
impl Transport for FakeApi {
    async fn get(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<RawResponse, TransportError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call {
                endpoint: endpoint.to_string(),
                params: params.to_vec(),
            });
            calls.len()
        };

        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(n);
        }

        let stall = matches!(*self.stall_from.lock().unwrap(), Some(from) if n >= from);
        if stall {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(endpoint)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| {
            self.defaults
                .lock()
                .unwrap()
                .get(endpoint)
                .cloned()
                .unwrap_or_else(|| Ok(RawResponse::new(404, "unknown endpoint")))
        })
    }
}

pub fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
}

pub fn slot(s: &str) -> TimeSlot {
    s.parse().unwrap()
}

pub fn slots(list: &[&str]) -> Vec<TimeSlot> {
    list.iter().map(|s| slot(s)).collect()
}

/// Budget with the given board and connection ceilings on the wall clock
pub fn budget(board: u32, connections: u32) -> RequestBudget {
    RequestBudget::new([
        (Category::StationBoard, board),
        (Category::Connections, connections),
    ])
}

/// Retry policy with millisecond backoff
pub fn fast_policy(retries: u32) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_retries(retries)
        .with_base_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_millis(50))
}

pub fn client(api: Arc<FakeApi>, budget: RequestBudget, retries: u32) -> Arc<ApiClient> {
    Arc::new(ApiClient::new(
        api,
        Arc::new(budget),
        Arc::new(ResponseCache::new()),
        RetryExecutor::with_seed(fast_policy(retries), 42),
    ))
}

/// Board request for Luzern over `days` days at `board_slots`
pub fn board_request(days: u32, board_slots: &[&str]) -> CollectionRequest {
    CollectionRequest::builder(date(1), date(days))
        .station("Luzern")
        .board_slots(slots(board_slots))
        .build()
        .unwrap()
}
