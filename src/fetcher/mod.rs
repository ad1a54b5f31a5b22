//! Transport seam and typed API client
//!
//! [`ApiClient`] is the only component that talks to the network. For every call
//! it consults the [`ResponseCache`] first, then the [`RequestBudget`], and only
//! then hands the request to the [`RetryExecutor`]. Outcomes are reported through
//! [`FetchResult`].

use crate::collector::budget::RequestBudget;
use crate::collector::cache::{normalize_station_name, CacheError, CacheKey, ResponseCache};
use crate::collector::config::{CONNECTIONS_LIMIT, SLOT_GRANULARITY_MINUTES, STATION_BOARD_LIMIT};
use crate::collector::retry::{RetryExecutor, RetryPolicy};
use crate::{BoardEntry, BoardType, Category, Connection, Station, TimeWindow};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub mod http;
pub mod pacer;
pub mod parser;
pub mod retry_formatter;
pub mod shared_resources;

pub use http::HttpTransport;
pub use pacer::RequestPacer;

/// Outcome of one logical API call
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum FetchResult<T> {
    /// Payload fetched (or served from cache) and parsed
    Success(T),
    /// Every attempt failed with a transient error
    RetryableFailure(String),
    /// The request cannot succeed as issued
    TerminalFailure(String),
    /// No call was made because today's allowance is used up
    BudgetExhausted,
}

impl<T> FetchResult<T> {
    /// Whether this is [`FetchResult::Success`]
    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success(_))
    }

    /// Transform the success value
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FetchResult<U> {
        match self {
            FetchResult::Success(value) => FetchResult::Success(f(value)),
            FetchResult::RetryableFailure(reason) => FetchResult::RetryableFailure(reason),
            FetchResult::TerminalFailure(reason) => FetchResult::TerminalFailure(reason),
            FetchResult::BudgetExhausted => FetchResult::BudgetExhausted,
        }
    }

    /// Chain a fallible step onto the success value
    pub fn and_then<U>(self, f: impl FnOnce(T) -> FetchResult<U>) -> FetchResult<U> {
        match self {
            FetchResult::Success(value) => f(value),
            FetchResult::RetryableFailure(reason) => FetchResult::RetryableFailure(reason),
            FetchResult::TerminalFailure(reason) => FetchResult::TerminalFailure(reason),
            FetchResult::BudgetExhausted => FetchResult::BudgetExhausted,
        }
    }

    /// Label used in logs and metrics
    pub fn outcome_label(&self) -> &'static str {
        match self {
            FetchResult::Success(_) => "success",
            FetchResult::RetryableFailure(_) => "retries_exhausted",
            FetchResult::TerminalFailure(_) => "terminal",
            FetchResult::BudgetExhausted => "budget_exhausted",
        }
    }
}

/// Status and body of an HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
}

impl RawResponse {
    /// Create a response
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 200 response with `body`
    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure below the HTTP layer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Request timed out
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other network failure
    #[error("network error: {0}")]
    Other(String),
}

/// Issues GET requests against the API
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `endpoint` with query `params`
    async fn get(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<RawResponse, TransportError>;
}

/// Request shaping options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Entries per station board request
    pub board_limit: u32,
    /// Connections per connection search
    pub connections_limit: u32,
    /// Request times are truncated to this many minutes
    pub slot_granularity_minutes: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            board_limit: STATION_BOARD_LIMIT,
            connections_limit: CONNECTIONS_LIMIT,
            slot_granularity_minutes: SLOT_GRANULARITY_MINUTES,
        }
    }
}

/// A prepared request: wire parameters plus the cache key they canonicalise to
struct PreparedRequest {
    category: Category,
    key: CacheKey,
    params: Vec<(String, String)>,
}

/// Cache-first, budget-aware client for the transport API
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    budget: Arc<RequestBudget>,
    cache: Arc<ResponseCache>,
    executor: RetryExecutor,
    pacer: RequestPacer,
    options: ClientOptions,
}

impl ApiClient {
    /// Assemble a client from its collaborators
    pub fn new(
        transport: Arc<dyn Transport>,
        budget: Arc<RequestBudget>,
        cache: Arc<ResponseCache>,
        executor: RetryExecutor,
    ) -> Self {
        Self {
            transport,
            budget,
            cache,
            executor,
            pacer: RequestPacer::disabled(),
            options: ClientOptions::default(),
        }
    }

    /// HTTP client against `base_url` with default ceilings, retry policy and pacing
    pub fn with_defaults(base_url: &str) -> Self {
        Self::new(
            Arc::new(HttpTransport::new(base_url)),
            Arc::new(RequestBudget::with_defaults()),
            Arc::new(ResponseCache::new()),
            RetryExecutor::new(RetryPolicy::default()),
        )
        .with_pacer(RequestPacer::default())
    }

    /// Replace the request options
    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the pacing between network calls
    pub fn with_pacer(mut self, pacer: RequestPacer) -> Self {
        self.pacer = pacer;
        self
    }

    /// Shared budget
    pub fn budget(&self) -> &Arc<RequestBudget> {
        &self.budget
    }

    /// Shared cache
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Search stations matching `query`. Not metered by default.
    pub async fn lookup_station(
        &self,
        query: &str,
    ) -> Result<FetchResult<Vec<Station>>, CacheError> {
        let request = PreparedRequest {
            category: Category::Locations,
            key: CacheKey::new(
                Category::Locations.endpoint(),
                [("query", normalize_station_name(query))],
            ),
            params: vec![
                ("query".to_string(), collapse_whitespace(query)),
                ("type".to_string(), "station".to_string()),
            ],
        };

        let payload = self.fetch_payload(request).await?;
        Ok(payload.and_then(|value| parser::parse_locations(&value).into()))
    }

    /// Station board for `station` at `window`
    pub async fn fetch_board(
        &self,
        station: &str,
        board_type: BoardType,
        window: TimeWindow,
    ) -> Result<FetchResult<Vec<BoardEntry>>, CacheError> {
        let request = self.board_request(station, board_type, window);
        let payload = self.fetch_payload(request).await?;
        Ok(payload.and_then(|value| parser::parse_board(&value).into()))
    }

    /// Connections from `from` to `to` departing around `window`
    pub async fn fetch_connections(
        &self,
        from: &str,
        to: &str,
        window: TimeWindow,
    ) -> Result<FetchResult<Vec<Connection>>, CacheError> {
        let request = self.connections_request(from, to, window);
        let payload = self.fetch_payload(request).await?;
        Ok(payload.and_then(|value| parser::parse_connections(&value).into()))
    }

    /// Cache key a board request canonicalises to
    pub fn board_key(&self, station: &str, board_type: BoardType, window: TimeWindow) -> CacheKey {
        self.board_request(station, board_type, window).key
    }

    /// Cache key a connection search canonicalises to
    pub fn connections_key(&self, from: &str, to: &str, window: TimeWindow) -> CacheKey {
        self.connections_request(from, to, window).key
    }

    fn truncated(&self, window: TimeWindow) -> TimeWindow {
        TimeWindow::new(
            window.date,
            window.slot.truncate_to(self.options.slot_granularity_minutes),
        )
    }

    fn board_request(
        &self,
        station: &str,
        board_type: BoardType,
        window: TimeWindow,
    ) -> PreparedRequest {
        let window = self.truncated(window);
        let datetime = format!("{} {}", window.date_param(), window.time_param());
        let limit = self.options.board_limit.to_string();

        PreparedRequest {
            category: Category::StationBoard,
            key: CacheKey::new(
                Category::StationBoard.endpoint(),
                [
                    ("station", normalize_station_name(station)),
                    ("type", board_type.to_string()),
                    ("datetime", datetime.clone()),
                    ("limit", limit.clone()),
                ],
            ),
            params: vec![
                ("station".to_string(), collapse_whitespace(station)),
                ("type".to_string(), board_type.to_string()),
                ("datetime".to_string(), datetime),
                ("limit".to_string(), limit),
            ],
        }
    }

    fn connections_request(&self, from: &str, to: &str, window: TimeWindow) -> PreparedRequest {
        let window = self.truncated(window);
        let limit = self.options.connections_limit.to_string();

        PreparedRequest {
            category: Category::Connections,
            key: CacheKey::new(
                Category::Connections.endpoint(),
                [
                    ("from", normalize_station_name(from)),
                    ("to", normalize_station_name(to)),
                    ("date", window.date_param()),
                    ("time", window.time_param()),
                    ("limit", limit.clone()),
                ],
            ),
            params: vec![
                ("from".to_string(), collapse_whitespace(from)),
                ("to".to_string(), collapse_whitespace(to)),
                ("date".to_string(), window.date_param()),
                ("time".to_string(), window.time_param()),
                ("limit".to_string(), limit),
            ],
        }
    }

    /// Cache lookup, budget reservation, then the retried network call.
    ///
    /// Reserved calls are not released on failure: the upstream counts them.
    async fn fetch_payload(
        &self,
        request: PreparedRequest,
    ) -> Result<FetchResult<serde_json::Value>, CacheError> {
        let PreparedRequest {
            category,
            key,
            params,
        } = request;

        if let Some(entry) = self.cache.lookup(&key) {
            debug!(%key, "Cache hit");
            crate::metrics::record_cache_hit(category);
            return Ok(FetchResult::Success(entry.value));
        }

        if !self.budget.try_reserve(category) {
            info!(
                %category,
                resets_at = ?self.budget.resets_at(category),
                "Daily budget exhausted, skipping request"
            );
            crate::metrics::record_budget_exhausted(category);
            return Ok(FetchResult::BudgetExhausted);
        }

        let start = Instant::now();
        let endpoint = category.endpoint();
        let target = key.to_string();
        let (transport, pacer, params) = (&self.transport, &self.pacer, &params);
        let result = self
            .executor
            .execute_for(&target, || async move {
                pacer.wait().await;
                transport.get(endpoint, params).await
            })
            .await;

        crate::metrics::record_api_call(category, result.outcome_label(), start.elapsed());

        match result {
            FetchResult::Success(value) => {
                self.cache.store(key, value.clone())?;
                Ok(FetchResult::Success(value))
            }
            other => {
                warn!(%category, %target, outcome = other.outcome_label(), "Request failed");
                Ok(other)
            }
        }
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("budget", &self.budget)
            .field("cache_entries", &self.cache.len())
            .field("options", &self.options)
            .finish()
    }
}

impl<T> From<Result<T, parser::PayloadError>> for FetchResult<T> {
    fn from(result: Result<T, parser::PayloadError>) -> Self {
        match result {
            Ok(value) => FetchResult::Success(value),
            Err(e) => FetchResult::TerminalFailure(e.to_string()),
        }
    }
}

/// Trim and collapse inner whitespace, preserving case
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
