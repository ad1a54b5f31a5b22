//! Observability metrics for the collector
//!
//! Tracks API calls per category, cache hits, remaining daily budget, retry
//! backoff and cell outcomes.
//!
//! ## Architecture
//!
//! - Uses `metrics` crate for low-overhead metric collection
//! - Optional Prometheus exporter for scraping (`--metrics-addr`)
//! - Recording is a no-op until a recorder is installed

use crate::Category;
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Initialize metrics system with Prometheus exporter
///
/// The function is idempotent and will not reinitialize if already called.
///
/// # Arguments
/// * `addr` - Socket address to bind the scrape endpoint (e.g., "127.0.0.1:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "api_calls_total",
        Unit::Count,
        "Network calls issued, by category and outcome"
    );

    describe_histogram!(
        "api_call_duration_seconds",
        Unit::Seconds,
        "Duration of a logical API call including retries"
    );

    describe_counter!(
        "cache_hits_total",
        Unit::Count,
        "Requests answered from the response cache"
    );

    describe_counter!(
        "budget_exhausted_total",
        Unit::Count,
        "Requests refused because the daily budget was used up"
    );

    describe_gauge!(
        "budget_remaining",
        Unit::Count,
        "Calls left in today's budget"
    );

    describe_counter!(
        "http_retries_total",
        Unit::Count,
        "Total number of retry attempts"
    );

    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );

    describe_counter!(
        "cells_total",
        Unit::Count,
        "Processed cells, by category and outcome"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Record a finished logical API call
pub fn record_api_call(category: Category, outcome: &str, duration: Duration) {
    counter!(
        "api_calls_total",
        "category" => category.to_string(),
        "outcome" => outcome.to_string(),
    )
    .increment(1);

    histogram!(
        "api_call_duration_seconds",
        "category" => category.to_string(),
    )
    .record(duration.as_secs_f64());
}

/// Record a request answered from the cache
pub fn record_cache_hit(category: Category) {
    counter!("cache_hits_total", "category" => category.to_string()).increment(1);
}

/// Record a request refused by the budget
pub fn record_budget_exhausted(category: Category) {
    counter!("budget_exhausted_total", "category" => category.to_string()).increment(1);
}

/// Record the remaining allowance after a reservation
pub fn record_budget_remaining(category: Category, remaining: u32) {
    gauge!("budget_remaining", "category" => category.to_string()).set(remaining as f64);

    if remaining == 0 {
        warn!(category = %category, "Daily budget used up");
    }
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!(
        "http_retries_total",
        "attempt" => attempt.to_string(),
    )
    .increment(1);

    histogram!(
        "retry_backoff_duration_seconds",
        "attempt" => attempt.to_string(),
    )
    .record(duration.as_secs_f64());

    debug!(
        attempt = attempt,
        backoff_ms = duration.as_millis(),
        "Retry backoff recorded"
    );
}

/// Record the final state of a processed cell
pub fn record_cell_outcome(category: Category, outcome: &str) {
    counter!(
        "cells_total",
        "category" => category.to_string(),
        "outcome" => outcome.to_string(),
    )
    .increment(1);
}
