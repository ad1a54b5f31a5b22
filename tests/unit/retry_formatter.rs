//! Unit tests for retry classification and messages

use std::time::Duration;
use transit_collector::fetcher::retry_formatter::{RetryContext, RetryErrorType};
use transit_collector::fetcher::TransportError;

const TRANSIENT: &[u16] = &[408, 429];

#[test]
fn test_status_classification() {
    assert!(RetryErrorType::from_status(503, TRANSIENT).is_retryable());
    assert!(RetryErrorType::from_status(429, TRANSIENT).is_retryable());
    assert!(RetryErrorType::from_status(408, TRANSIENT).is_retryable());
    assert!(!RetryErrorType::from_status(400, TRANSIENT).is_retryable());
    assert!(!RetryErrorType::from_status(404, TRANSIENT).is_retryable());
}

#[test]
fn test_transport_errors_are_retryable() {
    for err in [
        TransportError::Timeout("t".to_string()),
        TransportError::Connect("c".to_string()),
        TransportError::Other("o".to_string()),
    ] {
        assert!(RetryErrorType::from_transport(&err).is_retryable());
    }
}

#[test]
fn test_retry_message_names_attempt_and_wait() {
    let ctx = RetryContext::new(
        2,
        4,
        RetryErrorType::from_status(503, TRANSIENT),
        Duration::from_millis(10_500),
        "/stationboard?station=luzern",
        "HTTP 503",
    );
    let message = ctx.format_retry();
    assert!(message.contains("attempt 2/4"));
    assert!(message.contains("10.5 seconds"));
    assert!(message.contains("/stationboard?station=luzern"));
}

#[test]
fn test_failure_message_lists_suggestions() {
    let ctx = RetryContext::new(
        4,
        4,
        RetryErrorType::from_transport(&TransportError::Timeout("read".to_string())),
        Duration::ZERO,
        "",
        "request timed out: read",
    );
    let message = ctx.format_failure();
    assert!(message.starts_with("[FAILED] Request failed after 4 attempts"));
    assert!(message.contains("Request: unknown"));
    assert!(message.contains("    - "));
}
