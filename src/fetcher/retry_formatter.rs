//! Failure classification and retry log messages.
//!
//! Every failed attempt is mapped to a [`RetryErrorType`], which decides whether
//! the attempt is worth repeating and supplies the wording used in logs.

use super::TransportError;
use crate::collector::config::RATE_LIMIT_STATUS;
use std::time::Duration;

/// Classification of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Request timed out
    NetworkTimeout,
    /// Connection refused, DNS failure, or other offline scenarios
    NetworkOffline,
    /// HTTP 429 rate limit exceeded
    RateLimit,
    /// Another configured transient status (e.g., 408)
    TransientStatus(u16),
    /// HTTP 5xx server error
    ServerError(u16),
    /// HTTP 400 invalid request (unknown station, bad date)
    InvalidRequest,
    /// Other client errors (4xx)
    ClientError(u16),
    /// Body is not the JSON document the endpoint promises
    MalformedPayload,
    /// Generic fallback when no better classification fits
    NetworkGeneric,
}

impl RetryErrorType {
    /// Short description used inside log messages
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "rate limit exceeded",
            Self::TransientStatus(408) => "request timeout",
            Self::TransientStatus(_) => "transient client error",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::InvalidRequest => "invalid request",
            Self::ClientError(404) => "resource not found",
            Self::ClientError(_) => "client error",
            Self::MalformedPayload => "malformed payload",
            Self::NetworkGeneric => "network error",
        }
    }

    /// Suggested remediation shown with the final failure
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check your network connection and firewall settings",
            Self::NetworkOffline => "Verify internet connectivity and DNS resolution",
            Self::RateLimit => "The API is throttling this client, lower the daily ceilings",
            Self::TransientStatus(_) => "Retry the failed cells later with --only-failed",
            Self::ServerError(_) => "The transport API may be experiencing issues, try again later",
            Self::InvalidRequest => "Check station names and the date range for typos",
            Self::ClientError(_) => "Review request parameters against the API documentation",
            Self::MalformedPayload => "Check --base-url points at the transport API",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }

    /// Whether repeating the request can succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidRequest | Self::ClientError(_) | Self::MalformedPayload
        )
    }

    /// Classify a non-success HTTP status. A 4xx status is retryable only when
    /// `transient_statuses` lists it, 429 included; 5xx always is.
    pub fn from_status(status: u16, transient_statuses: &[u16]) -> Self {
        match status {
            s if transient_statuses.contains(&s) && s == RATE_LIMIT_STATUS => Self::RateLimit,
            s if transient_statuses.contains(&s) => Self::TransientStatus(s),
            500..=599 => Self::ServerError(status),
            400 => Self::InvalidRequest,
            _ => Self::ClientError(status),
        }
    }

    /// Classify a transport-level failure
    pub fn from_transport(err: &TransportError) -> Self {
        match err {
            TransportError::Timeout(_) => Self::NetworkTimeout,
            TransportError::Connect(_) => Self::NetworkOffline,
            TransportError::Other(_) => Self::NetworkGeneric,
        }
    }
}

/// Context for formatting retry messages
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Type of error that triggered the retry
    pub error_type: RetryErrorType,
    /// Wait before the next attempt
    pub backoff_duration: Duration,
    /// What was being fetched (e.g., "/stationboard?station=luzern")
    pub target: String,
    /// Original error message
    pub error_message: String,
}

impl RetryContext {
    /// Create a context
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        error_type: RetryErrorType,
        backoff_duration: Duration,
        target: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type,
            backoff_duration,
            target: target.into(),
            error_message: error_message.into(),
        }
    }

    /// One-line retry message
    pub fn format_retry(&self) -> String {
        let mut message = format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds...",
            self.attempt,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64()
        );
        append_target(&mut message, &self.target);
        message
    }

    /// Message logged when a retried request finally succeeds
    pub fn format_success(&self) -> String {
        let mut message = format!(
            "Retry attempt {}/{} succeeded",
            self.attempt, self.max_attempts
        );
        append_target(&mut message, &self.target);
        message
    }

    /// Multi-line summary after the last attempt failed
    pub fn format_failure(&self) -> String {
        let target = if self.target.is_empty() {
            "unknown"
        } else {
            &self.target
        };
        let mut lines = vec![
            format!("[FAILED] Request failed after {} attempts", self.attempt),
            format!("  Last error: {}", self.error_message),
            format!("  Request: {target}"),
            "  Suggestions:".to_string(),
        ];
        lines.extend(
            self.format_suggestions()
                .into_iter()
                .map(|s| format!("    - {s}")),
        );
        lines.join("\n")
    }

    /// Suggestions tailored to the context
    pub fn format_suggestions(&self) -> Vec<String> {
        let mut suggestions = vec![self.error_type.suggestion().to_string()];
        if self.error_type.is_retryable() {
            suggestions.push(format!(
                "Try increasing --max-retries (current: {})",
                self.max_attempts.saturating_sub(1)
            ));
        }
        suggestions
    }
}

fn append_target(buffer: &mut String, target: &str) {
    if !target.is_empty() {
        buffer.push_str(" (");
        buffer.push_str(target);
        buffer.push(')');
    }
}
