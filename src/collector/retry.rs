//! Bounded retry with exponential backoff
//!
//! The executor runs one logical request up to `max_attempts` times. Transient
//! failures (timeouts, connection errors, 5xx, listed transient statuses) are
//! retried after `min(base * 2^n + jitter, max)`; anything else ends the call
//! immediately. Budget accounting is not done here.

use super::config::{
    calculate_backoff, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS, MAX_RETRIES, TRANSIENT_STATUS_CODES,
};
use crate::fetcher::retry_formatter::{RetryContext, RetryErrorType};
use crate::fetcher::{FetchResult, RawResponse, TransportError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest body excerpt quoted in failure reasons
const MAX_BODY_EXCERPT: usize = 200;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (at least 1)
    pub max_attempts: u32,
    /// Backoff base
    pub base_delay: Duration,
    /// Backoff cap
    pub max_delay: Duration,
    /// 4xx statuses treated as transient, 429 included
    pub transient_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRIES + 1,
            base_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            transient_statuses: TRANSIENT_STATUS_CODES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Allow `retries` retries after the first attempt
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_attempts = retries.saturating_add(1);
        self
    }

    /// Override the backoff base
    pub fn with_base_delay(mut self, base: Duration) -> Self {
        self.base_delay = base;
        self
    }

    /// Override the backoff cap
    pub fn with_max_delay(mut self, max: Duration) -> Self {
        self.max_delay = max;
        self
    }

    /// Override the transient status list
    pub fn with_transient_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.transient_statuses = statuses;
        self
    }
}

/// What happened during one executed call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryTrace {
    /// Attempts made
    pub attempts: u32,
    /// Waits between attempts, in order
    pub delays: Vec<Duration>,
}

/// Runs operations under a [`RetryPolicy`]
#[derive(Debug)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    rng: Mutex<StdRng>,
}

impl RetryExecutor {
    /// Executor with entropy-seeded jitter
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_rng(policy, StdRng::from_entropy())
    }

    /// Executor with reproducible jitter
    pub fn with_seed(policy: RetryPolicy, seed: u64) -> Self {
        Self::with_rng(policy, StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut policy: RetryPolicy, rng: StdRng) -> Self {
        policy.max_attempts = policy.max_attempts.max(1);
        Self {
            policy,
            rng: Mutex::new(rng),
        }
    }

    /// Active policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails terminally, or attempts run out
    pub async fn execute<F, Fut>(&self, operation: F) -> FetchResult<serde_json::Value>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<RawResponse, TransportError>>,
    {
        self.execute_traced("", operation).await.0
    }

    /// Like [`execute`](Self::execute), with `target` named in log messages
    pub async fn execute_for<F, Fut>(&self, target: &str, operation: F) -> FetchResult<serde_json::Value>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<RawResponse, TransportError>>,
    {
        self.execute_traced(target, operation).await.0
    }

    /// Run `operation` and report the attempts and waits it took
    pub async fn execute_traced<F, Fut>(
        &self,
        target: &str,
        mut operation: F,
    ) -> (FetchResult<serde_json::Value>, RetryTrace)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<RawResponse, TransportError>>,
    {
        let max_attempts = self.policy.max_attempts;
        let mut trace = RetryTrace::default();
        let mut last_failure: Option<(RetryErrorType, String)> = None;

        for attempt in 0..max_attempts {
            trace.attempts = attempt + 1;

            let (error_type, reason) = match operation().await {
                Ok(response) if response.is_success() => {
                    return match serde_json::from_str::<serde_json::Value>(&response.body) {
                        Ok(value) => {
                            if attempt > 0 {
                                let ctx = RetryContext::new(
                                    attempt + 1,
                                    max_attempts,
                                    last_failure
                                        .as_ref()
                                        .map(|(t, _)| *t)
                                        .unwrap_or(RetryErrorType::NetworkGeneric),
                                    Duration::ZERO,
                                    target,
                                    "",
                                );
                                info!("{}", ctx.format_success());
                            }
                            (FetchResult::Success(value), trace)
                        }
                        Err(e) => {
                            warn!(request = target, error = %e, "Response body is not JSON");
                            (
                                FetchResult::TerminalFailure(format!(
                                    "{}: {e}",
                                    RetryErrorType::MalformedPayload.description()
                                )),
                                trace,
                            )
                        }
                    };
                }
                Ok(response) => (
                    RetryErrorType::from_status(response.status, &self.policy.transient_statuses),
                    format!("HTTP {}: {}", response.status, excerpt(&response.body)),
                ),
                Err(e) => (RetryErrorType::from_transport(&e), e.to_string()),
            };

            if !error_type.is_retryable() {
                warn!(
                    request = target,
                    attempt = attempt + 1,
                    error_type = error_type.description(),
                    "Non-retryable failure: {}",
                    reason
                );
                return (FetchResult::TerminalFailure(reason), trace);
            }

            if attempt + 1 < max_attempts {
                let delay = self.next_delay(attempt);
                let ctx = RetryContext::new(
                    attempt + 1,
                    max_attempts,
                    error_type,
                    delay,
                    target,
                    reason.clone(),
                );
                warn!("{}", ctx.format_retry());
                crate::metrics::record_retry_backoff(delay, attempt + 1);
                trace.delays.push(delay);
                tokio::time::sleep(delay).await;
            } else {
                let ctx = RetryContext::new(
                    attempt + 1,
                    max_attempts,
                    error_type,
                    Duration::ZERO,
                    target,
                    reason.clone(),
                );
                warn!("{}", ctx.format_failure());
            }

            last_failure = Some((error_type, reason));
        }

        let reason = last_failure
            .map(|(_, reason)| reason)
            .unwrap_or_else(|| "no attempt made".to_string());
        (
            FetchResult::RetryableFailure(format!(
                "retries exhausted after {max_attempts} attempts: {reason}"
            )),
            trace,
        )
    }

    /// Wait after failed attempt `attempt` (0-based), jitter drawn from `[0, base)`
    fn next_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.policy.base_delay.as_millis() as u64;
        let jitter_ms = if base_ms == 0 {
            0
        } else {
            self.rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .gen_range(0..base_ms)
        };
        let delay = calculate_backoff(
            attempt,
            self.policy.base_delay,
            self.policy.max_delay,
            Duration::from_millis(jitter_ms),
        );
        debug!(attempt, jitter_ms, delay_ms = delay.as_millis() as u64, "Computed backoff");
        delay
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_BODY_EXCERPT) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
