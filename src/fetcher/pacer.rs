//! Minimum spacing between outgoing requests
//!
//! The daily budget bounds how many calls are made; the pacer bounds how fast.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Default gap between two network calls
pub const DEFAULT_REQUEST_INTERVAL: Duration = Duration::from_millis(500);

/// Spaces requests at least `interval` apart across all callers
#[derive(Debug)]
pub struct RequestPacer {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RequestPacer {
    /// Pacer with a fixed interval
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Pacer that never waits
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Configured interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the next request may be sent, then claim that slot.
    pub async fn wait(&self) {
        if self.interval.is_zero() {
            return;
        }

        let mut next_slot = self.next_slot.lock().await;
        let now = Instant::now();
        if let Some(slot) = *next_slot {
            if slot > now {
                debug!(wait_ms = (slot - now).as_millis() as u64, "Pacing request");
                sleep_until(slot).await;
            }
        }
        *next_slot = Some(Instant::now() + self.interval);
    }
}

impl Default for RequestPacer {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_INTERVAL)
    }
}
