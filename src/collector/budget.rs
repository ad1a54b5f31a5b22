//! Per-category daily request budget
//!
//! Each metered category has an independent ceiling that resets at the next UTC
//! midnight. Rollover is applied lazily on access, so a long-running process picks
//! up the new day on its first reservation after midnight.

use crate::Category;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Source of the current time, injectable for tests
pub trait Clock: Send + Sync + Debug {
    /// Current UTC instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for deterministic tests and dry runs
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `now`
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Jump to an absolute instant
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    /// Move forward by `by`
    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Remaining allowance of one category for the current UTC day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetState {
    category: Category,
    remaining: u32,
    ceiling: u32,
    resets_at: DateTime<Utc>,
}

impl BudgetState {
    /// Fresh state with the full ceiling available until the next UTC midnight
    pub fn new(category: Category, ceiling: u32, now: DateTime<Utc>) -> Self {
        Self {
            category,
            remaining: ceiling,
            ceiling,
            resets_at: next_utc_midnight(now),
        }
    }

    /// Category this state meters
    pub fn category(&self) -> Category {
        self.category
    }

    /// Calls left today
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Daily ceiling
    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Next reset instant
    pub fn resets_at(&self) -> DateTime<Utc> {
        self.resets_at
    }

    /// Calls consumed since the last reset
    pub fn used(&self) -> u32 {
        self.ceiling.saturating_sub(self.remaining)
    }

    /// Refill when `now` has reached `resets_at`. Returns true if a reset happened.
    fn roll_over_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if now < self.resets_at {
            return false;
        }
        while self.resets_at <= now {
            self.resets_at += ChronoDuration::days(1);
        }
        self.remaining = self.ceiling;
        true
    }
}

/// First UTC midnight strictly after `now`
fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + ChronoDuration::days(1);
    tomorrow
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(now + ChronoDuration::days(1))
}

/// Thread-safe daily call budget, one [`BudgetState`] per metered category.
///
/// Categories without a configured ceiling are unmetered: reservations always
/// succeed and nothing is tracked for them.
#[derive(Debug)]
pub struct RequestBudget {
    states: Mutex<HashMap<Category, BudgetState>>,
    clock: Arc<dyn Clock>,
}

impl RequestBudget {
    /// Create a budget backed by the wall clock
    pub fn new(ceilings: impl IntoIterator<Item = (Category, u32)>) -> Self {
        Self::with_clock(ceilings, Arc::new(SystemClock))
    }

    /// Create a budget with the default ceilings
    pub fn with_defaults() -> Self {
        Self::new(super::config::default_ceilings())
    }

    /// Create a budget with an injected clock
    pub fn with_clock(
        ceilings: impl IntoIterator<Item = (Category, u32)>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        let states = ceilings
            .into_iter()
            .map(|(category, ceiling)| {
                if ceiling == 0 {
                    warn!(%category, "Zero daily ceiling configured, using 1");
                }
                (category, BudgetState::new(category, ceiling.max(1), now))
            })
            .collect();

        Self {
            states: Mutex::new(states),
            clock,
        }
    }

    fn states(&self) -> MutexGuard<'_, HashMap<Category, BudgetState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn roll_over(state: &mut BudgetState, now: DateTime<Utc>) {
        if state.roll_over_if_due(now) {
            info!(
                category = %state.category,
                ceiling = state.ceiling,
                resets_at = %state.resets_at,
                "Daily budget reset"
            );
        }
    }

    /// Reserve one call for `category`.
    ///
    /// Returns false, without changing anything, when today's allowance is used up.
    pub fn try_reserve(&self, category: Category) -> bool {
        let now = self.clock.now();
        let mut states = self.states();
        let Some(state) = states.get_mut(&category) else {
            return true;
        };

        Self::roll_over(state, now);

        if state.remaining == 0 {
            debug!(%category, resets_at = %state.resets_at, "Budget exhausted");
            return false;
        }

        state.remaining -= 1;
        crate::metrics::record_budget_remaining(category, state.remaining);
        true
    }

    /// Give back one call. Never raises `remaining` above the ceiling.
    pub fn release(&self, category: Category) {
        let mut states = self.states();
        if let Some(state) = states.get_mut(&category) {
            if state.remaining < state.ceiling {
                state.remaining += 1;
            } else {
                warn!(%category, "Release ignored, budget already at ceiling");
            }
        }
    }

    /// Whether `category` has a ceiling
    pub fn is_metered(&self, category: Category) -> bool {
        self.states().contains_key(&category)
    }

    /// Calls left for `category` today; `None` when unmetered
    pub fn remaining(&self, category: Category) -> Option<u32> {
        let now = self.clock.now();
        let mut states = self.states();
        states.get_mut(&category).map(|state| {
            Self::roll_over(state, now);
            state.remaining
        })
    }

    /// Next reset of `category`; `None` when unmetered
    pub fn resets_at(&self, category: Category) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        let mut states = self.states();
        states.get_mut(&category).map(|state| {
            Self::roll_over(state, now);
            state.resets_at
        })
    }

    /// Earliest upcoming reset across all metered categories
    pub fn earliest_reset(&self) -> Option<DateTime<Utc>> {
        self.snapshot().iter().map(BudgetState::resets_at).min()
    }

    /// Current state of every metered category, sorted by category
    pub fn snapshot(&self) -> Vec<BudgetState> {
        let now = self.clock.now();
        let mut states = self.states();
        let mut snapshot: Vec<BudgetState> = states
            .values_mut()
            .map(|state| {
                Self::roll_over(state, now);
                state.clone()
            })
            .collect();
        snapshot.sort_by_key(|state| state.category);
        snapshot
    }

    /// Carry over consumption recorded by an earlier process.
    ///
    /// Only categories configured on this budget are restored. The configured
    /// ceiling wins; calls already used count against it. Snapshots whose reset
    /// instant has passed are discarded by the rollover check.
    pub fn restore(&self, saved: &[BudgetState]) {
        let now = self.clock.now();
        let mut states = self.states();

        for saved_state in saved {
            let Some(state) = states.get_mut(&saved_state.category) else {
                debug!(category = %saved_state.category, "Ignoring snapshot for unmetered category");
                continue;
            };

            let mut restored = saved_state.clone();
            if restored.roll_over_if_due(now) {
                debug!(category = %restored.category, "Saved budget is from an earlier day");
                continue;
            }

            state.remaining = state.ceiling.saturating_sub(restored.used());
            state.resets_at = restored.resets_at;

            info!(
                category = %state.category,
                remaining = state.remaining,
                ceiling = state.ceiling,
                "Restored budget from previous run"
            );
        }
    }
}
