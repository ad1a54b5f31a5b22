//! Run summary reported at the end of every collection run

use super::cell::{CellKey, CellStatus, ScheduleCell};
use crate::Category;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Why a cell was given up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The request cannot succeed as issued (4xx, bad payload)
    Terminal,
    /// Transient failures outlasted every retry
    RetriesExhausted,
}

/// A permanently failed cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedCell {
    /// Cell identity
    pub cell: CellKey,
    /// Failure class
    pub kind: FailureKind,
    /// Last error
    pub reason: String,
}

/// Why a category stopped before running out of cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// Daily allowance used up
    BudgetExhausted,
    /// Stop was requested
    Cancelled,
    /// Conflicting payloads for one cache key
    IntegrityViolation,
    /// The sink failed to persist a cell
    SinkFailure,
}

/// A halted category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryHalt {
    /// Halted category
    pub category: Category,
    /// Reason
    pub reason: HaltReason,
    /// Budget reset, when halted by the budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<DateTime<Utc>>,
}

/// Cell counts of one category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    /// Persisted cells
    pub done: usize,
    /// Given-up cells
    pub permanently_failed: usize,
    /// Cells still to do
    pub pending: usize,
}

/// Outcome of a collection run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Cells persisted, including those found already persisted
    pub done: usize,
    /// Cells given up
    pub permanently_failed: usize,
    /// Cells left for a later run
    pub pending: usize,
    /// Cells skipped because the sink already held them
    pub skipped_existing: usize,
    /// Earliest budget reset of a category halted by its budget
    pub next_budget_reset_at: Option<DateTime<Utc>>,
    /// Failed cells in processing order
    pub failures: Vec<FailedCell>,
    /// Halted categories
    pub halted: Vec<CategoryHalt>,
    /// Whether a stop was requested during the run
    pub cancelled: bool,
    /// Counts per category
    pub by_category: BTreeMap<Category, CategoryCounts>,
    /// Keys of the done cells, for settling earlier failures
    #[serde(skip)]
    pub completed: Vec<CellKey>,
}

impl RunSummary {
    /// Count cells and attach failures and halts
    pub fn from_cells<'a>(
        cells: impl IntoIterator<Item = &'a ScheduleCell>,
        skipped_existing: usize,
        failures: Vec<FailedCell>,
        halted: Vec<CategoryHalt>,
        cancelled: bool,
    ) -> Self {
        let mut summary = RunSummary {
            skipped_existing,
            failures,
            cancelled,
            ..Default::default()
        };

        for cell in cells {
            let counts = summary.by_category.entry(cell.key().category).or_default();
            match cell.status() {
                CellStatus::Done => {
                    summary.done += 1;
                    counts.done += 1;
                    summary.completed.push(cell.key().clone());
                }
                CellStatus::PermanentlyFailed => {
                    summary.permanently_failed += 1;
                    counts.permanently_failed += 1;
                }
                // an in-flight cell at summary time was never persisted
                CellStatus::Pending | CellStatus::InProgress => {
                    summary.pending += 1;
                    counts.pending += 1;
                }
            }
        }

        summary.next_budget_reset_at = halted
            .iter()
            .filter(|h| h.reason == HaltReason::BudgetExhausted)
            .filter_map(|h| h.resets_at)
            .min();
        summary.halted = halted;
        summary
    }

    /// Total cells in the run
    pub fn total(&self) -> usize {
        self.done + self.permanently_failed + self.pending
    }

    /// Whether every cell is done
    pub fn is_complete(&self) -> bool {
        self.pending == 0 && self.permanently_failed == 0
    }

    /// Whether any category stopped on its budget
    pub fn halted_by_budget(&self) -> bool {
        self.halted
            .iter()
            .any(|h| h.reason == HaltReason::BudgetExhausted)
    }

    /// Failures of one kind
    pub fn failures_of(&self, kind: FailureKind) -> impl Iterator<Item = &FailedCell> {
        self.failures.iter().filter(move |f| f.kind == kind)
    }

    /// Multi-line report for terminal output
    pub fn render_human(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Collection summary");
        let _ = writeln!(out, "  Done:               {}", self.done);
        let _ = writeln!(out, "    already present:  {}", self.skipped_existing);
        let _ = writeln!(out, "  Permanently failed: {}", self.permanently_failed);
        let _ = writeln!(out, "  Pending:            {}", self.pending);

        for (category, counts) in &self.by_category {
            let _ = writeln!(
                out,
                "  [{category}] done {} / failed {} / pending {}",
                counts.done, counts.permanently_failed, counts.pending
            );
        }

        for halt in &self.halted {
            let reason = match halt.reason {
                HaltReason::BudgetExhausted => "daily budget exhausted",
                HaltReason::Cancelled => "cancelled",
                HaltReason::IntegrityViolation => "cache integrity violation",
                HaltReason::SinkFailure => "sink failure",
            };
            match halt.resets_at {
                Some(at) => {
                    let _ = writeln!(out, "  {} halted: {reason} (resets at {at})", halt.category);
                }
                None => {
                    let _ = writeln!(out, "  {} halted: {reason}", halt.category);
                }
            }
        }

        if let Some(at) = self.next_budget_reset_at {
            let _ = writeln!(out, "  Next budget reset:  {}", at.format("%Y-%m-%d %H:%M UTC"));
        }
        if self.cancelled {
            let _ = writeln!(out, "  Run was cancelled; re-run to continue");
        }
        if !self.failures.is_empty() {
            let _ = writeln!(out, "  Failures:");
            for failure in &self.failures {
                let kind = match failure.kind {
                    FailureKind::Terminal => "terminal",
                    FailureKind::RetriesExhausted => "retries exhausted",
                };
                let _ = writeln!(out, "    - {} ({kind}): {}", failure.cell, failure.reason);
            }
        }
        out
    }
}
