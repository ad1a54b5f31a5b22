//! Collection scheduler
//!
//! Expands a [`CollectionRequest`] into cells and drives them to completion, one
//! sequential loop per category. Category loops run concurrently since their
//! budgets are independent.

use super::cache::CacheError;
use super::cell::{CellKey, CellTarget, CollectionRequest, ScheduleCell};
use super::summary::{CategoryHalt, FailedCell, FailureKind, HaltReason, RunSummary};
use super::CollectError;
use crate::fetcher::{ApiClient, FetchResult};
use crate::output::{CellRecords, OutputError, PersistenceSink};
use crate::shutdown::{self, SharedShutdown, ShutdownCoordinator};
use crate::Category;
use indicatif::ProgressBar;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Run-fatal condition raised inside a category loop
#[derive(Debug)]
enum Fatal {
    Integrity(CacheError),
    Sink(OutputError),
}

/// What one category loop produced
#[derive(Debug)]
struct CategoryRun {
    cells: Vec<ScheduleCell>,
    skipped_existing: usize,
    failures: Vec<FailedCell>,
    halt: Option<CategoryHalt>,
    fatal: Option<Fatal>,
}

impl CategoryRun {
    fn new() -> Self {
        Self {
            cells: Vec::new(),
            skipped_existing: 0,
            failures: Vec::new(),
            halt: None,
            fatal: None,
        }
    }
}

/// Drives cells through the API client into the sink
pub struct CollectionScheduler {
    client: Arc<ApiClient>,
    sink: Arc<dyn PersistenceSink>,
    shutdown: Option<SharedShutdown>,
    progress: Option<ProgressBar>,
}

impl CollectionScheduler {
    /// Create a scheduler. Picks up the global shutdown handle when one is registered.
    pub fn new(client: Arc<ApiClient>, sink: Arc<dyn PersistenceSink>) -> Self {
        Self {
            client,
            sink,
            shutdown: shutdown::get_global_shutdown(),
            progress: None,
        }
    }

    /// Attach a shared shutdown handle for graceful cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Tick `progress` once per processed cell
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// API client used by this scheduler
    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    /// Collect every cell of `request`.
    ///
    /// Budget exhaustion, cancellation and failed cells end the run normally with a
    /// summary. A cache conflict or sink failure stops every category and is
    /// returned as an error carrying the partial summary.
    pub async fn run(&self, request: &CollectionRequest) -> Result<RunSummary, CollectError> {
        request.validate()?;

        if let Some(progress) = &self.progress {
            progress.set_length(request.total_cells() as u64);
        }

        info!(
            start_date = %request.start_date,
            end_date = %request.end_date,
            categories = ?request.categories,
            total_cells = request.total_cells(),
            "Starting collection run"
        );

        // stops sibling categories when one hits a run-fatal error
        let abort = ShutdownCoordinator::new();
        let runs = futures::future::join_all(
            request
                .categories
                .iter()
                .map(|category| self.run_category(request, *category, &abort)),
        )
        .await;

        let mut cells = Vec::new();
        let mut skipped_existing = 0;
        let mut failures = Vec::new();
        let mut halted = Vec::new();
        let mut fatal = None;
        for run in runs {
            cells.extend(run.cells);
            skipped_existing += run.skipped_existing;
            failures.extend(run.failures);
            halted.extend(run.halt);
            if fatal.is_none() {
                fatal = run.fatal;
            }
        }

        let summary = RunSummary::from_cells(
            &cells,
            skipped_existing,
            failures,
            halted,
            self.stop_requested(),
        );

        if let Some(progress) = &self.progress {
            progress.finish_and_clear();
        }

        info!(
            done = summary.done,
            permanently_failed = summary.permanently_failed,
            pending = summary.pending,
            skipped_existing = summary.skipped_existing,
            cancelled = summary.cancelled,
            next_budget_reset_at = ?summary.next_budget_reset_at,
            "Collection run finished"
        );

        match fatal {
            None => Ok(summary),
            Some(Fatal::Integrity(source)) => Err(CollectError::Integrity {
                source,
                summary: Box::new(summary),
            }),
            Some(Fatal::Sink(source)) => Err(CollectError::Sink {
                source,
                summary: Box::new(summary),
            }),
        }
    }

    async fn run_category(
        &self,
        request: &CollectionRequest,
        category: Category,
        abort: &ShutdownCoordinator,
    ) -> CategoryRun {
        let mut run = CategoryRun::new();

        let mut keys = request.cell_keys(category).into_iter();
        while let Some(key) = keys.next() {
            match self.sink.exists(&key).await {
                Ok(true) => {
                    run.skipped_existing += 1;
                    run.cells.push(ScheduleCell::already_done(key));
                }
                Ok(false) => run.cells.push(ScheduleCell::new(key)),
                Err(e) => {
                    error!(category = %category, cell = %key, error = %e, "Sink lookup failed");
                    run.cells.push(ScheduleCell::new(key));
                    run.cells.extend(keys.by_ref().map(ScheduleCell::new));
                    run.halt = Some(halt(category, HaltReason::SinkFailure, None));
                    run.fatal = Some(Fatal::Sink(e));
                    abort.request_shutdown();
                    return run;
                }
            }
        }

        if run.skipped_existing > 0 {
            info!(
                category = %category,
                skipped = run.skipped_existing,
                "Skipping cells already persisted"
            );
            self.tick(run.skipped_existing as u64);
        }

        for index in 0..run.cells.len() {
            if !run.cells[index].begin() {
                continue;
            }

            if self.stop_requested() || abort.is_shutdown_requested() {
                run.cells[index].abandon();
                run.halt = Some(halt(category, HaltReason::Cancelled, None));
                break;
            }

            let key = run.cells[index].key().clone();
            let outcome = tokio::select! {
                biased;
                _ = self.stop_signal(abort) => None,
                result = self.fetch_cell(request, &key) => Some(result),
            };

            let Some(outcome) = outcome else {
                info!(category = %category, cell = %key, "Stop requested, in-flight cell dropped");
                run.cells[index].abandon();
                run.halt = Some(halt(category, HaltReason::Cancelled, None));
                break;
            };

            match outcome {
                Err(e) => {
                    error!(category = %category, cell = %key, error = %e, "Cache integrity violation");
                    run.cells[index].abandon();
                    run.halt = Some(halt(category, HaltReason::IntegrityViolation, None));
                    run.fatal = Some(Fatal::Integrity(e));
                    abort.request_shutdown();
                    break;
                }
                Ok(FetchResult::Success(records)) => {
                    if let Err(e) = self.sink.write(&key, &records).await {
                        error!(category = %category, cell = %key, error = %e, "Sink write failed");
                        run.cells[index].abandon();
                        run.halt = Some(halt(category, HaltReason::SinkFailure, None));
                        run.fatal = Some(Fatal::Sink(e));
                        abort.request_shutdown();
                        break;
                    }
                    run.cells[index].complete();
                    crate::metrics::record_cell_outcome(category, "done");
                    debug!(category = %category, cell = %key, rows = records.len(), "Cell done");
                }
                Ok(FetchResult::BudgetExhausted) => {
                    run.cells[index].abandon();
                    let resets_at = self.client.budget().resets_at(category);
                    warn!(
                        category = %category,
                        cell = %key,
                        resets_at = ?resets_at,
                        "Daily budget exhausted, remaining cells stay pending"
                    );
                    run.halt = Some(halt(category, HaltReason::BudgetExhausted, resets_at));
                    break;
                }
                Ok(FetchResult::TerminalFailure(reason)) => {
                    run.cells[index].fail();
                    crate::metrics::record_cell_outcome(category, "terminal_failure");
                    warn!(category = %category, cell = %key, reason = %reason, "Cell failed permanently");
                    run.failures.push(FailedCell {
                        cell: key,
                        kind: FailureKind::Terminal,
                        reason,
                    });
                }
                Ok(FetchResult::RetryableFailure(reason)) => {
                    run.cells[index].fail();
                    crate::metrics::record_cell_outcome(category, "retries_exhausted");
                    warn!(category = %category, cell = %key, reason = %reason, "Cell failed after retries");
                    run.failures.push(FailedCell {
                        cell: key,
                        kind: FailureKind::RetriesExhausted,
                        reason,
                    });
                }
            }
            self.tick(1);
        }

        run
    }

    async fn fetch_cell(
        &self,
        request: &CollectionRequest,
        key: &CellKey,
    ) -> Result<FetchResult<CellRecords>, CacheError> {
        let window = key.window();
        match &key.target {
            CellTarget::Station { name, id } => {
                let station = id.as_deref().unwrap_or(name);
                let board_type = key.board_type.unwrap_or(request.board_type);
                let result = self.client.fetch_board(station, board_type, window).await?;
                Ok(result.map(|entries| CellRecords::Board {
                    board_type,
                    entries,
                }))
            }
            CellTarget::Pair { from, to } => {
                let result = self.client.fetch_connections(from, to, window).await?;
                Ok(result.map(CellRecords::Connections))
            }
        }
    }

    async fn stop_signal(&self, abort: &ShutdownCoordinator) {
        match &self.shutdown {
            Some(shutdown) => {
                tokio::select! {
                    _ = shutdown.wait_for_shutdown() => {},
                    _ = abort.wait_for_shutdown() => {},
                }
            }
            None => abort.wait_for_shutdown().await,
        }
    }

    fn stop_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }

    fn tick(&self, cells: u64) {
        if let Some(progress) = &self.progress {
            progress.inc(cells);
        }
    }
}

impl std::fmt::Debug for CollectionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionScheduler")
            .field("client", &self.client)
            .field("has_shutdown", &self.shutdown.is_some())
            .finish()
    }
}

fn halt(
    category: Category,
    reason: HaltReason,
    resets_at: Option<chrono::DateTime<chrono::Utc>>,
) -> CategoryHalt {
    CategoryHalt {
        category,
        reason,
        resets_at,
    }
}
