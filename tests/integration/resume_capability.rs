//! Resuming collection across runs

use super::support::{board_request, budget, client, date, slots, FakeApi};
use std::sync::Arc;
use tempfile::TempDir;
use transit_collector::collector::summary::FailureKind;
use transit_collector::collector::{CollectionRequest, CollectionScheduler};
use transit_collector::fetcher::RawResponse;
use transit_collector::output::{CsvSink, MemorySink, PersistenceSink};
use transit_collector::resume::{self, RunState};
use transit_collector::shutdown::ShutdownCoordinator;
use transit_collector::{BoardType, Category};

fn scheduler(
    api: Arc<FakeApi>,
    board_ceiling: u32,
    sink: Arc<dyn PersistenceSink>,
) -> CollectionScheduler {
    CollectionScheduler::new(client(api, budget(board_ceiling, 100), 0), sink)
        .with_shutdown(ShutdownCoordinator::shared())
}

#[tokio::test]
async fn persisted_cells_are_skipped_on_the_next_run() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(CsvSink::new(dir.path()));
    let request = board_request(2, &["06:00", "07:00"]);

    let api = FakeApi::shared();
    let first = scheduler(api.clone(), 2, sink.clone()).run(&request).await.unwrap();
    assert_eq!(first.done, 2);
    assert_eq!(first.pending, 2);

    let api = FakeApi::shared();
    let second = scheduler(api.clone(), 100, Arc::new(CsvSink::new(dir.path())))
        .run(&request)
        .await
        .unwrap();
    assert_eq!(second.skipped_existing, 2);
    assert_eq!(second.done, 4);
    assert_eq!(api.call_count(), 2);

    let api = FakeApi::shared();
    let third = scheduler(api.clone(), 100, Arc::new(CsvSink::new(dir.path())))
        .run(&request)
        .await
        .unwrap();
    assert_eq!(third.skipped_existing, 4);
    assert!(third.is_complete());
    assert_eq!(api.call_count(), 0);
}

#[tokio::test]
async fn restored_budget_carries_consumption_into_the_next_process() {
    let dir = TempDir::new().unwrap();
    let state_path = resume::state_path(dir.path());

    let api = FakeApi::shared();
    let client = client(api.clone(), budget(3, 100), 0);
    let summary = CollectionScheduler::new(client.clone(), Arc::new(MemorySink::new()))
        .with_shutdown(ShutdownCoordinator::shared())
        .run(&board_request(1, &["06:00", "07:00"]))
        .await
        .unwrap();
    assert_eq!(summary.done, 2);

    let mut state = RunState::load_or_new(&state_path).unwrap();
    state.record_run(client.budget(), &summary);
    state.save(&state_path).unwrap();

    let loaded = RunState::load(&state_path).unwrap();
    let restored = budget(3, 100);
    restored.restore(loaded.budgets());
    assert_eq!(restored.remaining(Category::StationBoard), Some(1));

    let api = FakeApi::shared();
    let summary = CollectionScheduler::new(
        super::support::client(api.clone(), restored, 0),
        Arc::new(MemorySink::new()),
    )
    .with_shutdown(ShutdownCoordinator::shared())
    .run(&board_request(1, &["08:00", "09:00"]))
    .await
    .unwrap();

    assert_eq!(api.call_count(), 1);
    assert_eq!(summary.done, 1);
    assert_eq!(summary.pending, 1);
}

#[tokio::test]
async fn only_failed_cells_are_rerun() {
    let dir = TempDir::new().unwrap();
    let state_path = resume::state_path(dir.path());

    let api = FakeApi::shared();
    api.push("/stationboard", Ok(RawResponse::new(400, "no such station")));
    let client = client(api.clone(), budget(100, 100), 0);
    let summary = CollectionScheduler::new(client.clone(), Arc::new(MemorySink::new()))
        .with_shutdown(ShutdownCoordinator::shared())
        .run(&board_request(1, &["06:00", "07:00", "08:00"]))
        .await
        .unwrap();
    assert_eq!(summary.failures_of(FailureKind::Terminal).count(), 1);

    let mut state = RunState::new();
    state.record_run(client.budget(), &summary);
    state.save(&state_path).unwrap();

    let state = RunState::load(&state_path).unwrap();
    let failed = state.failed_cell_keys();
    assert_eq!(failed.len(), 1);

    let request = transit_collector::collector::CollectionRequest::builder(
        super::support::date(1),
        super::support::date(1),
    )
    .station("Luzern")
    .board_slots(super::support::slots(&["06:00", "07:00", "08:00"]))
    .only_cells(failed)
    .build()
    .unwrap();

    let api = FakeApi::shared();
    let sink = Arc::new(MemorySink::new());
    let rerun = scheduler(api.clone(), 100, sink.clone()).run(&request).await.unwrap();

    assert_eq!(api.call_count(), 1);
    assert_eq!(rerun.done, 1);
    assert_eq!(sink.written_keys()[0].slot.hour(), 6);
}

#[tokio::test]
async fn departure_boards_are_not_covered_by_arrival_runs() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(CsvSink::new(dir.path()));
    let board = |board_type: BoardType| {
        CollectionRequest::builder(date(1), date(1))
            .station("Luzern")
            .board_slots(slots(&["08:00"]))
            .board_type(board_type)
            .build()
            .unwrap()
    };

    let api = FakeApi::shared();
    let arrivals = scheduler(api.clone(), 100, sink.clone())
        .run(&board(BoardType::Arrival))
        .await
        .unwrap();
    assert_eq!(arrivals.done, 1);
    assert_eq!(api.call_count(), 1);

    let api = FakeApi::shared();
    let departures = scheduler(api.clone(), 100, sink.clone())
        .run(&board(BoardType::Departure))
        .await
        .unwrap();
    assert_eq!(departures.skipped_existing, 0);
    assert_eq!(departures.done, 1);
    assert_eq!(api.call_count(), 1);
    assert_eq!(api.calls()[0].param("type"), Some("departure"));

    let contents = std::fs::read_to_string(dir.path().join("2025-03/Luzern_2025-03-01.csv")).unwrap();
    let board_types: Vec<_> = contents
        .lines()
        .skip(1)
        .filter_map(|line| line.split(',').nth(2))
        .collect();
    assert_eq!(board_types, vec!["arrival", "departure"]);

    let api = FakeApi::shared();
    let again = scheduler(api.clone(), 100, Arc::new(CsvSink::new(dir.path())))
        .run(&board(BoardType::Arrival))
        .await
        .unwrap();
    assert_eq!(again.skipped_existing, 1);
    assert_eq!(api.call_count(), 0);
}
