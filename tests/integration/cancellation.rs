//! Cooperative stop behaviour of the scheduler

use super::support::{board_request, budget, client, FakeApi};
use std::sync::Arc;
use transit_collector::collector::summary::HaltReason;
use transit_collector::collector::CollectionScheduler;
use transit_collector::output::MemorySink;
use transit_collector::shutdown::ShutdownCoordinator;

#[tokio::test]
async fn stop_before_start_makes_no_calls() {
    let api = FakeApi::shared();
    let sink = Arc::new(MemorySink::new());
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let summary = CollectionScheduler::new(client(api.clone(), budget(100, 100), 0), sink.clone())
        .with_shutdown(shutdown)
        .run(&board_request(1, &["06:00", "07:00"]))
        .await
        .unwrap();

    assert_eq!(api.call_count(), 0);
    assert_eq!(summary.done, 0);
    assert_eq!(summary.pending, 2);
    assert!(summary.cancelled);
    assert!(sink.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn in_flight_cell_is_dropped_and_stays_pending() {
    let api = FakeApi::shared();
    let shutdown = ShutdownCoordinator::shared();
    api.stall_from(3);
    api.on_call({
        let shutdown = shutdown.clone();
        move |n| {
            if n == 3 {
                shutdown.request_shutdown();
            }
        }
    });

    let sink = Arc::new(MemorySink::new());
    let summary = CollectionScheduler::new(client(api.clone(), budget(100, 100), 0), sink.clone())
        .with_shutdown(shutdown)
        .run(&board_request(1, &["06:00", "07:00", "08:00", "09:00", "10:00"]))
        .await
        .unwrap();

    assert_eq!(api.call_count(), 3);
    assert_eq!(summary.done, 2);
    assert_eq!(summary.pending, 3);
    assert!(summary.cancelled);
    assert_eq!(summary.halted[0].reason, HaltReason::Cancelled);

    // every done cell is persisted, nothing else is
    let written = sink.written_keys();
    assert_eq!(written.len(), summary.done);
    assert!(written.iter().all(|k| k.slot.hour() < 8));
}

#[tokio::test]
async fn cancelled_cells_are_not_marked_done() {
    let api = FakeApi::shared();
    let shutdown = ShutdownCoordinator::shared();
    api.on_call({
        let shutdown = shutdown.clone();
        move |n| {
            if n == 1 {
                shutdown.request_shutdown();
            }
        }
    });

    let sink = Arc::new(MemorySink::new());
    let summary = CollectionScheduler::new(client(api.clone(), budget(100, 100), 0), sink.clone())
        .with_shutdown(shutdown)
        .run(&board_request(2, &["06:00", "07:00"]))
        .await
        .unwrap();

    // the first response completes in the same poll, so it is persisted
    assert_eq!(summary.done, 1);
    assert_eq!(sink.written_keys().len(), summary.done);
    assert_eq!(summary.done + summary.pending, 4);
}
