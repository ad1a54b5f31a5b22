//! Transient and terminal failure handling

use super::support::{board_request, budget, client, FakeApi};
use std::sync::Arc;
use transit_collector::collector::summary::FailureKind;
use transit_collector::collector::CollectionScheduler;
use transit_collector::fetcher::{RawResponse, TransportError};
use transit_collector::output::MemorySink;
use transit_collector::shutdown::ShutdownCoordinator;
use transit_collector::Category;

fn scheduler(api: Arc<FakeApi>, retries: u32, sink: Arc<MemorySink>) -> CollectionScheduler {
    CollectionScheduler::new(client(api, budget(100, 100), retries), sink)
        .with_shutdown(ShutdownCoordinator::shared())
}

#[tokio::test(start_paused = true)]
async fn terminal_failure_is_not_retried() {
    let api = FakeApi::shared();
    api.respond_always("/stationboard", Ok(RawResponse::new(400, "bad station")));
    let sink = Arc::new(MemorySink::new());

    let summary = scheduler(api.clone(), 3, sink.clone())
        .run(&board_request(1, &["06:00", "07:00"]))
        .await
        .unwrap();

    assert_eq!(api.call_count(), 2);
    assert_eq!(summary.permanently_failed, 2);
    assert_eq!(summary.failures_of(FailureKind::Terminal).count(), 2);
    assert!(sink.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn retries_are_exhausted_then_the_run_moves_on() {
    let api = FakeApi::shared();
    api.push("/stationboard", Ok(RawResponse::new(503, "unavailable")));
    api.push("/stationboard", Err(TransportError::Timeout("read".to_string())));
    api.push("/stationboard", Ok(RawResponse::new(429, "slow down")));

    let sink = Arc::new(MemorySink::new());
    let summary = scheduler(api.clone(), 2, sink.clone())
        .run(&board_request(1, &["06:00", "07:00"]))
        .await
        .unwrap();

    // three attempts for the first cell, one for the second
    assert_eq!(api.call_count(), 4);
    assert_eq!(summary.permanently_failed, 1);
    assert_eq!(summary.done, 1);

    let failure = summary.failures_of(FailureKind::RetriesExhausted).next().unwrap();
    assert_eq!(failure.cell.slot.hour(), 6);
    assert_eq!(failure.cell.category, Category::StationBoard);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_recovers_within_retries() {
    let api = FakeApi::shared();
    api.push("/stationboard", Ok(RawResponse::new(500, "oops")));
    api.push("/stationboard", Err(TransportError::Connect("refused".to_string())));

    let sink = Arc::new(MemorySink::new());
    let summary = scheduler(api.clone(), 3, sink.clone())
        .run(&board_request(1, &["06:00"]))
        .await
        .unwrap();

    assert_eq!(api.call_count(), 3);
    assert_eq!(summary.done, 1);
    assert!(summary.failures.is_empty());
    assert_eq!(sink.writes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn api_error_payload_is_terminal() {
    let api = FakeApi::shared();
    api.push(
        "/stationboard",
        Ok(RawResponse::ok(r#"{"errors":[{"message":"Station not found"}]}"#)),
    );

    let summary = scheduler(api.clone(), 3, Arc::new(MemorySink::new()))
        .run(&board_request(1, &["06:00"]))
        .await
        .unwrap();

    assert_eq!(api.call_count(), 1);
    let failure = &summary.failures[0];
    assert_eq!(failure.kind, FailureKind::Terminal);
    assert!(failure.reason.contains("Station not found"));
}
