//! Daily budget enforcement across a collection run

use super::support::{board_request, budget, client, date, slots, FakeApi};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::sync::Arc;
use transit_collector::collector::summary::HaltReason;
use transit_collector::collector::{
    CollectionRequest, CollectionScheduler, ManualClock, RequestBudget,
};
use transit_collector::output::MemorySink;
use transit_collector::shutdown::ShutdownCoordinator;
use transit_collector::Category;

fn scheduler(client: Arc<transit_collector::fetcher::ApiClient>, sink: Arc<MemorySink>) -> CollectionScheduler {
    CollectionScheduler::new(client, sink).with_shutdown(ShutdownCoordinator::shared())
}

#[tokio::test]
async fn budget_ceiling_is_never_exceeded() {
    let api = FakeApi::shared();
    let client = client(api.clone(), budget(5, 100), 0);
    let sink = Arc::new(MemorySink::new());

    let summary = scheduler(client.clone(), sink.clone())
        .run(&board_request(2, &["06:00", "07:00", "08:00", "09:00"]))
        .await
        .unwrap();

    assert_eq!(api.call_count(), 5);
    assert_eq!(summary.done, 5);
    assert_eq!(summary.pending, 3);
    assert_eq!(sink.written_keys().len(), 5);
    assert_eq!(client.budget().remaining(Category::StationBoard), Some(0));

    assert_eq!(summary.halted.len(), 1);
    assert_eq!(summary.halted[0].reason, HaltReason::BudgetExhausted);
    assert!(summary.next_budget_reset_at.is_some());
    assert_eq!(
        summary.next_budget_reset_at,
        client.budget().resets_at(Category::StationBoard)
    );
}

#[tokio::test]
async fn exhausted_category_does_not_stop_the_other() {
    let api = FakeApi::shared();
    let client = client(api.clone(), budget(100, 1), 0);
    let sink = Arc::new(MemorySink::new());

    let request = CollectionRequest::builder(date(1), date(1))
        .station("Luzern")
        .pair("Zürich HB", "Luzern")
        .board_slots(slots(&["06:00", "07:00", "08:00"]))
        .connection_slots(slots(&["06:00", "07:00", "08:00"]))
        .build()
        .unwrap();

    let summary = scheduler(client, sink).run(&request).await.unwrap();

    let board = summary.by_category[&Category::StationBoard];
    let connections = summary.by_category[&Category::Connections];
    assert_eq!(board.done, 3);
    assert_eq!(connections.done, 1);
    assert_eq!(connections.pending, 2);
    assert_eq!(api.calls_to("/connections"), 1);
    assert_eq!(api.calls_to("/stationboard"), 3);
}

#[tokio::test]
async fn budget_refills_when_the_day_rolls_over_mid_run() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 1, 23, 59, 0).unwrap(),
    ));
    let budget = RequestBudget::with_clock([(Category::StationBoard, 2)], clock.clone());

    let api = FakeApi::shared();
    api.on_call({
        let clock = clock.clone();
        move |n| {
            if n == 2 {
                clock.advance(ChronoDuration::minutes(2));
            }
        }
    });

    let client = client(api.clone(), budget, 0);
    let sink = Arc::new(MemorySink::new());
    let summary = scheduler(client.clone(), sink)
        .run(&board_request(1, &["06:00", "07:00", "08:00", "09:00"]))
        .await
        .unwrap();

    assert_eq!(api.call_count(), 4);
    assert_eq!(summary.done, 4);
    assert!(summary.halted.is_empty());
    assert_eq!(client.budget().remaining(Category::StationBoard), Some(0));
    assert_eq!(
        client.budget().resets_at(Category::StationBoard),
        Some(Utc.with_ymd_and_hms(2025, 3, 3, 0, 0, 0).unwrap())
    );
}

#[tokio::test]
async fn frozen_clock_keeps_the_budget_exhausted() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 1, 23, 59, 0).unwrap(),
    ));
    let budget = RequestBudget::with_clock([(Category::StationBoard, 2)], clock);

    let api = FakeApi::shared();
    let client = client(api.clone(), budget, 0);
    let summary = scheduler(client, Arc::new(MemorySink::new()))
        .run(&board_request(1, &["06:00", "07:00", "08:00", "09:00"]))
        .await
        .unwrap();

    assert_eq!(api.call_count(), 2);
    assert_eq!(summary.done, 2);
    assert_eq!(summary.pending, 2);
    assert_eq!(
        summary.next_budget_reset_at,
        Some(Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap())
    );
}
