//! Deterministic processing order

use super::support::{budget, client, date, slots, FakeApi};
use std::sync::Arc;
use transit_collector::collector::{CellTarget, CollectionRequest, CollectionScheduler};
use transit_collector::output::MemorySink;
use transit_collector::shutdown::ShutdownCoordinator;
use transit_collector::Category;

fn request() -> CollectionRequest {
    CollectionRequest::builder(date(1), date(2))
        .station_target(CellTarget::station_with_id("Luzern", "8505000"))
        .station("Bern")
        .board_slots(slots(&["09:00", "08:00"]))
        .build()
        .unwrap()
}

async fn call_sequence() -> Vec<(String, String)> {
    let api = FakeApi::shared();
    CollectionScheduler::new(client(api.clone(), budget(100, 100), 0), Arc::new(MemorySink::new()))
        .with_shutdown(ShutdownCoordinator::shared())
        .run(&request())
        .await
        .unwrap();

    api.calls()
        .iter()
        .map(|c| {
            (
                c.param("datetime").unwrap_or_default().to_string(),
                c.param("station").unwrap_or_default().to_string(),
            )
        })
        .collect()
}

#[tokio::test]
async fn cells_run_by_date_then_slot_then_target() {
    let calls = call_sequence().await;

    let expected: Vec<(String, String)> = [
        ("2025-03-01 08:00", "8505000"),
        ("2025-03-01 08:00", "Bern"),
        ("2025-03-01 09:00", "8505000"),
        ("2025-03-01 09:00", "Bern"),
        ("2025-03-02 08:00", "8505000"),
        ("2025-03-02 08:00", "Bern"),
        ("2025-03-02 09:00", "8505000"),
        ("2025-03-02 09:00", "Bern"),
    ]
    .iter()
    .map(|(d, s)| (d.to_string(), s.to_string()))
    .collect();
    assert_eq!(calls, expected);
}

#[tokio::test]
async fn repeated_runs_issue_identical_sequences() {
    assert_eq!(call_sequence().await, call_sequence().await);
}

#[test]
fn cell_keys_follow_processing_order() {
    let request = request();
    let keys = request.cell_keys(Category::StationBoard);
    assert_eq!(keys.len(), 8);
    assert!(keys.windows(2).all(|w| (w[0].date, w[0].slot) <= (w[1].date, w[1].slot)));
    assert_eq!(keys[0].target, CellTarget::station_with_id("Luzern", "8505000"));
    assert_eq!(keys[1].target, CellTarget::station("Bern"));
}
