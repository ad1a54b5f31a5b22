//! Response cache effects on budget and transport calls

use super::support::{board_request, budget, client, date, fast_policy, slots, FakeApi};
use std::sync::Arc;
use tempfile::TempDir;
use transit_collector::collector::{
    CollectionRequest, CollectionScheduler, RequestBudget, ResponseCache, RetryExecutor,
};
use transit_collector::fetcher::ApiClient;
use transit_collector::output::MemorySink;
use transit_collector::resume::{load_cache, save_cache};
use transit_collector::shutdown::ShutdownCoordinator;
use transit_collector::Category;

#[tokio::test]
async fn cache_hit_costs_no_budget() {
    let api = FakeApi::shared();
    let client = client(api.clone(), budget(10, 10), 0);
    let sink = Arc::new(MemorySink::new());

    // 08:00 and 08:10 fall into the same quarter hour
    let summary = CollectionScheduler::new(client.clone(), sink.clone())
        .with_shutdown(ShutdownCoordinator::shared())
        .run(&board_request(1, &["08:00", "08:10"]))
        .await
        .unwrap();

    assert_eq!(summary.done, 2);
    assert_eq!(api.call_count(), 1);
    assert_eq!(client.budget().remaining(Category::StationBoard), Some(9));
    assert_eq!(client.cache().len(), 1);

    // both cells are persisted with the same rows
    let writes = sink.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].1, writes[1].1);
}

#[tokio::test]
async fn cache_hit_is_served_when_budget_is_exhausted() {
    let api = FakeApi::shared();
    let client = client(api.clone(), budget(1, 1), 0);
    let sink = Arc::new(MemorySink::new());

    let summary = CollectionScheduler::new(client, sink)
        .with_shutdown(ShutdownCoordinator::shared())
        .run(&board_request(1, &["08:00", "08:05", "08:14"]))
        .await
        .unwrap();

    assert_eq!(summary.done, 3);
    assert!(summary.halted.is_empty());
    assert_eq!(api.call_count(), 1);
}

#[tokio::test]
async fn saved_cache_answers_a_later_run() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("response_cache.json");

    let api = FakeApi::shared();
    let first = client(api.clone(), budget(10, 10), 0);
    CollectionScheduler::new(first.clone(), Arc::new(MemorySink::new()))
        .with_shutdown(ShutdownCoordinator::shared())
        .run(&board_request(2, &["06:00", "07:00"]))
        .await
        .unwrap();
    assert_eq!(api.call_count(), 4);
    assert_eq!(save_cache(&path, first.cache()).unwrap(), 4);

    let cache = Arc::new(ResponseCache::new());
    assert_eq!(load_cache(&path, &cache).unwrap(), 4);

    let offline = FakeApi::shared();
    let second = Arc::new(ApiClient::new(
        offline.clone(),
        Arc::new(RequestBudget::new([(Category::StationBoard, 10)])),
        cache,
        RetryExecutor::with_seed(fast_policy(0), 1),
    ));
    let summary = CollectionScheduler::new(second.clone(), Arc::new(MemorySink::new()))
        .with_shutdown(ShutdownCoordinator::shared())
        .run(&board_request(2, &["06:00", "07:00"]))
        .await
        .unwrap();

    assert_eq!(summary.done, 4);
    assert_eq!(offline.call_count(), 0);
    assert_eq!(second.budget().remaining(Category::StationBoard), Some(10));
}

#[tokio::test]
async fn duplicate_target_is_fetched_once_and_marked_twice() {
    let api = FakeApi::shared();
    let client = client(api.clone(), budget(10, 10), 0);
    let sink = Arc::new(MemorySink::new());
    let request = CollectionRequest::builder(date(1), date(1))
        .station("Luzern")
        .station("Luzern")
        .board_slots(slots(&["08:00"]))
        .build()
        .unwrap();

    let summary = CollectionScheduler::new(client.clone(), sink.clone())
        .with_shutdown(ShutdownCoordinator::shared())
        .run(&request)
        .await
        .unwrap();

    assert_eq!(api.call_count(), 1);
    assert_eq!(summary.done, 2);
    assert_eq!(client.budget().remaining(Category::StationBoard), Some(9));
    assert_eq!(sink.written_keys().len(), 2);
}
