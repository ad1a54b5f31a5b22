//! End-to-end collection into the CSV sink

use super::support::{budget, client, date, slots, FakeApi};
use std::sync::Arc;
use tempfile::TempDir;
use transit_collector::collector::{CellKey, CellTarget, CollectionRequest, CollectionScheduler};
use transit_collector::output::path::{YearMonth, MANIFEST_FILE};
use transit_collector::output::CsvSink;
use transit_collector::shutdown::ShutdownCoordinator;
use transit_collector::Category;

#[tokio::test]
async fn boards_and_connections_land_in_monthly_files() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(CsvSink::new(dir.path()));
    let api = FakeApi::shared();

    let request = CollectionRequest::builder(date(1), date(1))
        .station("Luzern")
        .pair("Zürich HB", "Luzern")
        .board_slots(slots(&["08:00"]))
        .connection_slots(slots(&["07:00", "17:00"]))
        .build()
        .unwrap();

    let summary = CollectionScheduler::new(client(api, budget(10, 10), 0), sink.clone())
        .with_shutdown(ShutdownCoordinator::shared())
        .run(&request)
        .await
        .unwrap();
    assert_eq!(summary.done, 3);

    let board_key = CellKey::new(
        date(1),
        slots(&["08:00"])[0],
        CellTarget::station("Luzern"),
        Category::StationBoard,
    );
    let board_csv = std::fs::read_to_string(sink.data_path(&board_key)).unwrap();
    let mut lines = board_csv.lines();
    assert!(lines.next().unwrap().starts_with("request_date,request_time,board_type"));
    let row = lines.next().unwrap();
    assert!(row.starts_with("2025-03-01,08:00,arrival"));
    assert!(row.contains("2518"));
    assert!(lines.next().is_none());

    let pair_key = CellKey::new(
        date(1),
        slots(&["07:00"])[0],
        CellTarget::pair("Zürich HB", "Luzern"),
        Category::Connections,
    );
    let pair_path = sink.data_path(&pair_key);
    assert!(pair_path.starts_with(dir.path().join("2025-03")));
    let pair_csv = std::fs::read_to_string(&pair_path).unwrap();
    // one connection per slot, both slots share the file of the day
    assert_eq!(pair_csv.lines().count(), 3);

    assert!(dir.path().join("2025-03").join(MANIFEST_FILE).exists());
    let completed = sink
        .completed_cells(YearMonth { year: 2025, month: 3 })
        .unwrap();
    assert_eq!(completed.len(), 3);
    assert!(completed.contains(&board_key));
    assert!(completed.contains(&pair_key));
}
