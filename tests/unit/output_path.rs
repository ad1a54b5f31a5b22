//! Unit tests for output path construction

use chrono::NaiveDate;
use std::path::PathBuf;
use transit_collector::collector::{CellKey, CellTarget};
use transit_collector::output::path::{entity_name, sanitize_component, MANIFEST_FILE};
use transit_collector::output::{OutputPathBuilder, YearMonth};
use transit_collector::{Category, TimeSlot};

fn key(target: CellTarget, category: Category) -> CellKey {
    CellKey::new(
        NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
        TimeSlot::new(23, 0).unwrap(),
        target,
        category,
    )
}

#[test]
fn test_board_file_in_month_directory() {
    let path = OutputPathBuilder::new(PathBuf::from("data/raw"))
        .for_cell(&key(CellTarget::station("Genève"), Category::StationBoard))
        .build();
    assert_eq!(path, PathBuf::from("data/raw/2025-12/Genève_2025-12-31.csv"));
}

#[test]
fn test_pair_file_name() {
    let target = CellTarget::pair("Zürich HB", "Luzern");
    assert_eq!(entity_name(&target), "connection_Zürich_HB_to_Luzern");

    let path = OutputPathBuilder::new(PathBuf::from("out"))
        .for_cell(&key(target, Category::Connections))
        .build();
    assert_eq!(
        path,
        PathBuf::from("out/2025-12/connection_Zürich_HB_to_Luzern_2025-12-31.csv")
    );
}

#[test]
fn test_station_id_does_not_change_file_name() {
    let named = entity_name(&CellTarget::station("Luzern"));
    let with_id = entity_name(&CellTarget::station_with_id("Luzern", "8505000"));
    assert_eq!(named, with_id);
}

#[test]
fn test_manifest_path() {
    let path = OutputPathBuilder::new(PathBuf::from("out"))
        .for_manifest(YearMonth { year: 2025, month: 1 })
        .build();
    assert_eq!(path, PathBuf::from("out/2025-01").join(MANIFEST_FILE));
}

#[test]
fn test_sanitize_blocks_traversal() {
    assert_eq!(sanitize_component("../etc/passwd"), "___etc_passwd");
    assert_eq!(sanitize_component("  St. Gallen "), "St._Gallen");
    assert!(!sanitize_component("a/../../b").contains('/'));
}
