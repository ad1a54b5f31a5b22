//! Smoke tests of the command-line interface

use assert_cmd::Command;
use tempfile::TempDir;

fn cmd() -> Command {
    Command::cargo_bin("transit-collector").unwrap()
}

#[test]
fn help_lists_commands() {
    let output = cmd().arg("--help").assert().success().get_output().stdout.clone();
    let help = String::from_utf8(output).unwrap();
    assert!(help.contains("collect"));
    assert!(help.contains("stations"));
    assert!(help.contains("budget"));
}

#[test]
fn collect_requires_a_start_date() {
    cmd().arg("collect").assert().failure();
}

#[test]
fn collect_rejects_malformed_slots() {
    cmd()
        .args(["collect", "--start-date", "2025-03-01", "--board-slots", "25:00"])
        .assert()
        .failure();
}

#[test]
fn collect_rejects_inverted_range_before_any_request() {
    let dir = TempDir::new().unwrap();
    cmd()
        .args(["collect", "--start-date", "2025-03-02", "--end-date", "2025-03-01"])
        .arg("--resume-dir")
        .arg(dir.path().join("resume"))
        .arg("--data-dir")
        .arg(dir.path().join("data"))
        .assert()
        .failure();
    assert!(!dir.path().join("data").exists());
}

#[test]
fn stations_without_query_lists_registry() {
    let output = cmd()
        .args(["stations", "--output-format", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["stations"].as_array().unwrap().len(), 3);
    assert_eq!(json["pairs"].as_array().unwrap().len(), 3);
}

#[test]
fn budget_reports_full_allowance_for_a_fresh_resume_dir() {
    let dir = TempDir::new().unwrap();
    let output = cmd()
        .args(["budget", "--output-format", "json", "--connection-ceiling", "50"])
        .arg("--resume-dir")
        .arg(dir.path())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let budgets = json["budgets"].as_array().unwrap();
    assert_eq!(budgets.len(), 2);
    let connections = budgets
        .iter()
        .find(|b| b["category"] == "connections")
        .unwrap();
    assert_eq!(connections["remaining"], 50);
    assert_eq!(connections["ceiling"], 50);
}
