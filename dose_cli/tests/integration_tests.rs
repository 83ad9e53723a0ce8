//! Integration tests for the pedidose binary.
//!
//! These tests verify end-to-end behavior including:
//! - Batch calculation and filtering
//! - Single-record calculation with dose input
//! - Error reporting for invalid input
//! - CSV and form-field export

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Helper to create a test directory with a config file pointing exports into it
fn setup_test_dir() -> (TempDir, PathBuf) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("config.toml");
    let export_dir = temp_dir.path().join("exports");
    fs::write(
        &config_path,
        format!("[export]\noutput_dir = '{}'\n", export_dir.display()),
    )
    .expect("Failed to write config");
    (temp_dir, config_path)
}

/// Helper to get the path to the CLI binary
fn cli(config: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("pedidose"));
    cmd.arg("--config").arg(config);
    cmd
}

#[test]
fn test_cli_help() {
    Command::new(assert_cmd::cargo::cargo_bin!("pedidose"))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Pediatric weight-based medication dose calculator",
        ));
}

#[test]
fn test_calc_emergency() {
    let (_dir, config) = setup_test_dir();

    cli(&config)
        .args(["calc", "--weight", "10", "--type", "emergency"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Epinephrine 1:10,000"))
        .stdout(predicate::str::contains("1.00 mL"))
        .stdout(predicate::str::contains("0.10 mg"))
        .stdout(predicate::str::contains("21 medications | 21 emergency | 0 PRRT"))
        .stdout(predicate::str::contains("9-12 months"));
}

#[test]
fn test_calc_all_skips_dose_input_records() {
    let (_dir, config) = setup_test_dir();

    cli(&config)
        .args(["calc", "--weight", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("33 medications | 21 emergency | 12 PRRT"))
        .stdout(predicate::str::contains("Hydrocortisone").not())
        .stdout(predicate::str::contains("Ipratropium").not());
}

#[test]
fn test_calc_with_search() {
    let (_dir, config) = setup_test_dir();

    cli(&config)
        .args(["calc", "--weight", "15", "--search", "naloxone"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 medications | 2 emergency | 1 PRRT"))
        .stdout(predicate::str::contains("Epinephrine").not());
}

#[test]
fn test_calc_no_matches() {
    let (_dir, config) = setup_test_dir();

    cli(&config)
        .args(["calc", "--weight", "15", "--category", "nonexistent"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No medications match"));
}

#[test]
fn test_calc_rejects_invalid_weight() {
    let (_dir, config) = setup_test_dir();

    for weight in ["0", "201"] {
        cli(&config)
            .args(["calc", "--weight", weight])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid weight"));
    }
}

#[test]
fn test_max_weight_override() {
    let (_dir, config) = setup_test_dir();

    cli(&config)
        .args(["calc", "--weight", "150", "--max-weight", "150"])
        .assert()
        .success();

    cli(&config)
        .args(["calc", "--weight", "160", "--max-weight", "150"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at most 150 kg"));
}

#[test]
fn test_dose_requires_input() {
    let (_dir, config) = setup_test_dir();

    cli(&config)
        .args([
            "dose",
            "--name",
            "Hydrocortisone Na succinate",
            "--weight",
            "10",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "dose input required for Hydrocortisone Na succinate",
        ));
}

#[test]
fn test_dose_with_input() {
    let (_dir, config) = setup_test_dir();

    cli(&config)
        .args([
            "dose",
            "--name",
            "hydrocortisone na succinate",
            "--weight",
            "10",
            "--dose",
            "100",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("2.00 mL"))
        .stdout(predicate::str::contains("100.00 mg"))
        .stdout(predicate::str::contains("100 / 50"));
}

#[test]
fn test_dose_partition_selects_duplicate_name() {
    let (_dir, config) = setup_test_dir();

    cli(&config)
        .args(["dose", "--name", "Glucagon", "--weight", "10", "--type", "prrt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PRRT"))
        .stdout(predicate::str::contains("0.20 mL"));
}

#[test]
fn test_dose_unknown_medication() {
    let (_dir, config) = setup_test_dir();

    cli(&config)
        .args(["dose", "--name", "Unobtainium", "--weight", "10"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown medication: Unobtainium"));
}

#[test]
fn test_precision_override() {
    let (_dir, config) = setup_test_dir();

    cli(&config)
        .args([
            "--precision",
            "3",
            "dose",
            "--name",
            "Epinephrine 1:10,000",
            "--weight",
            "10",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("1.000 mL"));
}

#[test]
fn test_list_by_category() {
    let (_dir, config) = setup_test_dir();

    cli(&config)
        .args(["list", "--category", "steroid"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dexamethasone"))
        .stdout(predicate::str::contains("(dose input)"))
        .stdout(predicate::str::contains("3 medications"));
}

#[test]
fn test_stats() {
    let (_dir, config) = setup_test_dir();

    cli(&config)
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Total medications: 35"))
        .stdout(predicate::str::contains("Need dose input: 2"));
}

#[test]
fn test_validate() {
    let (_dir, config) = setup_test_dir();

    cli(&config)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Formulary OK (35 medications)"));
}

#[test]
fn test_export_csv_to_path() {
    let (dir, config) = setup_test_dir();
    let output = dir.path().join("report.csv");

    cli(&config)
        .args(["export", "--weight", "12"])
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 33 medications"));

    let mut reader = csv::Reader::from_path(&output).expect("Failed to open CSV");
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 33);
    assert_eq!(&rows[0][2], "Epinephrine 1:10,000");
    assert_eq!(&rows[0][6], "1.20");
}

#[test]
fn test_export_fields() {
    let (dir, config) = setup_test_dir();
    let output = dir.path().join("fields.json");

    cli(&config)
        .args(["export", "--weight", "10", "--format", "fields"])
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("form fields"));

    let payload: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(payload["Weight"], "10");
    assert_eq!(payload["EpinephrineIV"], "1.00 mL");
    assert_eq!(payload["VolumeExpanders"], "200.00 mL");
}

#[test]
fn test_export_default_location() {
    let (dir, config) = setup_test_dir();

    cli(&config)
        .args(["export", "--weight", "10", "--type", "prrt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 12 medications"));

    let files: Vec<_> = fs::read_dir(dir.path().join("exports"))
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(files.len(), 1);
    assert!(files[0].starts_with("DrugDoses_"));
    assert!(files[0].ends_with(".csv"));
}

#[test]
fn test_export_rejects_invalid_weight() {
    let (dir, config) = setup_test_dir();

    cli(&config)
        .args(["export", "--weight", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid weight"));

    assert!(!dir.path().join("exports").exists());
}

#[test]
fn test_invalid_config_fails() {
    let (_dir, config) = setup_test_dir();
    fs::write(&config, "[calculation]\nprecision = 12\n").unwrap();

    cli(&config)
        .arg("stats")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}
