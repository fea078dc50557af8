//! Behaviour of the command line binary.

mod common;

use std::process::Command;

use common::*;
use tempfile::TempDir;

fn b2rio() -> Command {
    Command::new(env!("CARGO_BIN_EXE_b2rio"))
}

#[test]
fn missing_brain_path_reports_and_returns() {
    let output = b2rio().args(["--output_file", "out"]).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--brain_path"));
    assert!(stdout.contains("Usage:"));
}

#[test]
fn missing_output_file_reports_and_returns() {
    let output = b2rio().args(["--brain_path", "map.nii"]).output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("--output_file"));
}

#[test]
fn help_prints_every_option() {
    let output = b2rio().arg("--help").output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--n_folds", "--resample", "--frac_sample", "--radius", "--tfIdf", "--output_summary"] {
        assert!(stdout.contains(flag), "usage lacks {}", flag);
    }
}

#[test]
fn failed_run_exits_with_error() {
    let dir = TempDir::new().unwrap();
    let output = b2rio()
        .current_dir(dir.path())
        .args(["--brain_path", "missing.nii", "--output_file", "out"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn full_run_from_the_command_line() {
    let dir = TempDir::new().unwrap();
    let map = write_map(dir.path(), "map.nii", 3, 1, &[(10, 10, 10, 0, 1.0)]);
    let peaks = write_peaks(dir.path(), &[(1, 10.0, 10.0, 11.0), (2, 1.0, 1.0, 1.0)]);
    let terms = write_terms(dir.path(), &[(1, "memory"), (2, "memory")]);
    let stem = dir.path().join("res");

    let status = b2rio()
        .arg("--brain_path")
        .arg(&map)
        .arg("--template")
        .arg(&map)
        .arg("--coordinates")
        .arg(&peaks)
        .arg("--features")
        .arg(&terms)
        .arg("--output_file")
        .arg(&stem)
        .args(["--radius", "2", "--n_folds", "4", "--frac_sample", "1", "--output_summary"])
        .status()
        .unwrap();
    assert!(status.success());

    let rows = read_results(&dir.path().join("res.csv"));
    assert_eq!(rows.len(), 4);
    assert!(dir.path().join("res_summary.csv").exists());
}
