//! CLI tests for `grader evaluate` and `grader manifest`.
//!
//! Spawns the grader binary and checks stdout and exit codes.

use std::process::Command;

use grader::config::write_config;
use grader::exit_codes;
use grader::report::Report;
use grader::test_support::{Submission, python_available, test_config};

fn grader() -> Command {
    Command::new(env!("CARGO_BIN_EXE_grader"))
}

#[test]
fn evaluate_prints_scored_report() {
    let config = test_config();
    if !python_available(&config.python) {
        eprintln!("skipping: {} is not available", config.python);
        return;
    }
    let submission = Submission::correct();
    let config_path = submission.path().join("grader.toml");
    write_config(&config_path, &config).expect("write config");

    let output = grader()
        .arg("evaluate")
        .arg(submission.path())
        .arg("--config")
        .arg(&config_path)
        .output()
        .expect("grader evaluate");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let report: Report = serde_json::from_slice(&output.stdout).expect("report json");
    assert_eq!(report.points(), Some((130, 130)));
}

#[test]
fn evaluate_without_manifest_exits_with_manifest_error() {
    let submission = Submission::empty();
    let output = grader()
        .arg("evaluate")
        .arg(submission.path())
        .output()
        .expect("grader evaluate");

    assert_eq!(output.status.code(), Some(exit_codes::MANIFEST_ERROR));
    let report: Report = serde_json::from_slice(&output.stdout).expect("report json");
    assert!(report.is_error());
}

#[test]
fn evaluate_missing_directory_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = grader()
        .arg("evaluate")
        .arg(temp.path().join("nope"))
        .status()
        .expect("grader evaluate");
    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

#[test]
fn evaluate_rejects_invalid_config() {
    let submission = Submission::without_sources();
    let config_path = submission.path().join("grader.toml");
    std::fs::write(&config_path, "stage_timeout_secs = 0\n").expect("write config");

    let output = grader()
        .arg("evaluate")
        .arg(submission.path())
        .arg("--config")
        .arg(&config_path)
        .output()
        .expect("grader evaluate");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("stage_timeout_secs"));
}

#[test]
fn manifest_prints_parsed_fields() {
    let submission = Submission::without_sources();
    let output = grader()
        .arg("manifest")
        .arg(submission.path())
        .output()
        .expect("grader manifest");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(parsed["crud_class"], "Crud");
    assert_eq!(parsed["tables"][0]["physical"], "users");
    assert_eq!(parsed["db_connect_fn"], "get_connection");
}

#[test]
fn manifest_reports_malformed_json() {
    let submission = Submission::empty();
    submission.write("README.json", "{ \"crud_module\": ");
    let output = grader()
        .arg("manifest")
        .arg(submission.path())
        .output()
        .expect("grader manifest");

    assert_eq!(output.status.code(), Some(exit_codes::MANIFEST_ERROR));
    assert!(String::from_utf8_lossy(&output.stderr).contains("README.json is malformed"));
}
