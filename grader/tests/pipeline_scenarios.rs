//! End-to-end scenarios for `grader::evaluate`.
//!
//! Each scenario writes a complete submission to a temp dir and evaluates it
//! with a real Python worker. Scenarios skip when no interpreter is available.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use grader::config::GraderConfig;
use grader::report::Report;
use grader::test_support::{Submission, manifest, python_available, test_config};

fn python_ready(config: &GraderConfig) -> bool {
    if python_available(&config.python) {
        return true;
    }
    eprintln!("skipping: {} is not available", config.python);
    false
}

fn scored(report: &Report) -> (u32, u32, &[String]) {
    let (score, max_score) = report.points().expect("scored report");
    (score, max_score, report.details())
}

#[test]
fn correct_submission_earns_full_marks() {
    let config = test_config();
    if !python_ready(&config) {
        return;
    }
    let submission = Submission::correct();
    let report = grader::evaluate(submission.path(), &config);
    let (score, max_score, details) = scored(&report);

    assert_eq!((score, max_score), (130, 130), "details: {details:#?}");
    assert_eq!(
        details,
        [
            "✔ CRUD module found",
            "✔ DB adapter file found",
            "✔ CRUD class imported successfully",
            "✔ Method create() found",
            "✔ Method read() found",
            "✔ Method update() found",
            "✔ Method delete() found",
            "✔ Database connection successfully sandboxed",
            "✔ CRUD operations successfully executed",
            "✔ SQL injection protection appears safe",
            "✔ Code is PEP8 clean",
        ]
    );
}

#[test]
fn submission_never_touches_its_real_database() {
    let config = test_config();
    if !python_ready(&config) {
        return;
    }
    let submission = Submission::correct();
    grader::evaluate(submission.path(), &config);
    assert!(!submission.path().join("app.db").exists());
}

#[test]
fn naive_sql_loses_only_the_injection_points() {
    let config = test_config();
    if !python_ready(&config) {
        return;
    }
    let submission = Submission::naive_sql();
    let report = grader::evaluate(submission.path(), &config);
    let (score, max_score, details) = scored(&report);

    assert_eq!((score, max_score), (110, 130), "details: {details:#?}");
    assert!(details.contains(&"✔ CRUD operations successfully executed".to_string()));
    assert!(details.contains(&"❌ SQL injection vulnerability detected".to_string()));
}

#[test]
fn spliced_values_in_a_single_execute_are_detected() {
    let config = test_config();
    if !python_ready(&config) {
        return;
    }
    let submission = Submission::naive_execute();
    let report = grader::evaluate(submission.path(), &config);
    let (score, max_score, details) = scored(&report);

    assert_eq!((score, max_score), (110, 130), "details: {details:#?}");
    assert_eq!(details[8], "✔ CRUD operations successfully executed");
    assert_eq!(details[9], "❌ SQL injection vulnerability detected");
}

#[test]
fn create_raising_on_the_payload_fails_the_injection_check() {
    let config = test_config();
    if !python_ready(&config) {
        return;
    }
    let submission = Submission::rejecting_quotes();
    let report = grader::evaluate(submission.path(), &config);
    let (score, max_score, details) = scored(&report);

    assert_eq!((score, max_score), (110, 130), "details: {details:#?}");
    assert_eq!(details[8], "✔ CRUD operations successfully executed");
    assert!(
        details[9].starts_with("❌ SQL injection probe failed: create() failed: Traceback"),
        "got {}",
        details[9]
    );
    assert!(details[9].ends_with("ValueError: quotes are not allowed"));
    assert_eq!(details[10], "✔ Code is PEP8 clean");
}

#[test]
fn missing_method_halts_after_method_checks() {
    let config = test_config();
    if !python_ready(&config) {
        return;
    }
    let submission = Submission::missing_delete();
    let report = grader::evaluate(submission.path(), &config);
    let (score, max_score, details) = scored(&report);

    assert_eq!((score, max_score), (55, 60));
    assert_eq!(details.len(), 7);
    assert_eq!(details.last().map(String::as_str), Some("❌ Method delete() missing"));
    assert!(!details.iter().any(|detail| detail.contains("sandbox")));
}

#[test]
fn import_failure_halts_after_import_check() {
    let config = test_config();
    if !python_ready(&config) {
        return;
    }
    let submission = Submission::broken_import();
    let report = grader::evaluate(submission.path(), &config);
    let (score, max_score, details) = scored(&report);

    assert_eq!((score, max_score), (20, 40));
    assert_eq!(details.len(), 3);
    assert!(
        details[2].starts_with("❌ Failed to load CRUD class: RuntimeError"),
        "got {}",
        details[2]
    );
    assert!(details[2].contains("database driver not configured"));
}

#[test]
fn unknown_connection_factory_fails_sandboxing() {
    let config = test_config();
    if !python_ready(&config) {
        return;
    }
    let submission = Submission::unknown_connect_fn();
    let report = grader::evaluate(submission.path(), &config);
    let (score, max_score, details) = scored(&report);

    assert_eq!((score, max_score), (60, 70));
    assert_eq!(details.len(), 8);
    assert!(details[7].starts_with("❌ Unable to sandbox database calls:"));
    assert!(details[7].contains("open_database"));
}

#[test]
fn hanging_call_fails_its_stage_and_the_worker_is_replaced() {
    let config = test_config();
    if !python_ready(&config) {
        return;
    }
    let submission = Submission::hanging_read();
    let report = grader::evaluate(submission.path(), &config);
    let (score, max_score, details) = scored(&report);

    assert_eq!((score, max_score), (100, 130), "details: {details:#?}");
    assert!(details[8].starts_with("❌ CRUD functional test failed: read() failed: timed out"));
    assert_eq!(details[9], "✔ SQL injection protection appears safe");
    assert_eq!(details[10], "✔ Code is PEP8 clean");
}

#[test]
fn runaway_query_is_bounded_by_the_stage_timeout() {
    let config = test_config();
    if !python_ready(&config) {
        return;
    }
    let submission = Submission::runaway_read();
    let root = submission.path().to_path_buf();
    let (sender, receiver) = mpsc::channel();
    let worker_config = config.clone();
    thread::spawn(move || {
        sender.send(grader::evaluate(&root, &worker_config)).ok();
    });
    let report = receiver
        .recv_timeout(Duration::from_secs(60))
        .expect("evaluate finishes well after the 2s stage timeout");
    let (score, max_score, details) = scored(&report);

    assert_eq!((score, max_score), (100, 130), "details: {details:#?}");
    assert_eq!(
        details[8],
        "❌ CRUD functional test failed: read() failed: timed out after 2s"
    );
    assert_eq!(details[9], "✔ SQL injection protection appears safe");
    assert_eq!(details[10], "✔ Code is PEP8 clean");
}

#[test]
fn repeated_evaluation_is_deterministic() {
    let config = test_config();
    if !python_ready(&config) {
        return;
    }
    let submission = Submission::correct();
    let first = grader::evaluate(submission.path(), &config);
    let second = grader::evaluate(submission.path(), &config);
    assert_eq!(first, second);
}

#[test]
fn strict_read_accepts_a_full_row() {
    let config = GraderConfig {
        strict_read: true,
        ..test_config()
    };
    if !python_ready(&config) {
        return;
    }
    let submission = Submission::correct();
    let report = grader::evaluate(submission.path(), &config);
    assert_eq!(report.points(), Some((130, 130)));
}

#[test]
fn missing_sources_stop_after_file_checks() {
    let submission = Submission::without_sources();
    let report = grader::evaluate(submission.path(), &test_config());
    let (score, max_score, details) = scored(&report);

    assert_eq!((score, max_score), (0, 20));
    assert_eq!(details, ["❌ CRUD module missing", "❌ DB adapter file missing"]);
}

#[test]
fn missing_crud_module_keeps_adapter_points() {
    let submission = Submission::without_sources();
    submission.write("db.py", grader::test_support::DB_ADAPTER);
    let report = grader::evaluate(submission.path(), &test_config());
    assert_eq!(report.points(), Some((10, 20)));
}

#[test]
fn missing_manifest_is_an_error_report() {
    let submission = Submission::empty();
    let report = grader::evaluate(submission.path(), &test_config());
    assert_eq!(
        report,
        Report::error("Missing README.json – naming conventions unknown.")
    );
}

#[test]
fn manifest_without_class_is_an_error_report() {
    let submission = Submission::empty();
    let mut incomplete = manifest();
    incomplete["crud_class"] = serde_json::Value::Null;
    submission.write_manifest(&incomplete);
    let report = grader::evaluate(submission.path(), &test_config());
    assert_eq!(
        report,
        Report::error("README.json must contain CRUD module + class name.")
    );
}

#[test]
fn missing_interpreter_fails_the_import_check() {
    let config = GraderConfig {
        python: "no-such-python-interpreter".to_string(),
        ..test_config()
    };
    let submission = Submission::correct();
    let report = grader::evaluate(submission.path(), &config);
    let (score, max_score, details) = scored(&report);

    assert_eq!((score, max_score), (20, 40));
    assert!(details[2].contains("no-such-python-interpreter"));
}
