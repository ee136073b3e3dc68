//! Submission run orchestration.
//!
//! Coordinates workspace creation, grading, and result capture.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument};

use grader::config::GraderConfig;
use grader::report::Report;

use crate::outcome::{Outcome, classify_outcome};
use crate::results::{CaptureInput, capture_results};
use crate::submission::SubmissionEntry;
use crate::workspace::{create_workspace, generate_short_id, generate_timestamp};

/// Result of grading a submission once.
#[derive(Debug)]
pub struct RunOutcome {
    /// Unique identifier for this eval run.
    pub eval_run_id: String,
    pub results_dir: PathBuf,
    pub outcome: Outcome,
    pub report: Report,
}

/// Grade a fresh copy of `submission` and persist the results.
#[instrument(skip_all, fields(submission = %submission.name))]
pub fn run_submission(
    eval_root: &Path,
    submission: &SubmissionEntry,
    config: &GraderConfig,
) -> Result<RunOutcome> {
    info!("submission run started");

    debug!("creating workspace");
    let workspace = create_workspace(
        &eval_root.join("workspaces"),
        &submission.name,
        &submission.root,
    )
    .context("create workspace")?;
    debug!(workspace = %workspace.name, "workspace created");

    let eval_run_id = new_eval_run_id();
    let started_at = Utc::now();
    let report = grader::evaluate(&workspace.root, config);
    let finished_at = Utc::now();
    let outcome = classify_outcome(&report);
    info!(
        outcome = ?outcome,
        points = ?report.points(),
        duration_secs = (finished_at - started_at).num_milliseconds() as f64 / 1000.0,
        "grading finished"
    );

    let manifest_path = submission.manifest_path();
    let capture_input = CaptureInput {
        submission: &submission.name,
        manifest_path: &manifest_path,
        eval_run_id: &eval_run_id,
        started_at,
        finished_at,
        workspace_root: &workspace.root,
        report: &report,
        outcome,
    };
    let results_dir = capture_results(&eval_root.join("results"), &capture_input)
        .context("capture results")?;

    Ok(RunOutcome {
        eval_run_id,
        results_dir,
        outcome,
        report,
    })
}

/// `eval-<timestamp>-<random>`: unique even for runs started in the same second.
fn new_eval_run_id() -> String {
    format!("eval-{}-{}", generate_timestamp(), generate_short_id())
}
