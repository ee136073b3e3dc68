//! CLI command implementations.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use grader::config::load_config;

use crate::report::aggregate;
use crate::run::run_submission;
use crate::submission::{discover_submissions, locate, submissions_dir, validate_name};
use crate::workspace::{is_workspace_of, workspaces_dir};

/// Grader config used when `--config` is not given.
pub fn default_config_path(repo_root: &Path) -> PathBuf {
    repo_root.join("eval").join("grader.toml")
}

fn results_root(repo_root: &Path) -> PathBuf {
    repo_root.join("eval").join("results")
}

/// List all available submissions.
pub fn list_submissions(repo_root: &Path) -> Result<()> {
    for submission in discover_submissions(&submissions_dir(repo_root))? {
        println!("{}", submission.name);
    }
    Ok(())
}

/// Grade a submission by name (optionally multiple times).
pub fn run_submission_by_name(
    repo_root: &Path,
    name: &str,
    runs: u32,
    config_path: Option<&Path>,
) -> Result<()> {
    let submission = locate(&submissions_dir(repo_root), name)?;
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_config_path(repo_root));
    let config = load_config(&config_path).context("load grader config")?;
    debug!(submission = name, config = %config_path.display(), "config loaded");

    info!(submission = name, runs, "starting runs");
    let eval_root = repo_root.join("eval");
    for run_num in 1..=runs {
        debug!(submission = name, run_num, runs, "starting run");
        let outcome =
            run_submission(&eval_root, &submission, &config).context("run submission")?;
        let score = match outcome.report.points() {
            Some((score, max_score)) => format!("{score}/{max_score}"),
            None => "-".to_string(),
        };
        println!(
            "run: submission={} eval_run_id={} outcome={:?} score={} results={}",
            name,
            outcome.eval_run_id,
            outcome.outcome,
            score,
            outcome.results_dir.display()
        );
    }
    Ok(())
}

/// Show aggregated results for a submission.
pub fn report_submission(repo_root: &Path, name: &str) -> Result<()> {
    validate_name(name)?;
    let (summary, warnings) = aggregate(&results_root(repo_root).join(name))?;
    println!("report: submission={} runs={}", name, summary.runs);
    println!(
        "report: full={} partial={} halted={} error={}",
        summary.full, summary.partial, summary.halted, summary.error
    );
    if let Some(avg) = summary.avg_score {
        println!("report: avg_score={:.1}", avg);
    }
    if let Some(avg) = summary.avg_duration_secs {
        println!("report: avg_duration_secs={:.2}", avg);
    }
    for (label, (passed, total)) in summary.check_pass_rates {
        println!("report: check {} {}/{}", label, passed, total);
    }
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

/// Remove workspaces and results for a submission.
pub fn clean_submission(repo_root: &Path, name: &str) -> Result<()> {
    validate_name(name)?;
    let workspaces_dir = workspaces_dir(repo_root);
    let removed = remove_workspaces(&workspaces_dir, name)?;

    let submission_results = results_root(repo_root).join(name);
    if submission_results.exists() {
        fs::remove_dir_all(&submission_results)
            .with_context(|| format!("remove {}", submission_results.display()))?;
    }

    println!(
        "clean: submission={} workspaces_removed={} results={}",
        name,
        removed,
        submission_results.display()
    );
    Ok(())
}

fn remove_workspaces(workspaces_dir: &Path, name: &str) -> Result<usize> {
    if !workspaces_dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(workspaces_dir)
        .with_context(|| format!("read {}", workspaces_dir.display()))?
    {
        let entry = entry.context("read entry")?;
        let dir_name = entry.file_name();
        if is_workspace_of(&dir_name.to_string_lossy(), name) {
            fs::remove_dir_all(entry.path())
                .with_context(|| format!("remove {}", entry.path().display()))?;
            removed += 1;
        }
    }
    Ok(removed)
}
