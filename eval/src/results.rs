//! Per-run records under `eval/results/`.
//!
//! Each run leaves `report.json` (the grader's report, verbatim) and
//! `meta.json` (provenance and timing) under
//! `eval/results/<submission>/<eval_run_id>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use grader::report::{Report, write_report};

use crate::outcome::Outcome;

/// Everything known about a finished grading run.
#[derive(Debug)]
pub struct CaptureInput<'a> {
    pub submission: &'a str,
    pub manifest_path: &'a Path,
    pub eval_run_id: &'a str,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub workspace_root: &'a Path,
    pub report: &'a Report,
    pub outcome: Outcome,
}

/// Provenance and timing of one run (`meta.json`).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EvalMeta {
    pub submission: String,
    pub eval_run_id: String,
    /// SHA-256 of the submission's README.json.
    pub manifest_hash: String,
    pub eval_version: String,
    pub outcome: Outcome,
    pub score: Option<u32>,
    pub max_score: Option<u32>,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    pub workspace: String,
    /// Problems that did not stop the record from being written.
    pub errors: Vec<String>,
}

#[instrument(skip_all, fields(submission = %input.submission, eval_run_id = %input.eval_run_id))]
pub fn capture_results(base_dir: &Path, input: &CaptureInput<'_>) -> Result<PathBuf> {
    let results_dir = results_dir(base_dir, input.submission, input.eval_run_id);
    fs::create_dir_all(&results_dir)
        .with_context(|| format!("create results dir {}", results_dir.display()))?;

    let mut errors = Vec::new();
    let manifest_hash = match file_sha256(input.manifest_path) {
        Ok(hash) => hash,
        Err(err) => {
            errors.push(format!("manifest hash: {err:#}"));
            String::new()
        }
    };
    if !errors.is_empty() {
        warn!(errors = ?errors, "result capture had errors");
    }

    write_report(&results_dir.join("report.json"), input.report)?;

    let points = input.report.points();
    let duration = input.finished_at - input.started_at;
    let meta = EvalMeta {
        submission: input.submission.to_string(),
        eval_run_id: input.eval_run_id.to_string(),
        manifest_hash,
        eval_version: env!("CARGO_PKG_VERSION").to_string(),
        outcome: input.outcome,
        score: points.map(|(score, _)| score),
        max_score: points.map(|(_, max_score)| max_score),
        start_time: input.started_at.to_rfc3339(),
        end_time: input.finished_at.to_rfc3339(),
        duration_secs: duration.num_milliseconds() as f64 / 1000.0,
        workspace: input.workspace_root.display().to_string(),
        errors,
    };
    write_meta(&results_dir.join("meta.json"), &meta)?;
    debug!(results_dir = %results_dir.display(), "run recorded");
    Ok(results_dir)
}

pub fn results_dir(base_dir: &Path, submission: &str, eval_run_id: &str) -> PathBuf {
    base_dir.join(submission).join(eval_run_id)
}

pub fn read_meta(path: &Path) -> Result<EvalMeta> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

fn write_meta(path: &Path, meta: &EvalMeta) -> Result<()> {
    let contents = serde_json::to_string_pretty(meta).context("serialize meta")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write meta {}", path.display()))?;
    Ok(())
}

fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use grader::report::read_report;
    use tempfile::tempdir;

    #[test]
    fn results_dir_is_stable() {
        let dir = results_dir(Path::new("/tmp/results"), "todo", "eval-1");
        assert_eq!(dir, PathBuf::from("/tmp/results/todo/eval-1"));
    }

    #[test]
    fn writes_report_and_meta() {
        let temp = tempdir().expect("tempdir");
        let manifest_path = temp.path().join("README.json");
        fs::write(&manifest_path, "{}").expect("manifest");
        let report = Report::Scored {
            score: 110,
            max_score: 130,
            details: vec!["❌ SQL injection vulnerability detected".to_string()],
        };
        let input = CaptureInput {
            submission: "todo",
            manifest_path: &manifest_path,
            eval_run_id: "eval-1",
            started_at: Utc::now(),
            finished_at: Utc::now(),
            workspace_root: temp.path(),
            report: &report,
            outcome: Outcome::Partial,
        };

        let dir = capture_results(&temp.path().join("results"), &input).expect("capture");
        assert_eq!(read_report(&dir.join("report.json")).expect("report"), report);

        let meta = read_meta(&dir.join("meta.json")).expect("meta");
        assert_eq!(meta.outcome, Outcome::Partial);
        assert_eq!((meta.score, meta.max_score), (Some(110), Some(130)));
        // sha256("{}")
        assert_eq!(
            meta.manifest_hash,
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
        assert!(meta.errors.is_empty());
    }

    #[test]
    fn missing_manifest_is_recorded_not_fatal() {
        let temp = tempdir().expect("tempdir");
        let report = Report::error("Missing README.json – naming conventions unknown.");
        let manifest_path = temp.path().join("README.json");
        let input = CaptureInput {
            submission: "todo",
            manifest_path: &manifest_path,
            eval_run_id: "eval-2",
            started_at: Utc::now(),
            finished_at: Utc::now(),
            workspace_root: temp.path(),
            report: &report,
            outcome: Outcome::Error,
        };
        let dir = capture_results(&temp.path().join("results"), &input).expect("capture");
        let meta = read_meta(&dir.join("meta.json")).expect("meta");
        assert_eq!(meta.score, None);
        assert_eq!(meta.errors.len(), 1);
    }
}
