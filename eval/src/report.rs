//! Aggregation over a submission's recorded runs.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use grader::report::{Report, read_report};

use crate::outcome::Outcome;
use crate::results::read_meta;

#[derive(Debug, Default)]
pub struct ReportSummary {
    pub runs: usize,
    pub full: usize,
    pub partial: usize,
    pub halted: usize,
    pub error: usize,
    pub avg_score: Option<f64>,
    pub avg_duration_secs: Option<f64>,
    /// Check label to `(passed, attempted)`.
    pub check_pass_rates: BTreeMap<String, (usize, usize)>,
}

pub fn load_run_dirs(results_dir: &Path) -> Result<Vec<PathBuf>> {
    if !results_dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in
        fs::read_dir(results_dir).with_context(|| format!("read {}", results_dir.display()))?
    {
        let entry = entry.context("read entry")?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Summarize every run under `results_dir`; unreadable runs become warnings.
pub fn aggregate(results_dir: &Path) -> Result<(ReportSummary, Vec<String>)> {
    let mut summary = ReportSummary::default();
    let mut warnings = Vec::new();
    let mut score_total = 0.0;
    let mut scored_runs = 0usize;
    let mut duration_total = 0.0;

    for run_dir in load_run_dirs(results_dir)? {
        let meta = match read_meta(&run_dir.join("meta.json")) {
            Ok(meta) => meta,
            Err(err) => {
                warnings.push(format!(
                    "skip {}: meta.json invalid ({err:#})",
                    run_dir.display()
                ));
                continue;
            }
        };
        let report = match read_report(&run_dir.join("report.json")) {
            Ok(report) => report,
            Err(err) => {
                warnings.push(format!(
                    "skip {}: report.json invalid ({err:#})",
                    run_dir.display()
                ));
                continue;
            }
        };

        summary.runs += 1;
        match meta.outcome {
            Outcome::Full => summary.full += 1,
            Outcome::Partial => summary.partial += 1,
            Outcome::Halted => summary.halted += 1,
            Outcome::Error => summary.error += 1,
        }
        duration_total += meta.duration_secs;
        if let Some((score, _)) = report.points() {
            score_total += f64::from(score);
            scored_runs += 1;
        }
        update_check_pass_rates(&mut summary.check_pass_rates, &report);
    }

    if summary.runs > 0 {
        summary.avg_duration_secs = Some(duration_total / summary.runs as f64);
    }
    if scored_runs > 0 {
        summary.avg_score = Some(score_total / scored_runs as f64);
    }
    Ok((summary, warnings))
}

fn update_check_pass_rates(stats: &mut BTreeMap<String, (usize, usize)>, report: &Report) {
    for detail in report.details() {
        let Some((label, passed)) = classify_detail(detail) else {
            continue;
        };
        let entry = stats.entry(label.to_string()).or_insert((0, 0));
        if passed {
            entry.0 += 1;
        }
        entry.1 += 1;
    }
}

/// Map a rendered detail line to a stable check label and its pass flag.
fn classify_detail(detail: &str) -> Option<(&'static str, bool)> {
    let (passed, message) = if let Some(rest) = detail.strip_prefix("✔ ") {
        (true, rest)
    } else {
        (false, detail.strip_prefix("❌ ")?)
    };
    const LABELS: [(&str, &str); 15] = [
        ("CRUD module ", "crud_module"),
        ("DB adapter file ", "db_adapter"),
        ("CRUD class imported", "import"),
        ("Failed to load CRUD class", "import"),
        ("Method create()", "method_create"),
        ("Method read()", "method_read"),
        ("Method update()", "method_update"),
        ("Method delete()", "method_delete"),
        ("Database connection successfully sandboxed", "sandbox"),
        ("Unable to sandbox", "sandbox"),
        ("CRUD operations successfully executed", "functional"),
        ("CRUD functional test", "functional"),
        ("SQL injection", "injection"),
        ("Code is PEP8 clean", "style"),
        ("Code style", "style"),
    ];
    LABELS
        .iter()
        .find(|(prefix, _)| message.starts_with(prefix))
        .map(|(_, label)| (*label, passed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::EvalMeta;
    use tempfile::tempdir;

    fn write_run(dir: &Path, outcome: Outcome, duration: f64, report: &Report) {
        fs::create_dir_all(dir).expect("run dir");
        let points = report.points();
        let meta = EvalMeta {
            submission: "todo".to_string(),
            eval_run_id: "run".to_string(),
            manifest_hash: "hash".to_string(),
            eval_version: "0.1.0".to_string(),
            outcome,
            score: points.map(|(score, _)| score),
            max_score: points.map(|(_, max_score)| max_score),
            start_time: "now".to_string(),
            end_time: "later".to_string(),
            duration_secs: duration,
            workspace: "/tmp".to_string(),
            errors: Vec::new(),
        };
        let contents = serde_json::to_string_pretty(&meta).expect("meta json");
        fs::write(dir.join("meta.json"), contents).expect("write meta");
        grader::report::write_report(&dir.join("report.json"), report).expect("write report");
    }

    fn scored(score: u32, max_score: u32, details: &[&str]) -> Report {
        Report::Scored {
            score,
            max_score,
            details: details.iter().map(|detail| detail.to_string()).collect(),
        }
    }

    #[test]
    fn aggregates_runs() {
        let temp = tempdir().expect("tempdir");
        write_run(
            &temp.path().join("run1"),
            Outcome::Full,
            5.0,
            &scored(
                130,
                130,
                &["✔ SQL injection protection appears safe", "✔ Code is PEP8 clean"],
            ),
        );
        write_run(
            &temp.path().join("run2"),
            Outcome::Partial,
            15.0,
            &scored(
                110,
                130,
                &["❌ SQL injection vulnerability detected", "✔ Code is PEP8 clean"],
            ),
        );
        write_run(
            &temp.path().join("run3"),
            Outcome::Error,
            1.0,
            &Report::error("README.json must contain CRUD module + class name."),
        );

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert!(warnings.is_empty());
        assert_eq!(summary.runs, 3);
        assert_eq!((summary.full, summary.partial, summary.error), (1, 1, 1));
        assert_eq!(summary.avg_score, Some(120.0));
        assert_eq!(summary.avg_duration_secs, Some(7.0));
        assert_eq!(summary.check_pass_rates.get("injection"), Some(&(1, 2)));
        assert_eq!(summary.check_pass_rates.get("style"), Some(&(2, 2)));
    }

    #[test]
    fn unreadable_runs_become_warnings() {
        let temp = tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("broken")).expect("dir");
        fs::write(temp.path().join("broken").join("meta.json"), "{").expect("meta");

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert_eq!(summary.runs, 0);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("meta.json invalid"));
    }

    #[test]
    fn classifies_failure_details_by_check() {
        assert_eq!(
            classify_detail("❌ Failed to load CRUD class: SyntaxError: invalid syntax"),
            Some(("import", false))
        );
        assert_eq!(
            classify_detail("❌ CRUD functional test failed: read() failed: timed out after 20s"),
            Some(("functional", false))
        );
        assert_eq!(classify_detail("✔ Method read() found"), Some(("method_read", true)));
        assert_eq!(classify_detail("something else"), None);
    }
}
