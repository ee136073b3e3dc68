//! Terminal report value for one evaluation run.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::score::Score;

/// Either a scored report or a single top-level error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Report {
    Scored {
        score: u32,
        max_score: u32,
        details: Vec<String>,
    },
    Error {
        error: String,
    },
}

impl Report {
    /// Consume the run's score. A run that attempted no checks yields an error report.
    pub fn finalize(score: Score) -> Self {
        if score.is_empty() {
            return Report::error("evaluation ended before any check ran");
        }
        Report::Scored {
            score: score.earned(),
            max_score: score.total(),
            details: score.outcomes().iter().map(|outcome| outcome.render()).collect(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Report::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Report::Error { .. })
    }

    /// `(score, max_score)` for scored reports.
    pub fn points(&self) -> Option<(u32, u32)> {
        match self {
            Report::Scored {
                score, max_score, ..
            } => Some((*score, *max_score)),
            Report::Error { .. } => None,
        }
    }

    pub fn details(&self) -> &[String] {
        match self {
            Report::Scored { details, .. } => details,
            Report::Error { .. } => &[],
        }
    }
}

pub fn write_report(path: &Path, report: &Report) -> Result<()> {
    let contents = serde_json::to_string_pretty(report).context("serialize report")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn read_report(path: &Path) -> Result<Report> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}
