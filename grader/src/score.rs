//! Weighted score accumulator for one evaluation run.
//!
//! The maximum achievable score is a function of how far the pipeline got:
//! a check only contributes to `total` once it has been attempted.

use serde::{Deserialize, Serialize};

/// Outcome of one attempted check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub passed: bool,
    pub message: String,
}

impl CheckOutcome {
    /// Human-readable detail line, prefixed with a pass/fail mark.
    pub fn render(&self) -> String {
        if self.passed {
            format!("✔ {}", self.message)
        } else {
            format!("❌ {}", self.message)
        }
    }
}

#[derive(Debug, Default)]
pub struct Score {
    total: u32,
    earned: u32,
    outcomes: Vec<CheckOutcome>,
}

impl Score {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one attempted check worth `weight` points.
    pub fn add(
        &mut self,
        weight: u32,
        passed: bool,
        success: impl Into<String>,
        failure: impl Into<String>,
    ) {
        self.total += weight;
        let message = if passed {
            self.earned += weight;
            success.into()
        } else {
            failure.into()
        };
        self.outcomes.push(CheckOutcome { passed, message });
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn earned(&self) -> u32 {
        self.earned
    }

    pub fn outcomes(&self) -> &[CheckOutcome] {
        &self.outcomes
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}
