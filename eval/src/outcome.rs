use serde::{Deserialize, Serialize};

use grader::checks::MAX_SCORE;
use grader::report::Report;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Every check attempted and passed.
    Full,
    /// Every check attempted, some failed.
    Partial,
    /// A prerequisite failed and the trailing checks never ran.
    Halted,
    /// The manifest was rejected.
    Error,
}

pub fn classify_outcome(report: &Report) -> Outcome {
    match report.points() {
        None => Outcome::Error,
        Some((score, max_score)) if max_score == MAX_SCORE => {
            if score == max_score {
                Outcome::Full
            } else {
                Outcome::Partial
            }
        }
        Some(_) => Outcome::Halted,
    }
}
