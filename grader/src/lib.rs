//! Staged grader for CRUD data-access submissions.
//!
//! A submission is a directory holding a `README.json` manifest, a Python
//! module with a CRUD class, and a persistence adapter exposing a connection
//! factory. Evaluation runs a fixed sequence of weighted checks and produces a
//! [`report::Report`]:
//!
//! - **[`manifest`]**: locate and validate the submission descriptor.
//! - **[`worker`]**: host the submission in a separate interpreter process and
//!   drive it over a JSON-lines protocol.
//! - **[`sandbox`]**: ephemeral in-memory SQLite databases that serve every
//!   statement the submission issues.
//! - **[`pipeline`]** and **[`checks`]**: the gated check sequence.
//! - **[`score`]** and **[`report`]**: weighted accumulation and the final
//!   report value.
//!
//! [`evaluate`] is the single entry point; it never fails; every problem
//! ends up in the returned report.

pub mod checks;
pub mod config;
pub mod exit_codes;
pub mod logging;
pub mod manifest;
pub mod pipeline;
pub mod process;
pub mod report;
pub mod sandbox;
pub mod score;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod worker;

pub use pipeline::evaluate;
