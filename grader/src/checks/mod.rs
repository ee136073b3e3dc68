//! Behavioral probes run against a loaded, sandboxed submission.
//!
//! Each probe returns an `anyhow::Result`; the pipeline folds errors into the
//! failure message of its check.

pub mod functional;
pub mod injection;
pub mod style;

use anyhow::{Result, anyhow};
use serde_json::Value;

use crate::sandbox::SandboxDatabase;
use crate::worker::protocol::CallOutcome;
use crate::worker::{CandidateSession, Deadline};

pub const WEIGHT_MODULE_EXISTS: u32 = 10;
pub const WEIGHT_ADAPTER_EXISTS: u32 = 10;
pub const WEIGHT_IMPORT: u32 = 20;
/// Per required method.
pub const WEIGHT_METHOD: u32 = 5;
pub const WEIGHT_SANDBOX: u32 = 10;
pub const WEIGHT_FUNCTIONAL: u32 = 30;
pub const WEIGHT_INJECTION: u32 = 20;
pub const WEIGHT_STYLE: u32 = 10;

pub const REQUIRED_METHODS: [&str; 4] = ["create", "read", "update", "delete"];

/// Score of a submission that passes every check.
pub const MAX_SCORE: u32 = WEIGHT_MODULE_EXISTS
    + WEIGHT_ADAPTER_EXISTS
    + WEIGHT_IMPORT
    + WEIGHT_METHOD * REQUIRED_METHODS.len() as u32
    + WEIGHT_SANDBOX
    + WEIGHT_FUNCTIONAL
    + WEIGHT_INJECTION
    + WEIGHT_STYLE;

/// Call `method` on the submission with its statements served by `db`.
fn invoke(
    session: &mut CandidateSession<'_>,
    method: &str,
    args: &[Value],
    deadline: &Deadline,
    db: &SandboxDatabase,
) -> Result<CallOutcome> {
    session
        .call(method, args, deadline, db)
        .map_err(|err| anyhow!("{method}() failed: {}", err.diagnostic()))
}

/// Bring back a worker lost in an earlier stage.
fn ensure_worker(session: &mut CandidateSession<'_>) -> Result<()> {
    session
        .ensure_running()
        .map_err(|err| anyhow!("worker restart failed: {}", err.diagnostic()))
}
