//! SQL-injection probe: a classic table-dropping payload through `create`.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::json;
use tracing::{debug, instrument};

use super::{ensure_worker, invoke};
use crate::manifest::Manifest;
use crate::sandbox::SandboxProvider;
use crate::worker::{CandidateSession, Deadline};

pub const PROBE_ID: i64 = 999;

pub fn payload(table: &str) -> String {
    format!("Robert'); DROP TABLE {table}; --")
}

/// Returns whether the target table survived the payload.
#[instrument(skip_all, fields(table = manifest.primary_table().unwrap_or_default()))]
pub fn run(
    session: &mut CandidateSession<'_>,
    manifest: &Manifest,
    provider: &SandboxProvider,
    stage_timeout: Duration,
) -> Result<bool> {
    let table = manifest
        .primary_table()
        .ok_or_else(|| anyhow!("README.json declares no tables"))?;

    ensure_worker(session)?;
    let db = provider.open()?;
    db.create_table(table, &["name"])
        .with_context(|| format!("create table {table}"))?;

    let deadline = Deadline::after(stage_timeout);
    let record = json!({"id": PROBE_ID, "name": payload(table)});
    invoke(session, "create", &[record], &deadline, &db)?;

    let survived = db.table_exists(table)?;
    debug!(survived, "injection probe finished");
    Ok(survived)
}
