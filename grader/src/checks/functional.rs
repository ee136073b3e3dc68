//! CRUD round trip against a fresh sandbox table.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};

use super::{ensure_worker, invoke};
use crate::manifest::Manifest;
use crate::sandbox::SandboxProvider;
use crate::worker::{CandidateSession, Deadline};

pub struct FunctionalOptions {
    /// Shared by every call of the stage.
    pub stage_timeout: Duration,
    /// Also require `read` to return every sample value.
    pub strict_read: bool,
}

/// Create, read, update and delete the sample record.
///
/// Passes when read, update and delete all return truthy values; the return
/// value of create is ignored.
#[instrument(skip_all, fields(table = manifest.primary_table().unwrap_or_default()))]
pub fn run(
    session: &mut CandidateSession<'_>,
    manifest: &Manifest,
    provider: &SandboxProvider,
    options: &FunctionalOptions,
) -> Result<()> {
    let table = manifest
        .primary_table()
        .ok_or_else(|| anyhow!("README.json declares no tables"))?;
    let id = manifest
        .sample_id()
        .cloned()
        .ok_or_else(|| anyhow!("sample_data.create has no id field"))?;

    ensure_worker(session)?;
    let db = provider.open()?;
    db.create_table(table, &manifest.sample_columns())
        .with_context(|| format!("create table {table}"))?;

    let deadline = Deadline::after(options.stage_timeout);
    let sample = Value::Object(manifest.sample.clone());
    invoke(session, "create", &[sample], &deadline, &db)?;
    let read = invoke(session, "read", &[id.clone()], &deadline, &db)?;
    let updated = invoke(
        session,
        "update",
        &[id.clone(), json!({"name": "Updated"})],
        &deadline,
        &db,
    )?;
    let deleted = invoke(session, "delete", &[id], &deadline, &db)?;
    debug!(
        read = read.truthy,
        update = updated.truthy,
        delete = deleted.truthy,
        "round trip finished"
    );

    let falsy: Vec<&str> = [("read", &read), ("update", &updated), ("delete", &deleted)]
        .into_iter()
        .filter(|(_, outcome)| !outcome.truthy)
        .map(|(method, _)| method)
        .collect();
    if !falsy.is_empty() {
        bail!("{} returned a falsy result", falsy.join(", "));
    }

    if options.strict_read {
        let missing = missing_sample_values(&manifest.sample, &read.value);
        if !missing.is_empty() {
            bail!("read() result lacks sample values for {}", missing.join(", "));
        }
    }
    Ok(())
}

/// Sample fields whose value appears nowhere in `read_value`.
///
/// Values are compared by their SQLite text rendering since the test table
/// stores every non-id field as `TEXT`.
fn missing_sample_values<'a>(sample: &'a Map<String, Value>, read_value: &Value) -> Vec<&'a str> {
    let mut seen = Vec::new();
    collect_scalars(read_value, &mut seen);
    sample
        .iter()
        .filter(|(_, value)| !value.is_null())
        .filter(|(_, value)| {
            let wanted = sql_text(value);
            !seen.iter().any(|candidate| *candidate == wanted)
        })
        .map(|(field, _)| field.as_str())
        .collect()
}

fn collect_scalars(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| collect_scalars(item, out)),
        Value::Object(fields) => fields.values().for_each(|item| collect_scalars(item, out)),
        Value::Null => {}
        scalar => out.push(sql_text(scalar)),
    }
}

fn sql_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Bool(flag) => i64::from(*flag).to_string(),
        other => other.to_string(),
    }
}
