//! Ephemeral in-memory databases that stand in for a submission's persistence.
//!
//! Every [`SandboxProvider::open`] returns a database with no data from any
//! prior call. The worker forwards each statement the submission issues through
//! a proxied connection, and the statement runs here, against whichever
//! database the current stage attached. Dropping a [`SandboxDatabase`] discards
//! it; nothing ever reaches durable storage.
//!
//! Forwarded statements run in the grader's process, so each one is bounded:
//! SQLite is interrupted once the caller's [`Deadline`] passes, and result
//! sets are cut off at [`ResultLimits`].

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result, anyhow, bail};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Batch, Connection, ErrorCode, OptionalExtension, Statement, params};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::worker::Deadline;

/// SQLite virtual-machine steps between deadline checks.
const PROGRESS_INTERVAL: i32 = 1_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SandboxError {
    /// The statement was interrupted because the request deadline passed.
    #[error("interrupted: statement outlived its deadline")]
    DeadlineExceeded,
}

/// Ceilings on what one statement may return to the submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultLimits {
    pub max_rows: usize,
    /// Approximate encoded size of all returned values.
    pub max_bytes: usize,
}

impl Default for ResultLimits {
    fn default() -> Self {
        Self {
            max_rows: 10_000,
            max_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Parameters bound to a forwarded statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParams {
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

impl Default for SqlParams {
    fn default() -> Self {
        SqlParams::Positional(Vec::new())
    }
}

impl SqlParams {
    pub fn is_empty(&self) -> bool {
        match self {
            SqlParams::Positional(values) => values.is_empty(),
            SqlParams::Named(values) => values.is_empty(),
        }
    }
}

/// A statement issued by the submission on one of its sandbox connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlStatement {
    /// Worker-side handle of the connection that issued the statement.
    pub connection: u64,
    pub sql: String,
    #[serde(default)]
    pub params: SqlParams,
}

/// Result set and cursor metadata returned to the submission.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SqlRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Affected rows for data-changing statements, `-1` for queries.
    pub rowcount: i64,
    pub lastrowid: i64,
}

/// Executes statements forwarded from a submission's connections.
///
/// An execution that runs past `deadline` fails with
/// [`SandboxError::DeadlineExceeded`] in its error chain.
pub trait StatementExecutor {
    fn execute(&self, statement: &SqlStatement, deadline: &Deadline) -> Result<SqlRows>;
}

/// Hands out fresh, isolated in-memory databases.
#[derive(Debug, Default)]
pub struct SandboxProvider {
    opened: AtomicU64,
    limits: ResultLimits,
}

impl SandboxProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: ResultLimits) -> Self {
        Self {
            opened: AtomicU64::new(0),
            limits,
        }
    }

    pub fn open(&self) -> Result<SandboxDatabase> {
        let conn = Connection::open_in_memory().context("open in-memory sandbox database")?;
        let serial = self.opened.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(serial, "sandbox database opened");
        Ok(SandboxDatabase {
            conn,
            serial,
            limits: self.limits,
        })
    }

    /// Number of databases handed out so far.
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }
}

pub struct SandboxDatabase {
    conn: Connection,
    serial: u64,
    limits: ResultLimits,
}

impl SandboxDatabase {
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Create `table` with an integer `id` primary key plus one `TEXT` column per name.
    pub fn create_table(&self, table: &str, columns: &[&str]) -> Result<()> {
        let mut definitions = vec!["id INTEGER PRIMARY KEY".to_string()];
        definitions.extend(
            columns
                .iter()
                .map(|column| format!("{} TEXT", quote_identifier(column))),
        );
        let ddl = format!(
            "CREATE TABLE {} ({})",
            quote_identifier(table),
            definitions.join(", ")
        );
        self.conn
            .execute_batch(&ddl)
            .with_context(|| format!("create sandbox table {table}"))?;
        debug!(serial = self.serial, table, "sandbox table created");
        Ok(())
    }

    /// Look the table up in the catalog; the name is bound, never interpolated.
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("query sqlite_master")?;
        Ok(found.is_some())
    }

    pub fn row_count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(table));
        self.conn
            .query_row(&sql, [], |row| row.get(0))
            .with_context(|| format!("count rows of {table}"))
    }

    fn run(&self, mut stmt: Statement<'_>, params: &SqlParams) -> Result<SqlRows> {
        bind_params(&mut stmt, params)?;
        let dml = stmt.expanded_sql().as_deref().is_some_and(is_dml);
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut rows = Vec::new();
        let mut size = 0usize;
        let mut cursor = stmt.raw_query();
        while let Some(row) = cursor.next()? {
            if rows.len() == self.limits.max_rows {
                bail!("result set too large: more than {} rows", self.limits.max_rows);
            }
            let mut values = Vec::with_capacity(columns.len());
            for index in 0..columns.len() {
                let value = row.get_ref(index)?;
                size += encoded_size(value);
                values.push(value_to_json(value));
            }
            if size > self.limits.max_bytes {
                bail!(
                    "result set too large: more than {} bytes",
                    self.limits.max_bytes
                );
            }
            rows.push(values);
        }
        drop(cursor);
        let rowcount = if dml { self.conn.changes() as i64 } else { -1 };
        Ok(SqlRows {
            columns,
            rows,
            rowcount,
            lastrowid: self.conn.last_insert_rowid(),
        })
    }

    /// Run every statement in `statement.sql`; the result of the last one is returned.
    fn run_batch(&self, statement: &SqlStatement) -> Result<SqlRows> {
        let mut batch = Batch::new(&self.conn, &statement.sql);
        let Some(first) = batch.next()? else {
            return Ok(SqlRows {
                rowcount: -1,
                lastrowid: self.conn.last_insert_rowid(),
                ..SqlRows::default()
            });
        };
        if !statement.params.is_empty() {
            if batch.next()?.is_some() {
                bail!("You can only execute one statement at a time.");
            }
            return self.run(first, &statement.params);
        }
        let mut result = self.run(first, &statement.params)?;
        while let Some(next) = batch.next()? {
            result = self.run(next, &statement.params)?;
        }
        Ok(result)
    }
}

impl StatementExecutor for SandboxDatabase {
    /// A statement with bound parameters must be a single statement; parameterless
    /// text may hold several, which run in order like a script.
    fn execute(&self, statement: &SqlStatement, deadline: &Deadline) -> Result<SqlRows> {
        trace!(
            serial = self.serial,
            connection = statement.connection,
            sql = %statement.sql,
            "sandbox statement"
        );
        if deadline.expired() {
            return Err(SandboxError::DeadlineExceeded.into());
        }
        let deadline = *deadline;
        self.conn
            .progress_handler(PROGRESS_INTERVAL, Some(move || deadline.expired()));
        let result = self.run_batch(statement);
        self.conn.progress_handler(0, None::<fn() -> bool>);

        match result {
            Err(err) if was_interrupted(&err) => {
                warn!(serial = self.serial, "sandbox statement interrupted at deadline");
                Err(err.context(SandboxError::DeadlineExceeded))
            }
            other => other,
        }
    }
}

fn was_interrupted(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<rusqlite::Error>())
        .any(|cause| cause.sqlite_error_code() == Some(ErrorCode::OperationInterrupted))
}

/// Whether the statement changes rows, judged by its leading keyword.
fn is_dml(sql: &str) -> bool {
    let keyword: String = skip_leading_comments(sql)
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect();
    ["INSERT", "UPDATE", "DELETE", "REPLACE"]
        .iter()
        .any(|dml| keyword.eq_ignore_ascii_case(dml))
}

fn skip_leading_comments(mut sql: &str) -> &str {
    loop {
        sql = sql.trim_start();
        if let Some(rest) = sql.strip_prefix("--") {
            sql = rest.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(rest) = sql.strip_prefix("/*") {
            sql = rest.split_once("*/").map_or("", |(_, tail)| tail);
        } else {
            return sql;
        }
    }
}

fn encoded_size(value: ValueRef<'_>) -> usize {
    match value {
        ValueRef::Null => 4,
        ValueRef::Integer(_) | ValueRef::Real(_) => 8,
        ValueRef::Text(bytes) => bytes.len() + 2,
        // Blobs travel as arrays of byte numbers.
        ValueRef::Blob(bytes) => bytes.len() * 4 + 2,
    }
}

fn bind_params(stmt: &mut Statement<'_>, params: &SqlParams) -> Result<()> {
    let expected = stmt.parameter_count();
    match params {
        SqlParams::Positional(values) => {
            if values.len() != expected {
                bail!(
                    "Incorrect number of bindings supplied. The current statement uses {expected}, and there are {} supplied.",
                    values.len()
                );
            }
            for (index, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(index + 1, json_to_sql(value))?;
            }
        }
        SqlParams::Named(values) => {
            for index in 1..=expected {
                let name = stmt
                    .parameter_name(index)
                    .map(|name| name.trim_start_matches([':', '@', '$']).to_string())
                    .ok_or_else(|| {
                        anyhow!("Binding {index} has no name, but you supplied a dictionary.")
                    })?;
                let value = values.get(&name).ok_or_else(|| {
                    anyhow!("You did not supply a value for binding parameter :{name}.")
                })?;
                stmt.raw_bind_parameter(index, json_to_sql(value))?;
            }
        }
    }
    Ok(())
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => number
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| number.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        Value::String(text) => SqlValue::Text(text.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(number) => Value::from(number),
        ValueRef::Real(number) => serde_json::Number::from_f64(number)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|byte| Value::from(*byte)).collect()),
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
