//! Test-only helpers that write complete submissions to temporary directories.

use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use serde_json::{Value, json};
use tempfile::TempDir;

use crate::config::{GraderConfig, LinterConfig};
use crate::manifest::MANIFEST_FILE;

pub const DB_ADAPTER: &str = r#"import sqlite3


def get_connection():
    conn = sqlite3.connect("app.db")
    conn.row_factory = sqlite3.Row
    return conn
"#;

const CRUD_HEADER: &str = r#"from db import get_connection


class Crud:
    table = "users"

    def __init__(self):
        self.conn_override = None

    def _connect(self):
        if self.conn_override is not None:
            return self.conn_override()
        return get_connection()
"#;

const CREATE_BOUND: &str = r#"
    def create(self, data):
        columns = ", ".join(data.keys())
        marks = ", ".join("?" for _ in data)
        conn = self._connect()
        conn.execute(
            f"INSERT INTO {self.table} ({columns}) VALUES ({marks})",
            tuple(data.values()),
        )
        conn.commit()
        return data["id"]
"#;

const CREATE_NAIVE: &str = r#"
    def create(self, data):
        columns = ", ".join(data.keys())
        values = ", ".join(f"'{value}'" for value in data.values())
        conn = self._connect()
        conn.executescript(
            f"INSERT INTO {self.table} ({columns}) VALUES ({values})"
        )
        conn.commit()
        return data["id"]
"#;

const CREATE_NAIVE_EXECUTE: &str = r#"
    def create(self, data):
        columns = ", ".join(data.keys())
        values = ", ".join(f"'{value}'" for value in data.values())
        conn = self._connect()
        conn.execute(f"INSERT INTO {self.table} ({columns}) VALUES ({values})")
        conn.commit()
        return data["id"]
"#;

const CREATE_REJECTING_QUOTES: &str = r#"
    def create(self, data):
        if any("'" in str(value) for value in data.values()):
            raise ValueError("quotes are not allowed")
        columns = ", ".join(data.keys())
        marks = ", ".join("?" for _ in data)
        conn = self._connect()
        conn.execute(
            f"INSERT INTO {self.table} ({columns}) VALUES ({marks})",
            tuple(data.values()),
        )
        conn.commit()
        return data["id"]
"#;

const READ: &str = r#"
    def read(self, item_id):
        conn = self._connect()
        row = conn.execute(
            f"SELECT * FROM {self.table} WHERE id = ?", (item_id,)
        ).fetchone()
        return dict(row) if row else None
"#;

const READ_HANGING: &str = r#"
    def read(self, item_id):
        import time
        time.sleep(60)
        return None
"#;

const READ_RUNAWAY: &str = r#"
    def read(self, item_id):
        conn = self._connect()
        return conn.execute(
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) "
            "SELECT count(*) FROM c"
        ).fetchone()
"#;

const UPDATE: &str = r#"
    def update(self, item_id, changes):
        assignments = ", ".join(f"{column} = ?" for column in changes)
        conn = self._connect()
        cursor = conn.execute(
            f"UPDATE {self.table} SET {assignments} WHERE id = ?",
            (*changes.values(), item_id),
        )
        conn.commit()
        return cursor.rowcount > 0
"#;

const DELETE: &str = r#"
    def delete(self, item_id):
        conn = self._connect()
        cursor = conn.execute(
            f"DELETE FROM {self.table} WHERE id = ?", (item_id,)
        )
        conn.commit()
        return cursor.rowcount > 0
"#;

/// A submission directory that is removed when dropped.
pub struct Submission {
    dir: TempDir,
}

impl Submission {
    /// Parameter-bound CRUD over `users`; earns full marks.
    pub fn correct() -> Self {
        Self::with_crud(&[CRUD_HEADER, CREATE_BOUND, READ, UPDATE, DELETE].concat())
    }

    /// `create` splices values into the SQL text.
    pub fn naive_sql() -> Self {
        Self::with_crud(&[CRUD_HEADER, CREATE_NAIVE, READ, UPDATE, DELETE].concat())
    }

    /// `create` splices values into a single `execute` call.
    pub fn naive_execute() -> Self {
        Self::with_crud(&[CRUD_HEADER, CREATE_NAIVE_EXECUTE, READ, UPDATE, DELETE].concat())
    }

    /// `create` raises on any value containing a quote.
    pub fn rejecting_quotes() -> Self {
        Self::with_crud(&[CRUD_HEADER, CREATE_REJECTING_QUOTES, READ, UPDATE, DELETE].concat())
    }

    pub fn missing_delete() -> Self {
        Self::with_crud(&[CRUD_HEADER, CREATE_BOUND, READ, UPDATE].concat())
    }

    /// `read` sleeps far longer than any test timeout.
    pub fn hanging_read() -> Self {
        Self::with_crud(&[CRUD_HEADER, CREATE_BOUND, READ_HANGING, UPDATE, DELETE].concat())
    }

    /// `read` issues a query that never terminates.
    pub fn runaway_read() -> Self {
        Self::with_crud(&[CRUD_HEADER, CREATE_BOUND, READ_RUNAWAY, UPDATE, DELETE].concat())
    }

    /// The CRUD module raises at import time.
    pub fn broken_import() -> Self {
        Self::with_crud("raise RuntimeError(\"database driver not configured\")\n")
    }

    /// Manifest names a connection factory the adapter does not define.
    pub fn unknown_connect_fn() -> Self {
        let submission = Self::correct();
        let mut manifest = manifest();
        manifest["db_connect_fn"] = json!("open_database");
        submission.write_manifest(&manifest);
        submission
    }

    /// Manifest only; neither source file exists.
    pub fn without_sources() -> Self {
        let submission = Self::empty();
        submission.write_manifest(&manifest());
        submission
    }

    /// A directory with nothing in it.
    pub fn empty() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    fn with_crud(crud: &str) -> Self {
        let submission = Self::without_sources();
        submission.write("crud.py", crud);
        submission.write("db.py", DB_ADAPTER);
        submission
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(path, contents).expect("write submission file");
    }

    pub fn write_manifest(&self, manifest: &Value) {
        let contents = serde_json::to_string_pretty(manifest).expect("serialize manifest");
        self.write(MANIFEST_FILE, &contents);
    }
}

/// Manifest for the fixtures: `crud.py`/`Crud`/`db.py` over table `users`.
pub fn manifest() -> Value {
    json!({
        "crud_module": "crud.py",
        "crud_class": "Crud",
        "db_adapter": "db.py",
        "tables": {"user": "users"},
        "sample_data": {"create": {"id": 1, "name": "Alice"}}
    })
}

/// Config with short timeouts and a linter that always passes.
pub fn test_config() -> GraderConfig {
    GraderConfig {
        worker_timeout_secs: 15,
        stage_timeout_secs: 2,
        style_timeout_secs: 10,
        linter: LinterConfig {
            command: vec!["true".to_string()],
        },
        ..GraderConfig::default()
    }
}

/// Whether `python` can be started at all.
pub fn python_available(python: &str) -> bool {
    Command::new(python)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}
