//! Submission manifest (`README.json`) parsing and validation.
//!
//! The manifest names the CRUD module and class under test, the persistence
//! adapter and its connection factory, the table naming, and the sample record
//! that drives the functional checks. Any failure here is a configuration
//! error: no check can run without a usable manifest.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use jsonschema::Draft;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

pub const MANIFEST_FILE: &str = "README.json";
pub const DEFAULT_CONNECT_FN: &str = "get_connection";
/// Identifier field of the sample record and primary key of the test table.
pub const ID_FIELD: &str = "id";

const V1_SCHEMA: &str = include_str!("../../schemas/manifest/v1.schema.json");

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Missing README.json – naming conventions unknown.")]
    Missing { path: PathBuf },
    #[error("README.json is malformed: {reason}")]
    Malformed { reason: String },
    #[error("README.json must contain CRUD module + class name.")]
    Incomplete,
}

impl ManifestError {
    fn malformed(reason: impl Into<String>) -> Self {
        ManifestError::Malformed {
            reason: reason.into(),
        }
    }
}

/// Logical entity name mapped to the physical table the submission uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableMapping {
    pub logical: String,
    pub physical: String,
}

/// Validated submission descriptor. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    /// CRUD module path, relative to the submission root.
    pub crud_module: PathBuf,
    pub crud_class: String,
    /// Persistence adapter path, relative to the submission root.
    pub db_adapter: Option<PathBuf>,
    /// Adapter attribute that hands out connections.
    pub db_connect_fn: String,
    /// Table mappings in declaration order.
    pub tables: Vec<TableMapping>,
    /// Sample record in declaration order, including [`ID_FIELD`].
    pub sample: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    crud_module: Option<String>,
    crud_class: Option<String>,
    db_adapter: Option<String>,
    db_connect_fn: Option<String>,
    #[serde(default)]
    tables: Map<String, Value>,
    #[serde(default)]
    sample_data: RawSampleData,
}

#[derive(Debug, Default, Deserialize)]
struct RawSampleData {
    #[serde(default)]
    create: Map<String, Value>,
}

impl Manifest {
    /// Locate `README.json` under `root` and parse it.
    pub fn load(root: &Path) -> Result<Self, ManifestError> {
        let path = root.join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(ManifestError::Missing { path });
        }
        let contents = fs::read_to_string(&path)
            .map_err(|err| ManifestError::malformed(format!("read {}: {err}", path.display())))?;
        let manifest = Self::parse_str(&contents)?;
        debug!(
            crud_module = %manifest.crud_module.display(),
            crud_class = %manifest.crud_class,
            tables = manifest.tables.len(),
            "manifest loaded"
        );
        Ok(manifest)
    }

    pub fn parse_str(contents: &str) -> Result<Self, ManifestError> {
        let instance: Value = serde_json::from_str(contents)
            .map_err(|err| ManifestError::malformed(format!("invalid JSON: {err}")))?;
        validate_schema(&instance)?;
        let raw: RawManifest = serde_json::from_value(instance)
            .map_err(|err| ManifestError::malformed(err.to_string()))?;
        raw.validate()
    }

    /// Physical name of the first declared table.
    pub fn primary_table(&self) -> Option<&str> {
        self.tables.first().map(|table| table.physical.as_str())
    }

    pub fn sample_id(&self) -> Option<&Value> {
        self.sample.get(ID_FIELD)
    }

    /// Sample fields other than [`ID_FIELD`], in declaration order.
    pub fn sample_columns(&self) -> Vec<&str> {
        self.sample
            .keys()
            .map(String::as_str)
            .filter(|key| *key != ID_FIELD)
            .collect()
    }
}

impl RawManifest {
    fn validate(self) -> Result<Manifest, ManifestError> {
        let crud_module = non_blank(self.crud_module).ok_or(ManifestError::Incomplete)?;
        let crud_class = non_blank(self.crud_class).ok_or(ManifestError::Incomplete)?;

        let crud_module = relative_path("crud_module", &crud_module)?;
        let db_adapter = non_blank(self.db_adapter)
            .map(|adapter| relative_path("db_adapter", &adapter))
            .transpose()?;

        let db_connect_fn =
            non_blank(self.db_connect_fn).unwrap_or_else(|| DEFAULT_CONNECT_FN.to_string());
        if !IDENTIFIER_RE.is_match(&db_connect_fn) {
            return Err(ManifestError::malformed(format!(
                "db_connect_fn {db_connect_fn:?} is not an identifier"
            )));
        }

        let mut tables = Vec::with_capacity(self.tables.len());
        for (logical, physical) in self.tables {
            let physical = physical.as_str().map(str::to_string).ok_or_else(|| {
                ManifestError::malformed(format!("tables.{logical} must be a string"))
            })?;
            if !IDENTIFIER_RE.is_match(&physical) {
                return Err(ManifestError::malformed(format!(
                    "tables.{logical} {physical:?} is not a plain table name"
                )));
            }
            tables.push(TableMapping { logical, physical });
        }

        for field in self.sample_data.create.keys() {
            if !IDENTIFIER_RE.is_match(field) {
                return Err(ManifestError::malformed(format!(
                    "sample_data.create field {field:?} is not a plain column name"
                )));
            }
        }

        Ok(Manifest {
            crud_module,
            crud_class,
            db_adapter,
            db_connect_fn,
            tables,
            sample: self.sample_data.create,
        })
    }
}

/// Validate the manifest against the embedded JSON Schema (Draft 2020-12).
fn validate_schema(instance: &Value) -> Result<(), ManifestError> {
    let schema: Value = serde_json::from_str(V1_SCHEMA)
        .map_err(|err| ManifestError::malformed(format!("manifest schema: {err}")))?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| ManifestError::malformed(format!("manifest schema: {err}")))?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(ManifestError::malformed(messages.join("; ")));
    }
    Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

/// Module paths must stay inside the submission root.
fn relative_path(field: &str, raw: &str) -> Result<PathBuf, ManifestError> {
    let path = Path::new(raw);
    let escapes = path.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(ManifestError::malformed(format!(
            "{field} must be a path inside the submission, got {raw:?}"
        )));
    }
    Ok(path.to_path_buf())
}
