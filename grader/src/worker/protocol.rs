//! Wire types for the worker's JSON-lines protocol.
//!
//! Host to worker: one [`Request`] per line, plus one [`SqlReply`] for every
//! [`WorkerMessage::Sql`] received while a request is in flight.
//! Worker to host: one [`WorkerMessage`] per line.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sandbox::{SqlRows, SqlStatement};

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request<'a> {
    /// Load a source file as a module and instantiate `class`.
    Load {
        path: &'a Path,
        module: &'a str,
        class: &'a str,
    },
    /// Report which of `names` are callable on the instance.
    Methods { names: &'a [&'a str] },
    /// Redirect the adapter's connection factory to sandbox connections.
    Sandbox {
        adapter_path: Option<&'a Path>,
        connect_fn: &'a str,
    },
    Call {
        method: &'a str,
        args: &'a [Value],
    },
    Shutdown,
}

impl Request<'_> {
    pub fn op(&self) -> &'static str {
        match self {
            Request::Load { .. } => "load",
            Request::Methods { .. } => "methods",
            Request::Sandbox { .. } => "sandbox",
            Request::Call { .. } => "call",
            Request::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SqlReply {
    Ok(SqlRows),
    Error { message: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Handshake sent once the interpreter is up.
    Ready { python: String },
    /// A statement issued on a sandbox connection; the host must reply.
    Sql(SqlStatement),
    Done { value: Value, truthy: bool },
    Fault {
        error: String,
        #[serde(default)]
        traceback: String,
    },
}

/// Result of a completed request, as seen from the submission's side.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    /// JSON rendering of the returned value.
    pub value: Value,
    /// Python truthiness of the returned value.
    pub truthy: bool,
}
