//! Style lint of the CRUD module through an external linter.

use std::io;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, instrument, warn};

use crate::config::LinterConfig;
use crate::process::run_with_timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleVerdict {
    Clean,
    /// Linter exited non-zero; number of reported lines.
    Violations(usize),
    /// Linter binary not installed; counted as a pass.
    ToolUnavailable,
    TimedOut,
}

impl StyleVerdict {
    pub fn passed(self) -> bool {
        self.failure().is_none()
    }

    /// Failure detail for verdicts that cost the style points.
    pub fn failure(self) -> Option<String> {
        match self {
            StyleVerdict::Clean | StyleVerdict::ToolUnavailable => None,
            StyleVerdict::Violations(reported) => Some(format!(
                "Code style violations found ({reported} reported)"
            )),
            StyleVerdict::TimedOut => Some("Code style check timed out".to_string()),
        }
    }
}

/// Run the linter on `module` (relative to `root`) from inside `root`.
#[instrument(skip_all, fields(module = %module.display()))]
pub fn run(
    root: &Path,
    module: &Path,
    linter: &LinterConfig,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<StyleVerdict> {
    let Some((program, args)) = linter.command.split_first() else {
        bail!("linter command is empty");
    };
    let mut cmd = Command::new(program);
    cmd.args(args).arg(module).current_dir(root);

    let output = match run_with_timeout(cmd, timeout, output_limit_bytes) {
        Ok(output) => output,
        Err(err) if is_not_found(&err) => {
            warn!(program = %program, "style linter not installed, skipping");
            return Ok(StyleVerdict::ToolUnavailable);
        }
        Err(err) => return Err(err).with_context(|| format!("run {program}")),
    };

    if output.timed_out {
        return Ok(StyleVerdict::TimedOut);
    }
    if output.status.success() {
        return Ok(StyleVerdict::Clean);
    }
    let reported = output.stdout.line_count().max(output.stderr.line_count()).max(1);
    debug!(reported, exit_code = ?output.status.code(), "style violations");
    Ok(StyleVerdict::Violations(reported))
}

fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<io::Error>())
        .any(|io| io.kind() == io::ErrorKind::NotFound)
}
