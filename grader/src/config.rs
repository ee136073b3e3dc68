//! Grader configuration loaded from a TOML file.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::sandbox::ResultLimits;

/// Grader configuration (TOML).
///
/// Missing fields default to values suitable for grading small classroom
/// submissions on a developer machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GraderConfig {
    /// Interpreter used to host the submission.
    pub python: String,

    /// Budget for each load, method-probe, and sandbox request.
    pub worker_timeout_secs: u64,

    /// Budget shared by all calls of the functional or the injection stage.
    pub stage_timeout_secs: u64,

    /// Budget for the style linter subprocess.
    pub style_timeout_secs: u64,

    /// Truncate captured linter output and worker stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Rows one sandbox statement may return before it fails.
    pub max_result_rows: usize,

    /// Approximate bytes one sandbox statement may return before it fails.
    pub max_result_bytes: usize,

    /// Also require `read` to return every value of the sample record.
    pub strict_read: bool,

    pub linter: LinterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LinterConfig {
    /// Linter command; the CRUD module path is appended as the last argument.
    pub command: Vec<String>,
}

impl Default for LinterConfig {
    fn default() -> Self {
        Self {
            command: vec!["pycodestyle".to_string()],
        }
    }
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            worker_timeout_secs: 10,
            stage_timeout_secs: 20,
            style_timeout_secs: 30,
            output_limit_bytes: 50_000,
            max_result_rows: 10_000,
            max_result_bytes: 8 * 1024 * 1024,
            strict_read: false,
            linter: LinterConfig::default(),
        }
    }
}

impl GraderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.python.trim().is_empty() {
            return Err(anyhow!("python must be non-empty"));
        }
        if self.worker_timeout_secs == 0 {
            return Err(anyhow!("worker_timeout_secs must be > 0"));
        }
        if self.stage_timeout_secs == 0 {
            return Err(anyhow!("stage_timeout_secs must be > 0"));
        }
        if self.style_timeout_secs == 0 {
            return Err(anyhow!("style_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.max_result_rows == 0 || self.max_result_bytes == 0 {
            return Err(anyhow!("max_result_rows and max_result_bytes must be > 0"));
        }
        if self.linter.command.is_empty() || self.linter.command[0].trim().is_empty() {
            return Err(anyhow!("linter.command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn style_timeout(&self) -> Duration {
        Duration::from_secs(self.style_timeout_secs)
    }

    pub fn result_limits(&self) -> ResultLimits {
        ResultLimits {
            max_rows: self.max_result_rows,
            max_bytes: self.max_result_bytes,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `GraderConfig::default()`.
pub fn load_config(path: &Path) -> Result<GraderConfig> {
    if !path.exists() {
        let cfg = GraderConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GraderConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &GraderConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, GraderConfig::default());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("grader.toml");
        fs::write(
            &path,
            "stage_timeout_secs = 5\n\n[linter]\ncommand = [\"flake8\"]\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.stage_timeout_secs, 5);
        assert_eq!(cfg.linter.command, vec!["flake8"]);
        assert_eq!(cfg.python, "python3");
        assert!(!cfg.strict_read);
    }

    #[test]
    fn rejects_zero_timeout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("grader.toml");
        fs::write(&path, "worker_timeout_secs = 0\n").expect("write");
        let err = load_config(&path).expect_err("zero timeout");
        assert!(format!("{err:#}").contains("worker_timeout_secs"));
    }

    #[test]
    fn defaults_match_sandbox_limits() {
        assert_eq!(GraderConfig::default().result_limits(), ResultLimits::default());
    }

    #[test]
    fn rejects_zero_result_ceiling() {
        let cfg = GraderConfig {
            max_result_rows: 0,
            ..GraderConfig::default()
        };
        let err = cfg.validate().expect_err("zero rows");
        assert!(err.to_string().contains("max_result_rows"));
    }

    #[test]
    fn rejects_empty_linter_command() {
        let cfg = GraderConfig {
            linter: LinterConfig {
                command: Vec::new(),
            },
            ..GraderConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("grader.toml");
        let cfg = GraderConfig {
            strict_read: true,
            ..GraderConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }
}
