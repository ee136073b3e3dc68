//! Workspace creation and management.
//!
//! Each eval run grades a private copy of the submission, so nothing a
//! submission writes at import or call time leaks into the next run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};

/// Directories never copied into a workspace.
const SKIPPED_DIRS: [&str; 3] = ["__pycache__", ".git", ".venv"];

/// An isolated copy of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Absolute path to the workspace root.
    pub root: PathBuf,
    /// Workspace directory name (submission name, timestamp, and random suffix).
    pub name: String,
}

pub fn workspaces_dir(repo_root: &Path) -> PathBuf {
    repo_root.join("eval").join("workspaces")
}

/// Copy `source` into a freshly named directory under `base_dir`.
pub fn create_workspace(base_dir: &Path, submission: &str, source: &Path) -> Result<Workspace> {
    fs::create_dir_all(base_dir)
        .with_context(|| format!("create workspace dir {}", base_dir.display()))?;

    let name = build_workspace_name(submission, &generate_timestamp(), &generate_short_id());
    let root = base_dir.join(&name);
    if root.exists() {
        bail!("workspace {} already exists", root.display());
    }
    copy_tree(source, &root).with_context(|| format!("copy submission into {}", root.display()))?;
    Ok(Workspace { root, name })
}

pub fn build_workspace_name(submission: &str, timestamp: &str, short_id: &str) -> String {
    format!("{submission}_{timestamp}_{short_id}")
}

/// Whether a workspace directory name belongs to `submission`.
pub fn is_workspace_of(dir_name: &str, submission: &str) -> bool {
    let Some(suffix) = dir_name
        .strip_prefix(submission)
        .and_then(|rest| rest.strip_prefix('_'))
    else {
        return false;
    };
    let parts: Vec<&str> = suffix.split('_').collect();
    matches!(
        parts.as_slice(),
        [date, time, short_id]
            if date.len() == 8
                && time.len() == 6
                && short_id.len() == 6
                && date.chars().chain(time.chars()).all(|ch| ch.is_ascii_digit())
                && short_id.chars().all(|ch| ch.is_ascii_alphanumeric())
    )
}

pub fn generate_timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

pub fn generate_short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("create {}", dst.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("read {}", src.display()))? {
        let entry = entry.context("read entry")?;
        let path = entry.path();
        let file_name = entry.file_name();
        let target = dst.join(&file_name);
        let file_type = entry.file_type().context("read file type")?;
        if file_type.is_dir() {
            if file_name
                .to_str()
                .is_some_and(|name| SKIPPED_DIRS.contains(&name))
            {
                continue;
            }
            copy_tree(&path, &target)?;
        } else if file_type.is_file() {
            fs::copy(&path, &target).with_context(|| format!("copy {}", path.display()))?;
        }
    }
    Ok(())
}
