//! Submission discovery under `eval/submissions/`.
//!
//! A submission is a directory whose name is a slug (`[a-z0-9_-]+`) and which
//! holds a `README.json` manifest.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use grader::manifest::MANIFEST_FILE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionEntry {
    pub name: String,
    pub root: PathBuf,
}

impl SubmissionEntry {
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }
}

pub fn submissions_dir(repo_root: &Path) -> PathBuf {
    repo_root.join("eval").join("submissions")
}

/// Find the submission called `name`.
pub fn locate(dir: &Path, name: &str) -> Result<SubmissionEntry> {
    validate_name(name)?;
    let root = dir.join(name);
    if !root.is_dir() {
        bail!("submission {} not found at {}", name, root.display());
    }
    let entry = SubmissionEntry {
        name: name.to_string(),
        root,
    };
    if !entry.manifest_path().is_file() {
        bail!(
            "submission {} has no {} at {}",
            name,
            MANIFEST_FILE,
            entry.manifest_path().display()
        );
    }
    Ok(entry)
}

/// Every slug-named directory in `dir` holding a manifest, sorted by name.
///
/// Directories with other names, or without a manifest, are not submissions.
pub fn discover_submissions(dir: &Path) -> Result<Vec<SubmissionEntry>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut entries = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("read submissions dir {}", dir.display()))?
    {
        let entry = entry.context("read submission entry")?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if !path.is_dir() || validate_name(&name).is_err() {
            continue;
        }
        if path.join(MANIFEST_FILE).is_file() {
            entries.push(SubmissionEntry { name, root: path });
        }
    }
    entries.sort_by(|left, right| left.name.cmp(&right.name));
    Ok(entries)
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("submission name must be non-empty");
    }
    if name.contains('/') || name.contains('\\') {
        bail!("submission name must not contain path separators");
    }
    if name.contains("..") {
        bail!("submission name must not contain '..'");
    }
    if !name
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        bail!("submission name must use [a-z0-9_-] only");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(dir: &Path, name: &str, with_manifest: bool) {
        let root = dir.join(name);
        fs::create_dir_all(&root).expect("submission dir");
        if with_manifest {
            fs::write(root.join(MANIFEST_FILE), "{}").expect("manifest");
        }
    }

    #[test]
    fn discovers_sorted_submissions_with_manifests() {
        let temp = tempfile::tempdir().expect("tempdir");
        submission(temp.path(), "zeta", true);
        submission(temp.path(), "alpha", true);
        submission(temp.path(), "draft", false);
        submission(temp.path(), "Not_A_Slug", true);

        let names: Vec<String> = discover_submissions(temp.path())
            .expect("discover")
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn missing_dir_has_no_submissions() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(
            discover_submissions(&temp.path().join("absent"))
                .expect("discover")
                .is_empty()
        );
    }

    #[test]
    fn rejects_path_like_names() {
        let err = validate_name("../etc").expect_err("invalid name");
        assert!(err.to_string().contains("submission name"));
        assert!(validate_name("crud-app_2").is_ok());
    }

    #[test]
    fn locate_requires_manifest() {
        let temp = tempfile::tempdir().expect("tempdir");
        submission(temp.path(), "draft", false);
        let err = locate(temp.path(), "draft").expect_err("no manifest");
        assert!(err.to_string().contains("README.json"));
        submission(temp.path(), "ready", true);
        assert_eq!(locate(temp.path(), "ready").expect("locate").name, "ready");
    }
}
