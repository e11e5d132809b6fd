//! Version-control collaborator.
//!
//! The walker asks a [`VersionControl`] implementation whether a root is a
//! repository and, if so, for its tracked + untracked-but-not-excluded
//! files. [`Git`] shells out to the `git` binary.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use tracing::debug;


/// The version-control operations the sync engine depends on.
pub trait VersionControl: Send + Sync {
    /// Whether `dir` lies inside a working tree.
    fn is_repository(&self, dir: &Path) -> bool;

    /// Tracked files plus untracked files not excluded by the tool's own
    /// ignore rules, as paths relative to `dir`, deduplicated.
    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>>;
}

/// `git` command-line backend.
///
/// Repository checks are cached per directory for the lifetime of the
/// instance.
#[derive(Default)]
pub struct Git {
    repo_cache: Mutex<HashMap<PathBuf, bool>>,
}

impl Git {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VersionControl for Git {
    fn is_repository(&self, dir: &Path) -> bool {
        if let Some(known) = self
            .repo_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(dir)
        {
            return *known;
        }

        let inside = Command::new("git")
            .args(["rev-parse", "--is-inside-work-tree"])
            .current_dir(dir)
            .output()
            .map(|out| out.status.success() && String::from_utf8_lossy(&out.stdout).trim() == "true")
            .unwrap_or(false);
        debug!(dir = %dir.display(), inside, "git repository check");

        self.repo_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(dir.to_path_buf(), inside);
        inside
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let output = Command::new("git")
            .args(["ls-files", "-z", "--cached", "--others", "--exclude-standard"])
            .current_dir(dir)
            .output()
            .with_context(|| "Failed to execute 'git ls-files'. Is git installed?")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git ls-files failed: {}", stderr.trim());
        }

        Ok(parse_ls_files(&output.stdout))
    }
}

/// Split NUL-separated `git ls-files -z` output, keeping first occurrences.
fn parse_ls_files(stdout: &[u8]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    stdout
        .split(|b| *b == 0)
        .filter(|entry| !entry.is_empty())
        .map(|entry| PathBuf::from(String::from_utf8_lossy(entry).into_owned()))
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

/// Whether a `git` binary is callable.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn parse_ls_files_dedups_and_skips_empty() {
        let out = b"a.txt\0src/lib.rs\0a.txt\0\0";
        let files = parse_ls_files(out);
        assert_eq!(files, vec![PathBuf::from("a.txt"), PathBuf::from("src/lib.rs")]);
    }

    #[test]
    fn plain_directory_is_not_a_repository() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let git = Git::new();
        assert!(!git.is_repository(tmp.path()));
        // Second call is served from the cache.
        assert!(!git.is_repository(tmp.path()));
    }

    #[test]
    fn lists_tracked_and_untracked_but_not_ignored() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let init = Command::new("git").arg("init").arg("-q").current_dir(root).status();
        if !matches!(init, Ok(s) if s.success()) {
            return;
        }
        fs::write(root.join(".gitignore"), "*.log\n").unwrap();
        fs::write(root.join("a.txt"), "hello").unwrap();
        fs::write(root.join("b.log"), "ignored").unwrap();

        let git = Git::new();
        assert!(git.is_repository(root));
        let mut files = git.list_files(root).unwrap();
        files.sort();
        assert_eq!(files, vec![PathBuf::from(".gitignore"), PathBuf::from("a.txt")]);
    }
}
