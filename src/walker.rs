//! Candidate file enumeration.
//!
//! Two strategies:
//!
//! - **Version control**: when the root is inside a repository, the file
//!   list comes from the VCS index (tracked + untracked-but-not-excluded),
//!   then the [`IgnoreResolver`] is applied for the custom ignore layer.
//! - **Manual descent**: otherwise a `walkdir` traversal that prunes an
//!   ignored directory before descending into it.
//!
//! Each call to [`Walker::files`] rescans the filesystem.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::git::VersionControl;
use crate::ignore::IgnoreResolver;

pub struct Walker {
    root: PathBuf,
    resolver: Arc<IgnoreResolver>,
    vcs: Option<Arc<dyn VersionControl>>,
}

impl Walker {
    /// A walker doing manual descent only.
    pub fn new(root: impl Into<PathBuf>, resolver: Arc<IgnoreResolver>) -> Self {
        Self {
            root: root.into(),
            resolver,
            vcs: None,
        }
    }

    /// Prefer the version-control index when `root` is a repository.
    pub fn with_vcs(mut self, vcs: Arc<dyn VersionControl>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily enumerate in-scope regular files as absolute paths.
    pub fn files(&self) -> Box<dyn Iterator<Item = PathBuf> + '_> {
        if let Some(listed) = self.vcs_files() {
            return Box::new(listed);
        }
        Box::new(self.descend(&self.root))
    }

    /// In-scope regular files below `dir`, a directory under the root,
    /// judged against the root's rules. Always a manual descent.
    pub fn subtree<'w>(&'w self, dir: &'w Path) -> impl Iterator<Item = PathBuf> + 'w {
        let covered = dir.starts_with(&self.root)
            && (dir == self.root.as_path()
                || !self.resolver.is_ignored_as(dir, &self.root, true));
        covered.then(|| self.descend(dir)).into_iter().flatten()
    }

    fn vcs_files(&self) -> Option<impl Iterator<Item = PathBuf> + '_> {
        let vcs = self.vcs.as_ref()?;
        if !vcs.is_repository(&self.root) {
            return None;
        }
        let listed = match vcs.list_files(&self.root) {
            Ok(listed) => listed,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "version control listing failed, walking manually");
                return None;
            }
        };
        debug!(root = %self.root.display(), count = listed.len(), "enumerating from version control");

        let root = &self.root;
        let resolver = &self.resolver;
        Some(
            listed
                .into_iter()
                .map(move |rel| root.join(rel))
                .filter(|path| is_regular_file(path))
                .filter(move |path| !resolver.is_ignored_as(path, root, false)),
        )
    }

    fn descend<'w>(&'w self, start: &'w Path) -> impl Iterator<Item = PathBuf> + 'w {
        let root = &self.root;
        let resolver = &self.resolver;
        WalkDir::new(start)
            .follow_links(false)
            .into_iter()
            .filter_entry(move |entry| {
                entry.depth() == 0
                    || !resolver.is_ignored_as(entry.path(), root, entry.file_type().is_dir())
            })
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    let path = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                    warn!(path = %path, error = %e, "cannot read directory entry, skipping subtree");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
    }
}

fn is_regular_file(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_file())
        .unwrap_or(false)
}
