//! Hierarchical ignore resolution.
//!
//! [`IgnoreResolver::is_ignored`] decides whether a path under a sync root
//! is out of scope. Layers, in order:
//!
//! 1. **Hidden entries**: any root-relative segment starting with `.` is
//!    ignored, regardless of rule files.
//! 2. **Global patterns**: CLI/config patterns plus [`DEFAULT_BINARY_PATTERNS`],
//!    matched against the root-relative path. Not overridable by
//!    per-directory negation.
//! 3. **Directory rule files**: walking from the path's directory up to
//!    the root, each directory's `.gitignore` + custom ignore file is
//!    tested with the path relative to that directory. The closest
//!    directory with a decisive verdict wins; silent directories defer to
//!    their parent. A path below an ignored directory is ignored, matching
//!    what a pruning walk enumerates.
//!
//! Per-directory rule sets are cached and revalidated against the backing
//! files' modification times on every lookup.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::UNIX_EPOCH;

use tracing::{debug, warn};

use crate::pattern::{to_slash, PatternMatcher, Verdict};

/// Generic version-control ignore file, read first in each directory.
pub const GITIGNORE_FILE: &str = ".gitignore";

/// Default tool-specific ignore file, read after `.gitignore`.
pub const DEFAULT_IGNORE_FILE: &str = ".mirrorignore";

/// Non-indexable binary-ish files, always part of the global layer.
pub const DEFAULT_BINARY_PATTERNS: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.ico", "*.zip", "*.tar", "*.gz", "*.7z", "*.mp3",
    "*.mp4", "*.mov", "*.exe", "*.dll", "*.so", "*.dylib", "*.o", "*.a", "*.class", "*.pyc",
    "*.woff", "*.woff2", "*.ttf", "*.sqlite", "*.db",
];

/// Modification stamp of one rule file. `0` means absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct FileStamp {
    mtime_nanos: u128,
    len: u64,
}

impl FileStamp {
    fn of(path: &Path) -> Self {
        match fs::metadata(path) {
            Ok(meta) => Self {
                mtime_nanos: meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_nanos())
                    .unwrap_or(1),
                len: meta.len(),
            },
            Err(_) => Self::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DirStamp {
    gitignore: FileStamp,
    custom: FileStamp,
}

struct CachedRules {
    stamp: DirStamp,
    matcher: Arc<PatternMatcher>,
}

/// Resolves ignore status for paths under a root.
///
/// Owns its rule cache; share one resolver per sync session (it is
/// `Send + Sync`), never across sessions.
pub struct IgnoreResolver {
    ignore_file: String,
    global: PatternMatcher,
    cache: Mutex<HashMap<PathBuf, CachedRules>>,
}

impl IgnoreResolver {
    /// Create a resolver reading `ignore_file` next to each `.gitignore`,
    /// with `patterns` added to the global layer.
    pub fn new(ignore_file: impl Into<String>, patterns: &[String]) -> Self {
        let mut global = PatternMatcher::from_patterns(DEFAULT_BINARY_PATTERNS);
        for pattern in patterns {
            global.extend_from_str(pattern);
        }
        Self {
            ignore_file: ignore_file.into(),
            global,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `path` is out of scope for a sync rooted at `root`.
    ///
    /// Paths outside `root` are always ignored. A path that no longer
    /// exists is evaluated as a file.
    pub fn is_ignored(&self, path: &Path, root: &Path) -> bool {
        self.is_ignored_as(path, root, path.is_dir())
    }

    /// Like [`is_ignored`](Self::is_ignored) with the entry kind already known.
    pub fn is_ignored_as(&self, path: &Path, root: &Path, is_dir: bool) -> bool {
        let rel = match path.strip_prefix(root) {
            Ok(rel) => rel,
            Err(_) => return true,
        };
        if rel.as_os_str().is_empty() {
            return false;
        }
        if is_hidden(rel) {
            return true;
        }
        if self.global.matches(&to_slash(rel), is_dir).is_ignored() {
            return true;
        }

        // A directory excluded higher up hides everything below it, even a
        // file its own rule files re-include.
        let mut ancestor = root.to_path_buf();
        if let Some(parent) = rel.parent() {
            for component in parent.components() {
                ancestor.push(component);
                if self.closest_verdict(&ancestor, root, true).is_ignored() {
                    return true;
                }
            }
        }
        self.closest_verdict(path, root, is_dir).is_ignored()
    }

    /// Walk from `path`'s directory up to `root`; the first directory whose
    /// rule files decide wins.
    fn closest_verdict(&self, path: &Path, root: &Path, is_dir: bool) -> Verdict {
        let mut dir = path.parent();
        while let Some(current) = dir {
            if !current.starts_with(root) {
                break;
            }
            if let Ok(rel_here) = path.strip_prefix(current) {
                let verdict = self.rules_for(current).matches(&to_slash(rel_here), is_dir);
                if verdict.is_decisive() {
                    return verdict;
                }
            }
            if current == root {
                break;
            }
            dir = current.parent();
        }
        Verdict::Unmatched
    }

    /// The combined rule set of `dir`'s own ignore files, from cache when
    /// neither file changed since it was loaded.
    pub fn rules_for(&self, dir: &Path) -> Arc<PatternMatcher> {
        let gitignore_path = dir.join(GITIGNORE_FILE);
        let custom_path = dir.join(&self.ignore_file);
        let stamp = DirStamp {
            gitignore: FileStamp::of(&gitignore_path),
            custom: FileStamp::of(&custom_path),
        };

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = cache.get(dir) {
            if cached.stamp == stamp {
                return Arc::clone(&cached.matcher);
            }
            debug!(dir = %dir.display(), "ignore rules changed, reloading");
        }

        let mut matcher = PatternMatcher::empty();
        if stamp.gitignore != FileStamp::default() {
            if let Some(content) = read_ignore_file(&gitignore_path) {
                matcher.extend_from_str(&content);
            }
        }
        if stamp.custom != FileStamp::default() {
            if let Some(content) = read_ignore_file(&custom_path) {
                matcher.extend_from_str(&content);
            }
        }

        let matcher = Arc::new(matcher);
        cache.insert(
            dir.to_path_buf(),
            CachedRules {
                stamp,
                matcher: Arc::clone(&matcher),
            },
        );
        matcher
    }

    /// Number of directories with a cached rule set.
    pub fn cached_dirs(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn has_cached(&self, dir: &Path) -> bool {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(dir)
    }
}

/// Read an ignore file. Absent files yield `None` silently; unreadable
/// files are logged and treated as absent.
pub fn read_ignore_file(path: &Path) -> Option<String> {
    match fs::read(path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read ignore file, treating as absent");
            None
        }
    }
}

/// True when any segment of the relative path is a dot-entry.
pub fn is_hidden(rel: &Path) -> bool {
    rel.components().any(|c| match c {
        Component::Normal(part) => part.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolver() -> IgnoreResolver {
        IgnoreResolver::new(DEFAULT_IGNORE_FILE, &[])
    }

    #[test]
    fn hidden_segments_are_always_ignored() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join(GITIGNORE_FILE), "!.env\n!.config/**\n").unwrap();

        let r = resolver();
        assert!(r.is_ignored_as(&root.join(".env"), root, false));
        assert!(r.is_ignored_as(&root.join(".config/app/settings.toml"), root, false));
        assert!(r.is_ignored_as(&root.join("src/.cache/x"), root, false));
        assert!(!r.is_ignored_as(&root.join("src/main.rs"), root, false));
    }

    #[test]
    fn root_under_hidden_directory_still_works() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join(".workspace").join("project");
        fs::create_dir_all(&root).unwrap();
        assert!(!resolver().is_ignored_as(&root.join("a.txt"), &root, false));
    }

    #[test]
    fn paths_outside_root_are_ignored() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        assert!(resolver().is_ignored_as(&tmp.path().join("elsewhere.txt"), &root, false));
        assert!(!resolver().is_ignored_as(&root, &root, true));
    }

    #[test]
    fn descendant_negation_overrides_ancestor_ignore() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("subdir")).unwrap();
        fs::write(root.join(GITIGNORE_FILE), "*.txt\n").unwrap();
        fs::write(root.join("subdir").join(GITIGNORE_FILE), "!keep.txt\n").unwrap();

        let r = resolver();
        assert!(!r.is_ignored_as(&root.join("subdir/keep.txt"), root, false));
        assert!(r.is_ignored_as(&root.join("subdir/other.txt"), root, false));
        assert!(r.is_ignored_as(&root.join("top.txt"), root, false));
    }

    #[test]
    fn global_layer_is_not_overridable() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join(GITIGNORE_FILE), "!secret.txt\n!logo.png\n").unwrap();

        let r = IgnoreResolver::new(DEFAULT_IGNORE_FILE, &["secret.txt".to_string()]);
        assert!(r.is_ignored_as(&root.join("secret.txt"), root, false));
        assert!(r.is_ignored_as(&root.join("logo.png"), root, false));
    }

    #[test]
    fn custom_file_overrides_gitignore_in_same_directory() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join(GITIGNORE_FILE), "generated/\n").unwrap();
        fs::write(root.join(DEFAULT_IGNORE_FILE), "!generated/\n").unwrap();

        let r = resolver();
        assert!(!r.is_ignored_as(&root.join("generated"), root, true));
    }

    #[test]
    fn missing_rule_files_are_cached_as_empty() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let r = resolver();
        assert!(r.rules_for(root).is_empty());
        assert_eq!(r.cached_dirs(), 1);
        assert!(r.rules_for(root).is_empty());
        assert_eq!(r.cached_dirs(), 1);
    }

    #[test]
    fn rewritten_rule_file_invalidates_cache() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let r = resolver();
        let target = root.join("notes.md");

        assert!(!r.is_ignored_as(&target, root, false));
        fs::write(root.join(GITIGNORE_FILE), "*.md\n").unwrap();
        assert!(r.is_ignored_as(&target, root, false));
        fs::write(root.join(GITIGNORE_FILE), "*.markdown\n").unwrap();
        assert!(!r.is_ignored_as(&target, root, false));
    }

    #[test]
    fn directory_rules_see_paths_relative_to_their_directory() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("pkg/dist")).unwrap();
        fs::write(root.join("pkg").join(GITIGNORE_FILE), "/dist\n").unwrap();

        let r = resolver();
        assert!(r.is_ignored_as(&root.join("pkg/dist"), root, true));
        assert!(r.is_ignored_as(&root.join("pkg/dist/bundle.js"), root, false));
        assert!(!r.is_ignored_as(&root.join("dist/bundle.js"), root, false));
    }

    #[test]
    fn file_under_ignored_directory_stays_ignored_despite_negation() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("build")).unwrap();
        fs::write(root.join(GITIGNORE_FILE), "build/\n").unwrap();
        fs::write(root.join("build").join(GITIGNORE_FILE), "!keep.txt\n").unwrap();

        let r = resolver();
        assert!(r.is_ignored_as(&root.join("build"), root, true));
        assert!(r.is_ignored_as(&root.join("build/keep.txt"), root, false));
        assert!(r.is_ignored_as(&root.join("build/deep/keep.txt"), root, false));
    }

    #[test]
    fn unreadable_rule_file_is_treated_as_absent() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        // A directory in place of the rule file: it exists but cannot be read.
        fs::create_dir_all(root.join(GITIGNORE_FILE)).unwrap();
        fs::write(root.join(DEFAULT_IGNORE_FILE), "*.tmp\n").unwrap();

        assert!(read_ignore_file(&root.join(GITIGNORE_FILE)).is_none());
        assert!(read_ignore_file(&root.join("absent")).is_none());

        let r = resolver();
        assert_eq!(r.rules_for(root).len(), 1);
        assert!(!r.is_ignored_as(&root.join("notes.log"), root, false));
        assert!(r.is_ignored_as(&root.join("scratch.tmp"), root, false));
    }
}
