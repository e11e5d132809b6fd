//! Gitignore-style pattern matching.
//!
//! A [`PatternMatcher`] holds the ordered rules of one ignore source (one
//! directory's `.gitignore` + custom ignore file, or the global pattern
//! layer) and evaluates them against a path relative to that source's
//! directory.
//!
//! # Supported syntax
//!
//! | Syntax | Meaning |
//! |--------|---------|
//! | `# comment`, blank line | skipped |
//! | `name` | matches `name` at any depth |
//! | `dir/name`, `/name` | anchored to the rule file's directory |
//! | `name/` | matches directories only |
//! | `!pattern` | re-includes a previously ignored path |
//! | `*`, `?`, `[abc]` | single-segment globs (never cross `/`) |
//! | `**` | matches across segment boundaries |
//!
//! Rules are scanned in file order and the **last** matching rule decides,
//! so a later un-negated rule can re-ignore what an earlier negation
//! re-included.

use std::path::{Component, Path};

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobMatcher};
use tracing::warn;

/// Outcome of evaluating a path against one [`PatternMatcher`].
///
/// `Unmatched` is distinct from `Included`: a silent matcher lets the
/// caller consult the next (outer) rule source, while an explicit
/// re-include must stop the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No rule matched.
    Unmatched,
    /// The last matching rule was a plain pattern.
    Ignored,
    /// The last matching rule was a `!` negation.
    Included,
}

impl Verdict {
    pub fn is_ignored(self) -> bool {
        self == Verdict::Ignored
    }

    /// True when some rule matched (either way).
    pub fn is_decisive(self) -> bool {
        self != Verdict::Unmatched
    }
}

/// One parsed ignore pattern.
#[derive(Debug, Clone)]
pub struct IgnoreRule {
    raw: String,
    negated: bool,
    dir_only: bool,
    matcher: GlobMatcher,
}

impl IgnoreRule {
    /// Parse one line of an ignore file.
    ///
    /// Returns `Ok(None)` for blank lines and comments.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let trimmed = line.trim_end_matches(['\r', '\n']).trim_end();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }

        let (negated, body) = match trimmed.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        // `\!foo` and `\#foo` match literal leading characters.
        let body = match body.strip_prefix('\\') {
            Some(rest) if rest.starts_with('!') || rest.starts_with('#') => rest,
            _ => body,
        };

        let dir_only = body.ends_with('/');
        let body = body.trim_end_matches('/');
        if body.is_empty() {
            return Ok(None);
        }

        let anchored = body.contains('/');
        let body = body.trim_start_matches('/');
        if body.is_empty() {
            return Ok(None);
        }
        let glob = if anchored || body.starts_with("**/") {
            body.to_string()
        } else {
            format!("**/{}", body)
        };

        let matcher = GlobBuilder::new(&glob)
            .literal_separator(true)
            .backslash_escape(true)
            .build()
            .with_context(|| format!("Invalid ignore pattern: '{}'", trimmed))?
            .compile_matcher();

        Ok(Some(Self {
            raw: trimmed.to_string(),
            negated,
            dir_only,
            matcher,
        }))
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    fn applies_to(&self, rel: &str, is_dir: bool) -> bool {
        (!self.dir_only || is_dir) && self.matcher.is_match(rel)
    }
}

/// An ordered, immutable list of [`IgnoreRule`]s.
#[derive(Debug, Clone, Default)]
pub struct PatternMatcher {
    rules: Vec<IgnoreRule>,
}

impl PatternMatcher {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse ignore-file content. Invalid lines are skipped with a warning.
    pub fn parse(content: &str) -> Self {
        let mut matcher = Self::empty();
        matcher.extend_from_str(content);
        matcher
    }

    /// Build a matcher from individual patterns (CLI `--ignore` values).
    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut matcher = Self::empty();
        for pattern in patterns {
            matcher.push_line(pattern.as_ref());
        }
        matcher
    }

    /// Append the rules of another source. Appended rules are evaluated
    /// after (and so override) the existing ones.
    pub fn extend_from_str(&mut self, content: &str) {
        for line in content.lines() {
            self.push_line(line);
        }
    }

    fn push_line(&mut self, line: &str) {
        match IgnoreRule::parse(line) {
            Ok(Some(rule)) => self.rules.push(rule),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "skipping ignore pattern"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn rules(&self) -> &[IgnoreRule] {
        &self.rules
    }

    /// Evaluate `relative_path` (relative to the rule source's directory).
    ///
    /// A path inside a directory that these rules ignore is itself
    /// ignored, whatever later rules say about the path.
    pub fn matches(&self, relative_path: &str, is_dir: bool) -> Verdict {
        if self.rules.is_empty() {
            return Verdict::Unmatched;
        }
        let rel = normalize(relative_path);
        if rel.is_empty() {
            return Verdict::Unmatched;
        }

        for (idx, _) in rel.match_indices('/') {
            if self.last_match(&rel[..idx], true) == Verdict::Ignored {
                return Verdict::Ignored;
            }
        }
        self.last_match(&rel, is_dir)
    }

    fn last_match(&self, rel: &str, is_dir: bool) -> Verdict {
        let mut verdict = Verdict::Unmatched;
        for rule in &self.rules {
            if rule.applies_to(rel, is_dir) {
                verdict = if rule.negated {
                    Verdict::Included
                } else {
                    Verdict::Ignored
                };
            }
        }
        verdict
    }
}

fn normalize(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    let mut rel = replaced.as_str();
    while let Some(rest) = rel.strip_prefix("./") {
        rel = rest;
    }
    rel.trim_matches('/').to_string()
}

/// Render a relative path with `/` separators, dropping `.` components.
pub fn to_slash(path: &Path) -> String {
    let mut out = String::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                if !out.is_empty() {
                    out.push('/');
                }
                out.push_str(&part.to_string_lossy());
            }
            Component::ParentDir => {
                if !out.is_empty() {
                    out.push('/');
                }
                out.push_str("..");
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_blank_lines_and_comments() {
        let m = PatternMatcher::parse("# build output\n\n   \n*.log\n");
        assert_eq!(m.len(), 1);
        assert_eq!(m.rules()[0].raw(), "*.log");
    }

    #[test]
    fn unanchored_pattern_matches_at_any_depth() {
        let m = PatternMatcher::parse("*.log");
        assert_eq!(m.matches("b.log", false), Verdict::Ignored);
        assert_eq!(m.matches("deep/nested/b.log", false), Verdict::Ignored);
        assert_eq!(m.matches("b.txt", false), Verdict::Unmatched);
    }

    #[test]
    fn anchored_pattern_only_matches_from_rule_directory() {
        let m = PatternMatcher::parse("/todo.txt\ndocs/*.md");
        assert_eq!(m.matches("todo.txt", false), Verdict::Ignored);
        assert_eq!(m.matches("sub/todo.txt", false), Verdict::Unmatched);
        assert_eq!(m.matches("docs/a.md", false), Verdict::Ignored);
        assert_eq!(m.matches("other/docs/a.md", false), Verdict::Unmatched);
    }

    #[test]
    fn single_star_does_not_cross_separator() {
        let m = PatternMatcher::parse("src/*.rs");
        assert_eq!(m.matches("src/main.rs", false), Verdict::Ignored);
        assert_eq!(m.matches("src/bin/tool.rs", false), Verdict::Unmatched);
    }

    #[test]
    fn double_star_crosses_separator() {
        let m = PatternMatcher::parse("src/**/*.rs");
        assert_eq!(m.matches("src/main.rs", false), Verdict::Ignored);
        assert_eq!(m.matches("src/bin/deep/tool.rs", false), Verdict::Ignored);
    }

    #[test]
    fn trailing_slash_matches_directories_only() {
        let m = PatternMatcher::parse("build/");
        assert_eq!(m.matches("build", true), Verdict::Ignored);
        assert_eq!(m.matches("build", false), Verdict::Unmatched);
        // Contents of an ignored directory are ignored too.
        assert_eq!(m.matches("build/out/app.js", false), Verdict::Ignored);
    }

    #[test]
    fn last_matching_rule_wins() {
        let m = PatternMatcher::parse("*.txt\n!keep.txt");
        assert_eq!(m.matches("keep.txt", false), Verdict::Included);
        assert_eq!(m.matches("drop.txt", false), Verdict::Ignored);

        let m = PatternMatcher::parse("*.txt\n!keep.txt\nkeep.txt");
        assert_eq!(m.matches("keep.txt", false), Verdict::Ignored);
    }

    #[test]
    fn negation_alone_is_decisive() {
        let m = PatternMatcher::parse("!important.log");
        let v = m.matches("important.log", false);
        assert!(v.is_decisive());
        assert!(!v.is_ignored());
        assert!(!m.matches("other.log", false).is_decisive());
    }

    #[test]
    fn escaped_leading_characters_are_literal() {
        let m = PatternMatcher::parse("\\#notes\n\\!bang");
        assert_eq!(m.matches("#notes", false), Verdict::Ignored);
        assert_eq!(m.matches("!bang", false), Verdict::Ignored);
        assert!(m.rules().iter().all(|r| !r.is_negated()));
    }

    #[test]
    fn invalid_patterns_are_skipped() {
        let m = PatternMatcher::parse("[unclosed\n*.tmp");
        assert_eq!(m.len(), 1);
        assert_eq!(m.matches("x.tmp", false), Verdict::Ignored);
    }

    #[test]
    fn normalizes_separators_and_dot_prefix() {
        let m = PatternMatcher::parse("target/");
        assert_eq!(m.matches("./target\\debug\\app", false), Verdict::Ignored);
    }

    #[test]
    fn to_slash_drops_current_dir_components() {
        assert_eq!(to_slash(Path::new("./a/b/c.txt")), "a/b/c.txt");
        assert_eq!(to_slash(Path::new("")), "");
    }
}
