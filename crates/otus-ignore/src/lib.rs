//! Parsing and application of the workspace ignore file (§4.2 "Ignore
//! semantics", §3 `IgnorePatterns`, Glossary "Protected path").
//!
//! Patterns are tar-style globs, one per line, `#`-comments and blank
//! lines skipped. A relative path is excluded if a pattern matches the
//! whole path OR matches the path's basename — this emulates `tar
//! --exclude` rather than gitignore's directory-scoped semantics, so the
//! matching logic here is hand-rolled on top of `globset` rather than
//! reusing `ignore::gitignore::Gitignore`.

use std::path::Path;

use globset::{Glob, GlobMatcher};
use thiserror::Error;

/// The workspace-relative path of the daemon's own data directory. Never
/// synced in either direction (Glossary "Protected path").
pub const DAEMON_DATA_DIR: &str = ".otus";

/// Default filename for the ignore file at the workspace root.
pub const IGNORE_FILE_NAME: &str = ".otusignore";

/// Errors that can occur while building a pattern matcher.
#[derive(Debug, Error)]
pub enum IgnoreError {
    /// A pattern line could not be compiled into a glob.
    #[error("invalid glob pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Underlying globset error.
        #[source]
        source: globset::Error,
    },
}

/// An ordered list of non-empty, non-comment glob lines parsed from the
/// workspace ignore file, plus the compiled matchers used to apply them.
#[derive(Debug, Clone)]
pub struct IgnorePatterns {
    patterns: Vec<String>,
}

impl IgnorePatterns {
    /// Parse the raw contents of an ignore file.
    ///
    /// Blank lines and `#`-prefixed comment lines are skipped; every other
    /// line is trimmed and kept verbatim as a pattern (end-to-end scenario
    /// 1: `"# hdr\nnode_modules\n\n*.log\n  .git  \n"` parses to
    /// `["node_modules", "*.log", ".git"]`).
    #[must_use]
    pub fn parse(contents: &str) -> Self {
        let patterns = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(ToString::to_string)
            .collect();
        Self { patterns }
    }

    /// An empty pattern set.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// The ordered, deduplicated-by-construction pattern list.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Re-serialize to the same ordered, newline-joined form that
    /// [`IgnorePatterns::parse`] would reproduce (round-trip property,
    /// §8 "Round-trip / idempotence").
    #[must_use]
    pub fn to_lines(&self) -> Vec<String> {
        self.patterns.clone()
    }

    /// Compile this pattern set into a [`CompiledPatterns`] usable for
    /// per-path matching.
    ///
    /// # Errors
    /// Returns an error if any pattern line is not a valid glob.
    pub fn compile(&self) -> Result<CompiledPatterns, IgnoreError> {
        let matchers = self
            .patterns
            .iter()
            .map(|p| {
                Glob::new(p)
                    .map(|g| g.compile_matcher())
                    .map_err(|source| IgnoreError::InvalidPattern {
                        pattern: p.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CompiledPatterns { matchers })
    }
}

/// A compiled form of [`IgnorePatterns`] that can test candidate paths.
pub struct CompiledPatterns {
    matchers: Vec<GlobMatcher>,
}

impl CompiledPatterns {
    /// Whether `relative_path` matches any pattern, either as the full
    /// path or as its basename (§4.2 "match full relative path OR
    /// basename") — checked against every ancestor prefix of the path, not
    /// just the path itself, so a matched directory excludes its entire
    /// subtree the way `tar --exclude` does (end-to-end scenario 2:
    /// `node_modules` must also exclude `node_modules/package.json`, which
    /// `globset` would otherwise treat as a non-match since a bare literal
    /// glob is anchored to the whole candidate).
    #[must_use]
    pub fn is_excluded(&self, relative_path: &Path) -> bool {
        relative_path
            .ancestors()
            .filter(|p| !p.as_os_str().is_empty())
            .any(|prefix| self.matches_path_or_basename(prefix))
    }

    fn matches_path_or_basename(&self, path: &Path) -> bool {
        let basename = path.file_name().and_then(|n| n.to_str());
        self.matchers
            .iter()
            .any(|m| m.is_match(path) || basename.is_some_and(|b| m.is_match(b)))
    }

    /// Whether `relative_path` is excluded by patterns OR is one of the
    /// always-protected paths (the daemon data directory or the ignore
    /// file itself).
    #[must_use]
    pub fn is_excluded_or_protected(&self, relative_path: &Path, ignore_file_name: &str) -> bool {
        is_protected(relative_path, ignore_file_name) || self.is_excluded(relative_path)
    }
}

/// Whether `relative_path` is one of the two paths that are never synced
/// regardless of pattern set: the daemon's workspace-local data directory,
/// or the ignore file itself (Glossary "Protected path").
#[must_use]
pub fn is_protected(relative_path: &Path, ignore_file_name: &str) -> bool {
    let as_str = relative_path.to_string_lossy();
    as_str == DAEMON_DATA_DIR
        || relative_path.starts_with(DAEMON_DATA_DIR)
        || as_str == ignore_file_name
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn parses_scenario_1_ignore_file() {
        let contents = "# hdr\nnode_modules\n\n*.log\n  .git  \n";
        let parsed = IgnorePatterns::parse(contents);
        assert_eq!(
            parsed.patterns(),
            &["node_modules".to_string(), "*.log".to_string(), ".git".to_string()]
        );
    }

    #[test]
    fn round_trip_reproduces_same_ordered_list() {
        let contents = "# hdr\nnode_modules\n\n*.log\n  .git  \n";
        let parsed = IgnorePatterns::parse(contents);
        let reparsed = IgnorePatterns::parse(&parsed.to_lines().join("\n"));
        assert_eq!(parsed.patterns(), reparsed.patterns());
    }

    #[test]
    fn scenario_2_tar_exclude() {
        let patterns = IgnorePatterns::parse("*.tmp\nnode_modules\n");
        let compiled = patterns.compile().unwrap();

        assert!(!compiled.is_excluded(&PathBuf::from("README.md")));
        assert!(compiled.is_excluded(&PathBuf::from("test.tmp")));
        assert!(compiled.is_excluded(&PathBuf::from("node_modules/package.json")));
    }

    #[test]
    fn basename_match_applies_to_nested_paths() {
        let patterns = IgnorePatterns::parse(".git\n");
        let compiled = patterns.compile().unwrap();
        assert!(compiled.is_excluded(&PathBuf::from(".git/cfg")));
    }

    #[test]
    fn protected_paths_are_never_synced() {
        assert!(is_protected(&PathBuf::from(".otus"), ".otusignore"));
        assert!(is_protected(&PathBuf::from(".otus/config.json"), ".otusignore"));
        assert!(is_protected(&PathBuf::from(".otusignore"), ".otusignore"));
        assert!(!is_protected(&PathBuf::from("src/main.rs"), ".otusignore"));
    }
}
