//! A single parsed gitignore pattern line and its matching logic.
//!
//! Grounded on the teacher's `globset::GlobBuilder` compilation style
//! (`tools/src/search.rs::resolve_glob_list`); the anchored/negation/
//! last-match-wins semantics themselves are not in the teacher (it
//! delegates whole-hog to `ignore::WalkBuilder`) and are implemented here
//! directly against `globset`.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};

use crate::error::{IgnoreError, Result};

pub struct Pattern {
    pub negation: bool,
    pub dir_only: bool,
    pub anchored: bool,
    pub base_dir: PathBuf,
    full_path_glob: GlobMatcher,
    basename_glob: Option<GlobMatcher>,
}

impl Pattern {
    /// Parse one line of a `.gitignore` file rooted at `base_dir`. Returns
    /// `Ok(None)` for blank lines and comments.
    pub fn parse(raw_line: &str, base_dir: &Path, source_file: &Path) -> Result<Option<Self>> {
        let line = raw_line.trim_end();
        if line.is_empty() || (line.starts_with('#') && !line.starts_with("\\#")) {
            return Ok(None);
        }

        let mut text = line;
        let negation = if let Some(rest) = text.strip_prefix('!') {
            text = rest;
            true
        } else {
            false
        };
        let text = text.strip_prefix("\\!").unwrap_or(text).strip_prefix("\\#").unwrap_or(text);

        let dir_only = text.ends_with('/');
        let text = text.strip_suffix('/').unwrap_or(text);
        if text.is_empty() {
            return Ok(None);
        }

        let (anchored, pattern_body) = if let Some(stripped) = text.strip_prefix('/') {
            (true, stripped)
        } else {
            (text.contains('/'), text)
        };

        let full_path_pattern = if anchored {
            pattern_body.to_string()
        } else {
            format!("**/{pattern_body}")
        };

        let full_path_glob = build_glob(&full_path_pattern, source_file)?;
        let basename_glob = if anchored {
            None
        } else {
            Some(build_glob(pattern_body, source_file)?)
        };

        Ok(Some(Self {
            negation,
            dir_only,
            anchored,
            base_dir: base_dir.to_path_buf(),
            full_path_glob,
            basename_glob,
        }))
    }

    /// Whether this pattern applies to `path` (relative to `self.base_dir`
    /// having already been confirmed by the caller), given its dir-ness.
    #[must_use]
    pub fn matches(&self, rel_path: &str, file_name: Option<&str>, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        if self.full_path_glob.is_match(rel_path) {
            return true;
        }
        if let (Some(basename_glob), Some(name)) = (&self.basename_glob, file_name) {
            return basename_glob.is_match(name);
        }
        false
    }
}

fn build_glob(pattern: &str, source_file: &Path) -> Result<GlobMatcher> {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher())
        .map_err(|source| IgnoreError::Pattern {
            pattern: pattern.to_string(),
            source_file: source_file.to_path_buf(),
            message: source.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> PathBuf {
        PathBuf::from("/repo")
    }

    #[test]
    fn comment_and_blank_lines_parse_to_none() {
        assert!(Pattern::parse("", &base(), Path::new(".gitignore")).unwrap().is_none());
        assert!(Pattern::parse("# comment", &base(), Path::new(".gitignore")).unwrap().is_none());
    }

    #[test]
    fn leading_slash_is_anchored_and_stripped() {
        let p = Pattern::parse("/target", &base(), Path::new(".gitignore")).unwrap().unwrap();
        assert!(p.anchored);
        assert!(p.matches("target", Some("target"), true));
    }

    #[test]
    fn non_anchored_pattern_matches_basename_anywhere() {
        let p = Pattern::parse("*.log", &base(), Path::new(".gitignore")).unwrap().unwrap();
        assert!(!p.anchored);
        assert!(p.matches("deep/nested/app.log", Some("app.log"), false));
    }

    #[test]
    fn negation_prefix_is_detected() {
        let p = Pattern::parse("!keep.log", &base(), Path::new(".gitignore")).unwrap().unwrap();
        assert!(p.negation);
        assert!(p.matches("keep.log", Some("keep.log"), false));
    }

    #[test]
    fn dir_only_pattern_does_not_match_files() {
        let p = Pattern::parse("build/", &base(), Path::new(".gitignore")).unwrap().unwrap();
        assert!(p.dir_only);
        assert!(!p.matches("build", Some("build"), false));
        assert!(p.matches("build", Some("build"), true));
    }

    #[test]
    fn internal_slash_without_leading_slash_is_anchored() {
        let p = Pattern::parse("src/generated", &base(), Path::new(".gitignore")).unwrap().unwrap();
        assert!(p.anchored);
        assert!(!p.matches("other/src/generated", Some("generated"), true));
        assert!(p.matches("src/generated", Some("generated"), true));
    }
}
