//! Gitignore matcher (C13): discovers `.gitignore` files at the repo root,
//! every nested directory, and the user's global gitignore, then answers
//! per-path ignore queries against the combined, ordered pattern set.
//!
//! Discovery walks the tree with `ignore::WalkBuilder`'s own gitignore
//! filtering disabled (we are building the filter, so applying one while
//! searching would be circular) — the same crate the teacher uses for
//! directory walking (`tools/src/search.rs`), just configured to enumerate
//! everything.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use ignore::WalkBuilder;
use lru::LruCache;

use crate::error::Result;
use crate::pattern::Pattern;

const DEFAULT_CACHE_CAPACITY: usize = 1000;

pub struct GitignoreMatcher {
    root: PathBuf,
    patterns: RwLock<Vec<Pattern>>,
    cache: Mutex<LruCache<PathBuf, bool>>,
}

impl GitignoreMatcher {
    /// Build a matcher for `root`, loading every `.gitignore` under it plus
    /// the user's global gitignore.
    pub fn load(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let patterns = discover_patterns(&root)?;
        Ok(Self {
            root,
            patterns: RwLock::new(patterns),
            cache: Mutex::new(LruCache::new(
                std::num::NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).expect("nonzero"),
            )),
        })
    }

    /// Re-walk the tree and rebuild the pattern set, invalidating the
    /// result cache.
    pub fn reload(&self) -> Result<()> {
        let fresh = discover_patterns(&self.root)?;
        *self.patterns.write().expect("poisoned") = fresh;
        self.cache.lock().expect("poisoned").clear();
        Ok(())
    }

    /// Whether `path` (absolute, or relative to `root`) should be ignored.
    #[must_use]
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let absolute = if path.is_absolute() { path.to_path_buf() } else { self.root.join(path) };

        if let Some(hit) = self.cache.lock().expect("poisoned").get(&absolute).copied() {
            return hit;
        }

        let verdict = {
            let patterns = self.patterns.read().expect("poisoned");
            evaluate(&patterns, &absolute, is_dir)
        };

        self.cache.lock().expect("poisoned").put(absolute, verdict);
        verdict
    }
}

fn evaluate(patterns: &[Pattern], absolute_path: &Path, is_dir: bool) -> bool {
    let file_name = absolute_path.file_name().and_then(|n| n.to_str());
    let mut ignored = false;

    for pattern in patterns {
        let Ok(rel) = absolute_path.strip_prefix(&pattern.base_dir) else {
            continue;
        };
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        if rel_str.is_empty() {
            continue;
        }
        if pattern.matches(&rel_str, file_name, is_dir) {
            ignored = !pattern.negation;
        }
    }

    ignored
}

/// Lowest to highest precedence: global gitignore, then every
/// `.gitignore` under `root` in pre-order (ancestor directories before
/// their descendants), so a nested file's patterns can override an
/// ancestor's.
fn discover_patterns(root: &Path) -> Result<Vec<Pattern>> {
    let mut patterns = Vec::new();

    if let Some(global_path) = global_gitignore_path() {
        append_file(&mut patterns, &global_path, root)?;
    }

    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .standard_filters(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false);

    for entry in builder.build() {
        let Ok(entry) = entry else { continue };
        if entry.file_name() != ".gitignore" {
            continue;
        }
        let Some(base_dir) = entry.path().parent() else { continue };
        append_file(&mut patterns, entry.path(), base_dir)?;
    }

    Ok(patterns)
}

fn append_file(patterns: &mut Vec<Pattern>, file: &Path, base_dir: &Path) -> Result<()> {
    let Ok(contents) = std::fs::read_to_string(file) else {
        return Ok(());
    };
    for line in contents.lines() {
        if let Some(pattern) = Pattern::parse(line, base_dir, file)? {
            patterns.push(pattern);
        }
    }
    Ok(())
}

fn global_gitignore_path() -> Option<PathBuf> {
    if let Some(config_dir) = dirs::config_dir() {
        let candidate = config_dir.join("git").join("ignore");
        if candidate.exists() {
            return Some(candidate);
        }
    }
    let home = dirs::home_dir()?;
    let candidate = home.join(".gitignore_global");
    candidate.exists().then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_gitignore_pattern_is_honored() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(".gitignore"), "*.log\n").expect("write");
        std::fs::write(dir.path().join("app.log"), "x").expect("write");
        std::fs::write(dir.path().join("app.rs"), "x").expect("write");

        let matcher = GitignoreMatcher::load(dir.path()).expect("load");
        assert!(matcher.is_ignored(&dir.path().join("app.log"), false));
        assert!(!matcher.is_ignored(&dir.path().join("app.rs"), false));
    }

    #[test]
    fn nested_gitignore_overrides_root_negation() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(".gitignore"), "*.log\n!keep.log\n").expect("write");
        std::fs::create_dir(dir.path().join("sub")).expect("mkdir");
        std::fs::write(dir.path().join("sub").join(".gitignore"), "keep.log\n").expect("write");

        let matcher = GitignoreMatcher::load(dir.path()).expect("load");
        assert!(!matcher.is_ignored(&dir.path().join("keep.log"), false));
        assert!(matcher.is_ignored(&dir.path().join("sub").join("keep.log"), false));
    }

    #[test]
    fn reload_invalidates_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(".gitignore"), "*.log\n").expect("write");
        let file = dir.path().join("a.log");
        std::fs::write(&file, "x").expect("write");

        let matcher = GitignoreMatcher::load(dir.path()).expect("load");
        assert!(matcher.is_ignored(&file, false));

        std::fs::write(dir.path().join(".gitignore"), "# nothing ignored\n").expect("write");
        matcher.reload().expect("reload");
        assert!(!matcher.is_ignored(&file, false));
    }

    #[test]
    fn dir_only_pattern_skips_matching_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(".gitignore"), "build/\n").expect("write");
        std::fs::write(dir.path().join("build"), "x").expect("write");

        let matcher = GitignoreMatcher::load(dir.path()).expect("load");
        assert!(!matcher.is_ignored(&dir.path().join("build"), false));
        assert!(matcher.is_ignored(&dir.path().join("build"), true));
    }
}
