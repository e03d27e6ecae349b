//! Embedding cache (C8): a content-hash-keyed, TTL-bounded, per-project
//! persistent store of embedding vectors.
//!
//! Persistence is atomic (temp file + rename, grounded on
//! `forge_utils::atomic_write`); the on-disk encoding is `bincode`, the
//! closest ecosystem analogue in this pack to the original's Go
//! `encoding/gob` map-of-struct dump (see DESIGN.md).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use forge_utils::{AtomicWriteOptions, atomic_write_with_options};
use serde::{Deserialize, Serialize};

use crate::chunk::ContentHash;
use crate::error::{IndexError, Result};

/// Key used for the sentinel entry carrying the project's original
/// absolute path, for inspection rather than lookup.
pub const PROJECT_DIR_META_KEY: &str = "__meta__:project_dir";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    vector: Vec<f32>,
    content_hash: ContentHash,
    timestamp: u64,
    note: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    entries: HashMap<String, CacheEntry>,
}

pub struct EmbeddingCache {
    path: PathBuf,
    ttl: Duration,
    state: RwLock<CacheFile>,
}

impl EmbeddingCache {
    /// Load an existing cache file at `path`, or start empty if absent or
    /// unreadable (a corrupt cache degrades to a cold cache, it is never
    /// fatal).
    #[must_use]
    pub fn load(path: PathBuf, ttl: Duration) -> Self {
        let state = std::fs::read(&path)
            .ok()
            .and_then(|bytes| bincode::deserialize::<CacheFile>(&bytes).ok())
            .unwrap_or_default();
        Self {
            path,
            ttl,
            state: RwLock::new(state),
        }
    }

    /// Record the project's original absolute path as a sentinel entry.
    pub fn set_project_dir(&self, project_dir: &str) {
        let mut state = self.state.write().expect("poisoned");
        state.entries.insert(
            PROJECT_DIR_META_KEY.to_string(),
            CacheEntry {
                vector: Vec::new(),
                content_hash: String::new(),
                timestamp: now_unix(),
                note: Some(project_dir.to_string()),
            },
        );
    }

    #[must_use]
    pub fn project_dir(&self) -> Option<String> {
        let state = self.state.read().expect("poisoned");
        state.entries.get(PROJECT_DIR_META_KEY).and_then(|e| e.note.clone())
    }

    /// Returns `Some` only if the stored hash matches `content_hash` and the
    /// entry's age is within the configured TTL.
    #[must_use]
    pub fn get(&self, key: &str, content_hash: &str) -> Option<Vec<f32>> {
        let state = self.state.read().expect("poisoned");
        let entry = state.entries.get(key)?;
        if entry.content_hash != content_hash {
            return None;
        }
        let age = now_unix().saturating_sub(entry.timestamp);
        if age > self.ttl.as_secs() {
            return None;
        }
        Some(entry.vector.clone())
    }

    pub fn set(&self, key: &str, vector: Vec<f32>, content_hash: &str) {
        let mut state = self.state.write().expect("poisoned");
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                vector,
                content_hash: content_hash.to_string(),
                timestamp: now_unix(),
                note: None,
            },
        );
    }

    /// Serialize a snapshot of the current state under the write lock, then
    /// persist it to disk outside the lock (per the spec's "persistence
    /// acquires the write lock for the snapshot step only").
    pub fn persist(&self) -> Result<()> {
        let bytes = {
            let state = self.state.write().expect("poisoned");
            bincode::serialize(&*state)?
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| IndexError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        atomic_write_with_options(&self.path, &bytes, AtomicWriteOptions::default()).map_err(|source| {
            IndexError::Io {
                path: self.path.clone(),
                source,
            }
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_misses_on_hash_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = EmbeddingCache::load(dir.path().join("embeddings.gob"), Duration::from_secs(3600));
        cache.set("a.rs:1", vec![1.0, 2.0], "hash1");
        assert!(cache.get("a.rs:1", "hash2").is_none());
        assert_eq!(cache.get("a.rs:1", "hash1"), Some(vec![1.0, 2.0]));
    }

    #[test]
    fn get_misses_past_ttl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = EmbeddingCache::load(dir.path().join("embeddings.gob"), Duration::from_secs(0));
        cache.set("a.rs:1", vec![1.0], "hash1");
        std::thread::sleep(Duration::from_millis(1100));
        assert!(cache.get("a.rs:1", "hash1").is_none());
    }

    #[test]
    fn persists_and_reloads_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("embeddings.gob");
        let cache = EmbeddingCache::load(path.clone(), Duration::from_secs(3600));
        cache.set("a.rs:1", vec![1.0, 2.0, 3.0], "hash1");
        cache.set_project_dir("/home/user/project");
        cache.persist().expect("persist");

        let reloaded = EmbeddingCache::load(path, Duration::from_secs(3600));
        assert_eq!(reloaded.get("a.rs:1", "hash1"), Some(vec![1.0, 2.0, 3.0]));
        assert_eq!(reloaded.project_dir().as_deref(), Some("/home/user/project"));
    }

    #[test]
    fn set_overwrites_existing_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = EmbeddingCache::load(dir.path().join("embeddings.gob"), Duration::from_secs(3600));
        cache.set("a.rs:1", vec![1.0], "hash1");
        cache.set("a.rs:1", vec![2.0], "hash2");
        assert!(cache.get("a.rs:1", "hash1").is_none());
        assert_eq!(cache.get("a.rs:1", "hash2"), Some(vec![2.0]));
    }
}
