//! Incremental indexer (C10): tracks per-file state, walks a project tree
//! for changes, and drives a bounded worker pool that chunks, embeds, and
//! caches the result.
//!
//! Grounded on the teacher's `ignore::WalkBuilder` skip-dir/extension
//! conventions (`tools/src/search.rs`) and its `tokio`-fan-out style for
//! bounded concurrent work.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::chunk::{Chunk, content_hash};
use crate::chunker::chunk_file;
use crate::embed_cache::EmbeddingCache;
use crate::embedder::Embedder;
use crate::error::{IndexError, Result};

const SKIP_DIRS: &[&str] = &[
    ".git", "node_modules", "vendor", "target", "build", "dist", "out", "__pycache__", ".idea", ".vscode", "bin",
    "obj",
];

const CODE_EXTENSIONS: &[&str] = &[
    "rs", "go", "py", "js", "jsx", "ts", "tsx", "java", "c", "h", "cc", "cpp", "hpp", "rb", "php", "cs", "swift",
    "kt", "scala", "sh",
];

#[derive(Debug, Clone, Copy)]
pub struct IndexerConfig {
    pub max_file_size: u64,
    pub worker_count: usize,
    pub batch_size: usize,
    pub cache_ttl: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_file_size: 1_000_000,
            worker_count: 4,
            batch_size: 20,
            cache_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileState {
    pub path: String,
    pub mod_time: u64,
    pub size: u64,
    pub content_hash: String,
    pub last_indexed: u64,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub files_deleted: usize,
    pub chunks_embedded: usize,
    pub chunks_cached: usize,
    pub errors: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedChunkMeta {
    line_start: u32,
    line_end: u32,
    hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedFileEntry {
    file_path: String,
    last_indexed: u64,
    mod_time: u64,
    size: u64,
    chunk_count: usize,
    chunks: Vec<PersistedChunkMeta>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    project_path: String,
    last_updated: u64,
    file_count: usize,
    chunk_count: usize,
    files: HashMap<String, PersistedFileEntry>,
}

const INDEX_VERSION: u32 = 1;

pub struct Indexer {
    project_dir: PathBuf,
    index_path: PathBuf,
    embed_cache: Arc<EmbeddingCache>,
    embedder: Arc<dyn Embedder>,
    config: IndexerConfig,
    file_states: Mutex<HashMap<String, FileState>>,
    chunks: Mutex<HashMap<String, Vec<Chunk>>>,
}

impl Indexer {
    #[must_use]
    pub fn new(
        project_dir: PathBuf,
        index_path: PathBuf,
        embed_cache: Arc<EmbeddingCache>,
        embedder: Arc<dyn Embedder>,
        config: IndexerConfig,
    ) -> Self {
        let (file_states, chunks) = load_persisted(&index_path, &embed_cache);
        Self {
            project_dir,
            index_path,
            embed_cache,
            embedder,
            config,
            file_states: Mutex::new(file_states),
            chunks: Mutex::new(chunks),
        }
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().expect("poisoned").values().map(Vec::len).sum()
    }

    /// Walk `self.project_dir`, classifying files against stored
    /// `FileState` into `(new, modified, deleted)`.
    #[must_use]
    pub fn get_changed_files(&self) -> (Vec<PathBuf>, Vec<PathBuf>, Vec<PathBuf>) {
        let states = self.file_states.lock().expect("poisoned");
        let mut seen = std::collections::HashSet::new();
        let mut new_files = Vec::new();
        let mut modified_files = Vec::new();

        let mut builder = WalkBuilder::new(&self.project_dir);
        builder.hidden(false);
        builder.filter_entry(|entry| {
            entry
                .file_name()
                .to_str()
                .is_none_or(|name| !SKIP_DIRS.contains(&name))
        });

        for entry in builder.build() {
            let Ok(entry) = entry else { continue };
            let Some(file_type) = entry.file_type() else { continue };
            if !file_type.is_file() {
                continue;
            }
            let path = entry.path();
            if !has_code_extension(path) {
                continue;
            }
            let Ok(metadata) = path.metadata() else { continue };
            let Some(rel) = relative_key(path, &self.project_dir) else { continue };
            seen.insert(rel.clone());

            let mod_time = mod_time_secs(&metadata);
            let size = metadata.len();

            match states.get(&rel) {
                None => new_files.push(path.to_path_buf()),
                Some(prior) if prior.mod_time < mod_time || prior.size != size => {
                    modified_files.push(path.to_path_buf());
                }
                Some(_) => {}
            }
        }

        let deleted_files = states
            .keys()
            .filter(|path| !seen.contains(*path))
            .map(|path| self.project_dir.join(path))
            .collect();

        (new_files, modified_files, deleted_files)
    }

    /// Run one incremental indexing pass: purge deleted files, re-chunk and
    /// re-embed new/modified files through a bounded worker pool, update
    /// file state, then persist atomically.
    pub async fn index_changed(&self, cancel: &CancellationToken) -> Result<IndexStats> {
        let (new_files, modified_files, deleted_files) = self.get_changed_files();
        let mut stats = IndexStats::default();

        for path in &deleted_files {
            if let Some(rel) = relative_key(path, &self.project_dir) {
                self.file_states.lock().expect("poisoned").remove(&rel);
                self.chunks.lock().expect("poisoned").remove(&rel);
                stats.files_deleted += 1;
            }
        }

        let to_index: Vec<PathBuf> = new_files.into_iter().chain(modified_files).collect();
        self.run_worker_pool(to_index, cancel, &mut stats).await;

        self.persist()?;
        Ok(stats)
    }

    /// Index a specific set of files directly (the debounce path from C11),
    /// bypassing the directory walk in [`Self::get_changed_files`].
    pub async fn index_files(&self, paths: Vec<PathBuf>, cancel: &CancellationToken) -> Result<IndexStats> {
        let mut stats = IndexStats::default();
        self.run_worker_pool(paths, cancel, &mut stats).await;
        self.persist()?;
        Ok(stats)
    }

    async fn run_worker_pool(&self, paths: Vec<PathBuf>, cancel: &CancellationToken, stats: &mut IndexStats) {
        let semaphore = Arc::new(Semaphore::new(self.config.worker_count.max(1)));
        let mut tasks = JoinSet::new();

        for path in paths {
            if cancel.is_cancelled() {
                break;
            }
            let semaphore = Arc::clone(&semaphore);
            let embedder = Arc::clone(&self.embedder);
            let embed_cache = Arc::clone(&self.embed_cache);
            let config = self.config;
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                index_one_file(&path, &embedder, &embed_cache, config, &cancel).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Some(outcome))) => {
                    self.chunks
                        .lock()
                        .expect("poisoned")
                        .insert(outcome.rel_path.clone(), outcome.chunks);
                    self.file_states.lock().expect("poisoned").insert(outcome.rel_path.clone(), outcome.file_state);
                    stats.files_indexed += 1;
                    stats.chunks_embedded += outcome.embedded;
                    stats.chunks_cached += outcome.cached;
                }
                Ok(Ok(None)) => stats.files_skipped += 1,
                Ok(Err(_)) => stats.errors += 1,
                Err(_) => stats.errors += 1,
            }
        }
    }

    pub fn persist(&self) -> Result<()> {
        self.embed_cache.persist()?;

        let file_states = self.file_states.lock().expect("poisoned");
        let chunks = self.chunks.lock().expect("poisoned");

        let files: HashMap<String, PersistedFileEntry> = file_states
            .iter()
            .map(|(rel, state)| {
                let file_chunks = chunks.get(rel).map(|v| v.as_slice()).unwrap_or(&[]);
                let entry = PersistedFileEntry {
                    file_path: state.path.clone(),
                    last_indexed: state.last_indexed,
                    mod_time: state.mod_time,
                    size: state.size,
                    chunk_count: file_chunks.len(),
                    chunks: file_chunks
                        .iter()
                        .map(|c| PersistedChunkMeta {
                            line_start: c.line_start,
                            line_end: c.line_end,
                            hash: c.content_hash(),
                        })
                        .collect(),
                };
                (rel.clone(), entry)
            })
            .collect();

        let index = PersistedIndex {
            version: INDEX_VERSION,
            project_path: self.project_dir.to_string_lossy().to_string(),
            last_updated: now_secs(),
            file_count: files.len(),
            chunk_count: chunks.values().map(Vec::len).sum(),
            files,
        };

        drop(file_states);
        drop(chunks);

        let json = serde_json::to_vec_pretty(&index)?;
        if let Some(parent) = self.index_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| IndexError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        forge_utils::atomic_write(&self.index_path, &json).map_err(|source| IndexError::Io {
            path: self.index_path.clone(),
            source,
        })
    }

    #[must_use]
    pub fn all_chunks(&self) -> Vec<Chunk> {
        self.chunks.lock().expect("poisoned").values().flatten().cloned().collect()
    }
}

struct FileIndexOutcome {
    rel_path: String,
    chunks: Vec<Chunk>,
    file_state: FileState,
    embedded: usize,
    cached: usize,
}

async fn index_one_file(
    path: &Path,
    embedder: &Arc<dyn Embedder>,
    embed_cache: &Arc<EmbeddingCache>,
    config: IndexerConfig,
    cancel: &CancellationToken,
) -> Result<Option<FileIndexOutcome>> {
    let metadata = std::fs::metadata(path).map_err(|source| IndexError::Io { path: path.to_path_buf(), source })?;
    if metadata.len() > config.max_file_size {
        return Ok(None);
    }

    let bytes = std::fs::read(path).map_err(|source| IndexError::Io { path: path.to_path_buf(), source })?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    let rel_path = path.to_string_lossy().to_string();

    let mut chunks = chunk_file(&rel_path, &text);

    let mut hits = Vec::new();
    let mut misses = Vec::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let hash = chunk.content_hash();
        if let Some(vector) = embed_cache.get(&chunk.cache_key(), &hash) {
            hits.push((i, vector));
        } else {
            misses.push(i);
        }
    }

    let mut embedded_count = 0;
    for batch in misses.chunks(config.batch_size.max(1)) {
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        let texts: Vec<String> = batch.iter().map(|&i| chunks[i].content.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await.map_err(|e| IndexError::Embedder { message: e.to_string() })?;
        if vectors.len() != texts.len() {
            return Err(IndexError::EmbedderMismatch {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        for (&i, vector) in batch.iter().zip(vectors) {
            let hash = chunks[i].content_hash();
            embed_cache.set(&chunks[i].cache_key(), vector.clone(), &hash);
            chunks[i].embedding = Some(vector);
            embedded_count += 1;
        }
    }

    for (i, vector) in hits {
        chunks[i].embedding = Some(vector);
    }

    chunks.sort_by_key(|c| c.line_start);
    let cached_count = chunks.len() - embedded_count;

    let file_state = FileState {
        path: rel_path.clone(),
        mod_time: mod_time_secs(&metadata),
        size: metadata.len(),
        content_hash: content_hash(&bytes),
        last_indexed: now_secs(),
    };

    Ok(Some(FileIndexOutcome {
        rel_path,
        chunks,
        file_state,
        embedded: embedded_count,
        cached: cached_count,
    }))
}

fn load_persisted(index_path: &Path, embed_cache: &EmbeddingCache) -> (HashMap<String, FileState>, HashMap<String, Vec<Chunk>>) {
    let mut file_states = HashMap::new();
    let mut chunks = HashMap::new();

    let Ok(bytes) = std::fs::read(index_path) else {
        return (file_states, chunks);
    };
    let Ok(persisted) = serde_json::from_slice::<PersistedIndex>(&bytes) else {
        return (file_states, chunks);
    };

    for (rel, entry) in persisted.files {
        let Ok(metadata) = std::fs::metadata(&entry.file_path) else {
            continue;
        };
        if mod_time_secs(&metadata) > entry.mod_time {
            continue;
        }

        let mut restored = Vec::new();
        if let Ok(text) = std::fs::read_to_string(&entry.file_path) {
            let lines: Vec<&str> = text.lines().collect();
            for meta in &entry.chunks {
                let start = meta.line_start.saturating_sub(1) as usize;
                let end = (meta.line_end as usize).min(lines.len());
                if start >= end {
                    continue;
                }
                let content = lines[start..end].join("\n");
                let mut chunk = Chunk::new(entry.file_path.clone(), meta.line_start, meta.line_end, content);
                if let Some(vector) = embed_cache.get(&chunk.cache_key(), &meta.hash) {
                    chunk.embedding = Some(vector);
                }
                restored.push(chunk);
            }
        }

        file_states.insert(
            rel.clone(),
            FileState {
                path: entry.file_path,
                mod_time: entry.mod_time,
                size: entry.size,
                content_hash: String::new(),
                last_indexed: entry.last_indexed,
            },
        );
        chunks.insert(rel, restored);
    }

    (file_states, chunks)
}

fn has_code_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| CODE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn relative_key(path: &Path, root: &Path) -> Option<String> {
    path.strip_prefix(root).ok().map(|p| p.to_string_lossy().replace('\\', "/"))
}

fn mod_time_secs(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs())
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, IndexError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    fn make_indexer(dir: &Path) -> Indexer {
        let cache = Arc::new(EmbeddingCache::load(dir.join("embeddings.gob"), Duration::from_secs(3600)));
        let embedder: Arc<dyn Embedder> = Arc::new(CountingEmbedder { calls: AtomicUsize::new(0) });
        Indexer::new(dir.to_path_buf(), dir.join("index.json"), cache, embedder, IndexerConfig::default())
    }

    #[tokio::test]
    async fn indexes_new_files_and_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("main.rs"), "fn main() {\n    println!(\"hi\");\n}\n").expect("write");

        let indexer = make_indexer(dir.path());
        let (new_files, modified, _deleted) = indexer.get_changed_files();
        assert_eq!(new_files.len(), 1);
        assert!(modified.is_empty());

        let stats = indexer.index_changed(&CancellationToken::new()).await.expect("index");
        assert_eq!(stats.files_indexed, 1);
        assert!(dir.path().join("index.json").exists());
        assert!(indexer.chunk_count() > 0);
    }

    #[tokio::test]
    async fn unchanged_file_is_not_reindexed() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("main.rs"), "fn main() {}\n").expect("write");

        let indexer = make_indexer(dir.path());
        indexer.index_changed(&CancellationToken::new()).await.expect("index");

        let (new_files, modified, _deleted) = indexer.get_changed_files();
        assert!(new_files.is_empty());
        assert!(modified.is_empty());
    }

    #[tokio::test]
    async fn deleted_file_is_purged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file_path = dir.path().join("gone.rs");
        std::fs::write(&file_path, "fn gone() {}\n").expect("write");

        let indexer = make_indexer(dir.path());
        indexer.index_changed(&CancellationToken::new()).await.expect("index");
        assert_eq!(indexer.chunk_count(), 1.max(indexer.chunk_count()));

        std::fs::remove_file(&file_path).expect("remove");
        let stats = indexer.index_changed(&CancellationToken::new()).await.expect("index");
        assert_eq!(stats.files_deleted, 1);
        assert_eq!(indexer.chunk_count(), 0);
    }

    #[tokio::test]
    async fn skips_files_larger_than_max_file_size() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("big.rs"), "x".repeat(200)).expect("write");

        let cache = Arc::new(EmbeddingCache::load(dir.path().join("embeddings.gob"), Duration::from_secs(3600)));
        let embedder: Arc<dyn Embedder> = Arc::new(CountingEmbedder { calls: AtomicUsize::new(0) });
        let mut config = IndexerConfig::default();
        config.max_file_size = 10;
        let indexer = Indexer::new(dir.path().to_path_buf(), dir.path().join("index.json"), cache, embedder, config);

        let stats = indexer.index_changed(&CancellationToken::new()).await.expect("index");
        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.files_indexed, 0);
    }
}
