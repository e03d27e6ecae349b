//! Incremental semantic code indexer: content-addressed embedding cache,
//! language-aware chunking, bounded-worker incremental indexing, background
//! debounced reindexing, and cosine-similarity search.

pub mod background;
pub mod chunk;
pub mod chunker;
pub mod embed_cache;
pub mod embedder;
pub mod error;
pub mod indexer;
pub mod project;
pub mod search;

pub use background::{BackgroundIndexer, BackgroundIndexerConfig, State};
pub use chunk::{Chunk, ContentHash, content_hash};
pub use chunker::chunk_file;
pub use embed_cache::EmbeddingCache;
pub use embedder::Embedder;
pub use error::{IndexError, Result};
pub use indexer::{FileState, IndexStats, Indexer, IndexerConfig};
pub use project::{cache_dir, project_id};
pub use search::{SearchResult, cosine_similarity, search};
