//! Semantic search (C12): embed the query once, score every chunk by
//! cosine similarity, return the top K.

use crate::chunk::Chunk;
use crate::embedder::Embedder;
use crate::error::{IndexError, Result};

#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchResult {
    pub file: String,
    pub line_start: u32,
    pub line_end: u32,
    pub content: String,
    pub score: f32,
}

pub async fn search(embedder: &dyn Embedder, chunks: &[Chunk], query_text: &str, top_k: usize) -> Result<Vec<SearchResult>> {
    let query_embedding = embedder
        .embed_batch(std::slice::from_ref(&query_text.to_string()))
        .await?
        .into_iter()
        .next()
        .ok_or(IndexError::EmbedderMismatch { expected: 1, got: 0 })?;

    let mut scored: Vec<(usize, f32)> = chunks
        .iter()
        .enumerate()
        .filter_map(|(i, chunk)| chunk.embedding.as_ref().map(|v| (i, cosine_similarity(&query_embedding, v))))
        .collect();

    // Stable sort descending by score keeps insertion order for ties.
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);

    Ok(scored
        .into_iter()
        .map(|(i, score)| {
            let chunk = &chunks[i];
            SearchResult {
                file: chunk.file_path.clone(),
                line_start: chunk.line_start,
                line_end: chunk.line_end,
                content: chunk.content.clone(),
                score,
            }
        })
        .collect())
}

#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticEmbedder {
        vector: Vec<f32>,
    }

    #[async_trait::async_trait]
    impl Embedder for StaticEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
            Ok(texts.iter().map(|_| self.vector.clone()).collect())
        }
    }

    #[test]
    fn identical_vectors_score_one() {
        assert!((cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn mismatched_lengths_score_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn zero_vector_scores_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn search_returns_top_k_by_descending_score() {
        let mut chunks = vec![
            Chunk::new("a.rs", 1, 5, "alpha"),
            Chunk::new("b.rs", 1, 5, "beta"),
            Chunk::new("c.rs", 1, 5, "gamma"),
        ];
        chunks[0].embedding = Some(vec![1.0, 0.0]);
        chunks[1].embedding = Some(vec![0.0, 1.0]);
        chunks[2].embedding = Some(vec![0.9, 0.1]);

        let embedder = StaticEmbedder { vector: vec![1.0, 0.0] };
        let results = search(&embedder, &chunks, "query", 2).await.expect("search");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].file, "a.rs");
        assert_eq!(results[1].file, "c.rs");
    }

    #[tokio::test]
    async fn ties_break_by_insertion_order() {
        let mut chunks = vec![Chunk::new("a.rs", 1, 5, "alpha"), Chunk::new("b.rs", 1, 5, "beta")];
        chunks[0].embedding = Some(vec![1.0, 0.0]);
        chunks[1].embedding = Some(vec![1.0, 0.0]);

        let embedder = StaticEmbedder { vector: vec![1.0, 0.0] };
        let results = search(&embedder, &chunks, "query", 2).await.expect("search");
        assert_eq!(results[0].file, "a.rs");
        assert_eq!(results[1].file, "b.rs");
    }
}
