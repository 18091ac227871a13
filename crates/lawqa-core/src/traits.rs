//! Core traits defining the interfaces between components.
//!
//! The vector store, the embedding model, the cross-encoder and the answer
//! generator are external collaborators; the retrieval pipeline only sees
//! them through these traits.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Classification, Fragment, Neighbor, StoreStats};

/// Vector store holding fragments and their embeddings.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Nearest neighbours of `vector`, closest first, at most `k` of them.
    async fn nearest_neighbors(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>>;

    /// Insert or replace fragments (keyed by citation key) with their embeddings.
    async fn upsert_batch(&self, items: &[(Fragment, Vec<f32>)]) -> Result<()>;

    /// Every fragment currently stored, in stable order.
    async fn fetch_all(&self) -> Result<Vec<Fragment>>;

    /// Remove every fragment and embedding.
    async fn reset(&self) -> Result<()>;

    async fn stats(&self) -> Result<StoreStats>;
}

/// Embedding model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of fragment texts; vectors are L2-normalized.
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text; the vector is L2-normalized.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;
}

/// Pairwise (query, passage) relevance model.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Score each passage against the query. Output is aligned with `passages`.
    async fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>>;
}

/// Strategy deciding how much the dense signal should weigh for a query.
pub trait IntentClassifier: Send + Sync {
    fn classify(&self, query: &str) -> Classification;
}

/// Answer generation model.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a completion for `prompt` under `system` instructions.
    async fn generate(&self, system: &str, prompt: &str) -> Result<String>;
}
