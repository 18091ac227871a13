//! Dense retrieval through the embedding oracle and the vector store.

use std::sync::Arc;

use tracing::debug;

use lawqa_core::{Candidate, Embedder, Result, VectorStore};

use crate::retry::RetryPolicy;

/// Stateless adapter: embed the query, ask the store for neighbours.
///
/// Candidate scores are `1 - cosine distance`; a neighbour reported without a
/// distance scores 0. The store may return fewer than `k` hits.
#[derive(Clone)]
pub struct DenseRetriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    policy: RetryPolicy,
}

impl DenseRetriever {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>, policy: RetryPolicy) -> Self {
        Self {
            store,
            embedder,
            policy,
        }
    }

    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<Candidate>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let vector = self
            .policy
            .run("embed_query", || self.embedder.embed_query(text))
            .await?;

        let neighbors = self
            .policy
            .run("nearest_neighbors", || self.store.nearest_neighbors(&vector, k))
            .await?;

        debug!("Dense retrieval returned {} candidates", neighbors.len());

        Ok(neighbors
            .into_iter()
            .take(k)
            .map(|n| {
                let score = n.similarity();
                Candidate::new(Arc::new(n.fragment), score)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lawqa_core::{Fragment, LawQaError, Neighbor, StoreStats};
    use lawqa_embed::MockEmbedder;
    use std::time::Duration;

    struct FixedStore(Vec<Neighbor>);

    #[async_trait]
    impl VectorStore for FixedStore {
        async fn nearest_neighbors(&self, _vector: &[f32], k: usize) -> Result<Vec<Neighbor>> {
            Ok(self.0.iter().take(k).cloned().collect())
        }
        async fn upsert_batch(&self, _items: &[(Fragment, Vec<f32>)]) -> Result<()> {
            Err(LawQaError::internal("read-only"))
        }
        async fn fetch_all(&self) -> Result<Vec<Fragment>> {
            Ok(self.0.iter().map(|n| n.fragment.clone()).collect())
        }
        async fn reset(&self) -> Result<()> {
            Ok(())
        }
        async fn stats(&self) -> Result<StoreStats> {
            Ok(StoreStats::default())
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(1),
            max_attempts: 2,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_distance_to_similarity() {
        let store = FixedStore(vec![
            Neighbor {
                fragment: Fragment::new("a", "L", "1", "x"),
                distance: Some(0.1),
            },
            Neighbor {
                fragment: Fragment::new("b", "L", "2", "y"),
                distance: None,
            },
        ]);
        let retriever = DenseRetriever::new(Arc::new(store), Arc::new(MockEmbedder::new()), policy());

        let hits = retriever.query("câu hỏi", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!((hits[0].score - 0.9).abs() < 1e-6);
        assert_eq!(hits[1].score, 0.0);

        assert_eq!(retriever.query("câu hỏi", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_embedder_failure_retried() {
        let store = FixedStore(vec![Neighbor {
            fragment: Fragment::new("a", "L", "1", "x"),
            distance: Some(0.0),
        }]);
        let embedder = MockEmbedder::new().failing_first(1);
        let retriever = DenseRetriever::new(Arc::new(store), Arc::new(embedder), policy());
        assert_eq!(retriever.query("q", 3).await.unwrap().len(), 1);

        let embedder = MockEmbedder::new().failing_first(5);
        let retriever = DenseRetriever::new(
            Arc::new(FixedStore(Vec::new())),
            Arc::new(embedder),
            policy(),
        );
        let err = retriever.query("q", 3).await.unwrap_err();
        assert_eq!(err.error_code(), "UNAVAILABLE");
    }
}
