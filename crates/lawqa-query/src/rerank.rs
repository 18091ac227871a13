//! Cross-encoder reranking stage.

use std::sync::Arc;

use tracing::debug;

use lawqa_core::{Candidate, CrossEncoder, LawQaError, Result};

use crate::fusion::by_score_desc;
use crate::retry::RetryPolicy;

/// Re-scores every candidate against the query on its `enriched_text`.
///
/// Output order depends on the cross-encoder score alone; fusion scores are
/// kept on the candidates but ignored for ordering.
#[derive(Clone)]
pub struct Reranker {
    encoder: Arc<dyn CrossEncoder>,
    policy: RetryPolicy,
}

impl Reranker {
    pub fn new(encoder: Arc<dyn CrossEncoder>, policy: RetryPolicy) -> Self {
        Self { encoder, policy }
    }

    pub async fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<Candidate>,
        final_k: usize,
    ) -> Result<Vec<Candidate>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let passages: Vec<&str> = candidates
            .iter()
            .map(|c| c.fragment.enriched_text.as_str())
            .collect();

        let scores = self
            .policy
            .run("rerank", || self.encoder.score(query, &passages))
            .await?;

        if scores.len() != candidates.len() {
            return Err(LawQaError::rerank(format!(
                "Cross-encoder returned {} scores for {} candidates",
                scores.len(),
                candidates.len()
            )));
        }

        for (candidate, score) in candidates.iter_mut().zip(scores) {
            candidate.rerank_score = Some(score);
        }

        candidates.sort_by(|a, b| {
            by_score_desc(
                a.rerank_score.unwrap_or(f32::NAN),
                b.rerank_score.unwrap_or(f32::NAN),
            )
        });
        candidates.truncate(final_k);

        debug!("Reranked to {} candidates", candidates.len());
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lawqa_core::Fragment;
    use lawqa_embed::MockCrossEncoder;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    struct CountingEncoder(AtomicUsize);

    #[async_trait]
    impl CrossEncoder for CountingEncoder {
        async fn score(&self, _query: &str, passages: &[&str]) -> Result<Vec<f32>> {
            self.0.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(vec![0.0; passages.len()])
        }
    }

    /// Scores the first passage NaN, the rest by position.
    struct NanFirstEncoder;

    #[async_trait]
    impl CrossEncoder for NanFirstEncoder {
        async fn score(&self, _query: &str, passages: &[&str]) -> Result<Vec<f32>> {
            Ok((0..passages.len())
                .map(|i| if i == 0 { f32::NAN } else { i as f32 })
                .collect())
        }
    }

    fn candidate(key: &str, enriched: &str, score: f32) -> Candidate {
        let mut f = Fragment::new(key, "L", "1", enriched);
        f.enriched_text = enriched.to_string();
        Candidate::new(Arc::new(f), score)
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::once(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_reorders_by_rerank_score() {
        let reranker = Reranker::new(Arc::new(MockCrossEncoder::new()), policy());
        let input = vec![
            candidate("a", "quy định về đèn chiếu sáng", 0.9),
            candidate("b", "phạt tiền người vượt đèn đỏ", 0.5),
            candidate("c", "vượt đèn đỏ bị phạt", 0.4),
        ];

        let out = reranker.rerank("phạt vượt đèn đỏ", input, 2).await.unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|c| c.citation_key() != "a"));
        assert!(out[0].rerank_score >= out[1].rerank_score);
        // Fusion scores survive untouched.
        assert!(out.iter().any(|c| (c.score - 0.5).abs() < 1e-6));
    }

    #[tokio::test]
    async fn test_size_is_min_of_input_and_k() {
        let reranker = Reranker::new(Arc::new(MockCrossEncoder::new()), policy());
        let input = vec![candidate("a", "x", 0.1), candidate("b", "y", 0.2)];
        let out = reranker.rerank("x", input, 10).await.unwrap();
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn test_nan_rerank_score_ranks_last() {
        let reranker = Reranker::new(Arc::new(NanFirstEncoder), policy());
        let input = vec![
            candidate("a", "x", 0.9),
            candidate("b", "y", 0.5),
            candidate("c", "z", 0.4),
        ];

        let out = reranker.rerank("q", input, 3).await.unwrap();
        let keys: Vec<&str> = out.iter().map(|c| c.citation_key()).collect();
        assert_eq!(keys, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_empty_input_skips_oracle() {
        let encoder = Arc::new(CountingEncoder(AtomicUsize::new(0)));
        let reranker = Reranker::new(encoder.clone(), policy());

        assert!(reranker.rerank("q", Vec::new(), 5).await.unwrap().is_empty());
        assert_eq!(encoder.0.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_propagates() {
        let reranker = Reranker::new(Arc::new(MockCrossEncoder::new().failing_first(3)), policy());
        let err = reranker
            .rerank("q", vec![candidate("a", "x", 0.1)], 1)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "UNAVAILABLE");
    }
}
