//! Deterministic stand-ins for the model oracles.
//!
//! The mock embedder hashes words into a fixed number of buckets, so texts
//! sharing vocabulary land close together in cosine space. The mock
//! cross-encoder scores the share of query words found in the passage.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use lawqa_core::{CrossEncoder, Embedder, LawQaError, Result};

use crate::onnx::l2_normalize;

const DEFAULT_DIMENSION: usize = 768;

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

// FNV-1a, stable across runs and platforms.
fn bucket(word: &str, dimension: usize) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in word.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % dimension as u64) as usize
}

/// Counts down injected failures; `true` while failures remain.
fn take_failure(remaining: &AtomicUsize) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Bag-of-words hashing embedder.
pub struct MockEmbedder {
    dimension: usize,
    failures: AtomicUsize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::with_dimension(DEFAULT_DIMENSION)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            failures: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` calls with a transient embedding error.
    pub fn failing_first(self, n: usize) -> Self {
        self.failures.store(n, Ordering::SeqCst);
        self
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for word in words(text) {
            v[bucket(&word, self.dimension)] += 1.0;
        }
        l2_normalize(v)
    }

    fn check_failure(&self) -> Result<()> {
        if take_failure(&self.failures) {
            return Err(LawQaError::embedding("injected embedder failure"));
        }
        Ok(())
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.check_failure()?;
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.check_failure()?;
        Ok(self.embed_one(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Word-overlap cross-encoder.
#[derive(Default)]
pub struct MockCrossEncoder {
    failures: AtomicUsize,
}

impl MockCrossEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls with a transient rerank error.
    pub fn failing_first(self, n: usize) -> Self {
        self.failures.store(n, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl CrossEncoder for MockCrossEncoder {
    async fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        if take_failure(&self.failures) {
            return Err(LawQaError::rerank("injected cross-encoder failure"));
        }

        let query_words: HashSet<String> = words(query).collect();
        if query_words.is_empty() {
            return Ok(vec![0.0; passages.len()]);
        }

        Ok(passages
            .iter()
            .map(|passage| {
                let passage_words: HashSet<String> = words(passage).collect();
                let shared = query_words.intersection(&passage_words).count();
                shared as f32 / query_words.len() as f32
            })
            .collect())
    }
}
