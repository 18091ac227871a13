//! ONNX cross-encoder for reranking.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ort::session::Session;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use lawqa_core::{CrossEncoder, LawQaError, RerankerConfig, Result};

use crate::onnx::{batch_tensors, build_session, load_tokenizer};

struct CrossEncoderInner {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    max_tokens: usize,
}

/// ONNX cross-encoder such as bge-reranker-v2-m3.
///
/// Each (query, passage) pair is encoded jointly and the single relevance
/// logit is squashed with a sigmoid, so scores fall in `(0, 1)`.
pub struct OnnxCrossEncoder {
    inner: Arc<CrossEncoderInner>,
}

impl OnnxCrossEncoder {
    pub fn new(config: &RerankerConfig) -> Result<Self> {
        let session =
            build_session(&config.model_path, config.num_threads, |m| LawQaError::rerank(m))?;
        let tokenizer = load_tokenizer(&config.tokenizer_path, |m| LawQaError::rerank(m))?;

        info!("Cross-encoder initialized: max_tokens={}", config.max_tokens);

        Ok(Self {
            inner: Arc::new(CrossEncoderInner {
                session: Mutex::new(session),
                tokenizer,
                max_tokens: config.max_tokens,
            }),
        })
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl CrossEncoderInner {
    fn score_pairs(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let pairs: Vec<(&str, &str)> = passages.iter().map(|p| (query, p.as_str())).collect();
        let encodings = self
            .tokenizer
            .encode_batch(pairs, true)
            .map_err(|e| LawQaError::rerank(format!("Tokenization failed: {}", e)))?;

        let (input_ids, attention_mask, max_len) =
            batch_tensors(&encodings, self.max_tokens, |m| LawQaError::rerank(m))?;

        debug!("Scoring {} pairs, max_len={}", encodings.len(), max_len);

        let mut session = self
            .session
            .lock()
            .map_err(|e| LawQaError::rerank(format!("Failed to lock session: {}", e)))?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask
            ])
            .map_err(|e| LawQaError::rerank(format!("Inference failed: {}", e)))?;

        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| LawQaError::rerank("No output tensor found"))?;

        let view = output
            .try_extract_array::<f32>()
            .map_err(|e| LawQaError::rerank(format!("Failed to extract tensor: {}", e)))?;

        // Logits come out as (batch, 1) or (batch,).
        let shape: Vec<usize> = view.shape().to_vec();
        let logits: Vec<f32> = match shape.as_slice() {
            [n, 1] => (0..*n).map(|i| view[[i, 0]]).collect(),
            [_] => view.iter().copied().collect(),
            _ => {
                return Err(LawQaError::rerank(format!(
                    "Unexpected output shape: {:?}",
                    shape
                )))
            }
        };

        if logits.len() != passages.len() {
            return Err(LawQaError::rerank(format!(
                "Model returned {} scores for {} passages",
                logits.len(),
                passages.len()
            )));
        }

        Ok(logits.into_iter().map(sigmoid).collect())
    }
}

#[async_trait]
impl CrossEncoder for OnnxCrossEncoder {
    async fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        let inner = Arc::clone(&self.inner);
        let query = query.to_string();
        let passages: Vec<String> = passages.iter().map(|p| p.to_string()).collect();

        tokio::task::spawn_blocking(move || inner.score_pairs(&query, &passages))
            .await
            .map_err(|e| LawQaError::rerank(format!("Rerank task failed: {}", e)))?
    }
}
