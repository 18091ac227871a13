//! ONNX-based embedding model implementation.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ndarray::ArrayViewD;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{Encoding, Tokenizer};
use tracing::{debug, info};

use lawqa_core::{Embedder, EmbeddingConfig, LawQaError, Pooling, Result};

/// Build an inference session for the model at `model_path`.
pub(crate) fn build_session(
    model_path: &Path,
    num_threads: usize,
    err: fn(String) -> LawQaError,
) -> Result<Session> {
    info!("Loading ONNX model from {:?}", model_path);

    Session::builder()
        .map_err(|e| err(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| err(format!("Failed to set optimization level: {}", e)))?
        .with_intra_threads(num_threads)
        .map_err(|e| err(format!("Failed to set thread count: {}", e)))?
        .commit_from_file(model_path)
        .map_err(|e| err(format!("Failed to load model: {}", e)))
}

pub(crate) fn load_tokenizer(
    tokenizer_path: &Path,
    err: fn(String) -> LawQaError,
) -> Result<Tokenizer> {
    info!("Loading tokenizer from {:?}", tokenizer_path);

    Tokenizer::from_file(tokenizer_path)
        .map_err(|e| err(format!("Failed to load tokenizer: {}", e)))
}

/// Padded `input_ids` / `attention_mask` tensors for a batch of encodings.
pub(crate) fn batch_tensors(
    encodings: &[Encoding],
    max_tokens: usize,
    err: fn(String) -> LawQaError,
) -> Result<(Tensor<i64>, Tensor<i64>, usize)> {
    let max_len = encodings
        .iter()
        .map(|e| e.get_ids().len())
        .max()
        .unwrap_or(0)
        .min(max_tokens);
    let batch_size = encodings.len();

    let mut input_ids = vec![0i64; batch_size * max_len];
    let mut attention_mask = vec![0i64; batch_size * max_len];

    for (i, encoding) in encodings.iter().enumerate() {
        let ids = encoding.get_ids();
        let mask = encoding.get_attention_mask();
        let len = ids.len().min(max_len);

        for j in 0..len {
            input_ids[i * max_len + j] = ids[j] as i64;
            attention_mask[i * max_len + j] = mask[j] as i64;
        }
    }

    let input_ids = Tensor::from_array((vec![batch_size, max_len], input_ids))
        .map_err(|e| err(format!("Failed to create input tensor: {}", e)))?;
    let attention_mask = Tensor::from_array((vec![batch_size, max_len], attention_mask))
        .map_err(|e| err(format!("Failed to create mask tensor: {}", e)))?;

    Ok((input_ids, attention_mask, max_len))
}

/// L2 normalize a vector.
pub(crate) fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

struct EmbedderInner {
    /// ONNX inference session (run needs exclusive access).
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dimension: usize,
    max_tokens: usize,
    pooling: Pooling,
}

/// ONNX bi-encoder, e.g. gte-multilingual-base exported to ONNX.
///
/// Inference runs on the blocking thread pool so a caller-side timeout can
/// abandon a slow call without stalling the executor.
pub struct OnnxEmbedder {
    inner: Arc<EmbedderInner>,
}

impl OnnxEmbedder {
    /// Create a new embedder from configuration.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let session = build_session(&config.model_path, config.num_threads, |m| {
            LawQaError::embedding(m)
        })?;
        let tokenizer = load_tokenizer(&config.tokenizer_path, |m| LawQaError::embedding(m))?;

        info!(
            "Embedder initialized: dim={}, max_tokens={}, pooling={:?}",
            config.dimension, config.max_tokens, config.pooling
        );

        Ok(Self {
            inner: Arc::new(EmbedderInner {
                session: Mutex::new(session),
                tokenizer,
                dimension: config.dimension,
                max_tokens: config.max_tokens,
                pooling: config.pooling,
            }),
        })
    }

    async fn embed_owned(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.embed_batch(&texts))
            .await
            .map_err(|e| LawQaError::embedding(format!("Embedding task failed: {}", e)))?
    }
}

impl EmbedderInner {
    /// Embed a batch of texts.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        let encodings = self
            .tokenizer
            .encode_batch(refs, true)
            .map_err(|e| LawQaError::embedding(format!("Tokenization failed: {}", e)))?;

        let (input_ids, attention_mask, max_len) =
            batch_tensors(&encodings, self.max_tokens, |m| LawQaError::embedding(m))?;

        debug!("Embedding batch: size={}, max_len={}", encodings.len(), max_len);

        let mut session = self
            .session
            .lock()
            .map_err(|e| LawQaError::embedding(format!("Failed to lock session: {}", e)))?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask
            ])
            .map_err(|e| LawQaError::embedding(format!("Inference failed: {}", e)))?;

        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| LawQaError::embedding("No output tensor found"))?;

        let view = output
            .try_extract_array::<f32>()
            .map_err(|e| LawQaError::embedding(format!("Failed to extract tensor: {}", e)))?;

        let shape: Vec<usize> = view.shape().to_vec();
        let embeddings = match shape.len() {
            // (batch, seq, hidden)
            3 => self.pool(&view, &encodings, max_len),
            // (batch, hidden), already pooled
            2 => (0..encodings.len())
                .map(|i| l2_normalize((0..shape[1]).map(|j| view[[i, j]]).collect()))
                .collect(),
            _ => {
                return Err(LawQaError::embedding(format!(
                    "Unexpected output shape: {:?}",
                    shape
                )))
            }
        };

        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimension) {
            return Err(LawQaError::embedding(format!(
                "Model produced {} dimensions, configured for {}",
                bad.len(),
                self.dimension
            )));
        }

        Ok(embeddings)
    }

    fn pool(
        &self,
        tensor: &ArrayViewD<'_, f32>,
        encodings: &[Encoding],
        max_len: usize,
    ) -> Vec<Vec<f32>> {
        let shape = tensor.shape();
        let seq_len = shape[1];
        let hidden_dim = shape[2];

        encodings
            .iter()
            .enumerate()
            .map(|(i, encoding)| match self.pooling {
                Pooling::Cls => l2_normalize((0..hidden_dim).map(|k| tensor[[i, 0, k]]).collect()),
                Pooling::Mean => {
                    let mask = encoding.get_attention_mask();
                    let mut sum = vec![0.0f32; hidden_dim];
                    let mut valid = 0usize;

                    for j in 0..mask.len().min(max_len).min(seq_len) {
                        if mask[j] == 1 {
                            valid += 1;
                            for k in 0..hidden_dim {
                                sum[k] += tensor[[i, j, k]];
                            }
                        }
                    }

                    if valid == 0 {
                        return vec![0.0; hidden_dim];
                    }
                    l2_normalize(sum.into_iter().map(|s| s / valid as f32).collect())
                }
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for OnnxEmbedder {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.embed_owned(texts.iter().map(|t| t.to_string()).collect())
            .await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_owned(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LawQaError::embedding("No embedding returned"))
    }

    fn dimension(&self) -> usize {
        self.inner.dimension
    }
}
