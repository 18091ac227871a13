//! Configuration types for lawqa.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{LawQaError, Result};

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LawQaConfig {
    /// Vector store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Embedding model configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Cross-encoder configuration.
    #[serde(default)]
    pub reranker: RerankerConfig,

    /// Lexical index configuration.
    #[serde(default)]
    pub lexical: LexicalConfig,

    /// Fusion and pool sizing.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Timeouts and retries for oracle calls.
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Evidence policy applied before generation.
    #[serde(default)]
    pub answer: AnswerConfig,
}

/// Vector store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Path to the ONNX model file.
    #[serde(default = "default_embedding_model")]
    pub model_path: PathBuf,

    /// Path to tokenizer.json.
    #[serde(default = "default_embedding_tokenizer")]
    pub tokenizer_path: PathBuf,

    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default = "default_embedding_max_tokens")]
    pub max_tokens: usize,

    /// Fragments embedded per batch when indexing.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Number of threads for CPU inference.
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,

    /// How token states are reduced to one vector.
    #[serde(default)]
    pub pooling: Pooling,
}

/// Pooling over the sequence dimension of the model output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    /// First ([CLS]) token state.
    #[default]
    Cls,
    /// Attention-masked mean of all token states.
    Mean,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_path: default_embedding_model(),
            tokenizer_path: default_embedding_tokenizer(),
            dimension: default_dimension(),
            max_tokens: default_embedding_max_tokens(),
            batch_size: default_batch_size(),
            num_threads: default_num_threads(),
            pooling: Pooling::default(),
        }
    }
}

/// Cross-encoder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    #[serde(default = "default_reranker_model")]
    pub model_path: PathBuf,

    #[serde(default = "default_reranker_tokenizer")]
    pub tokenizer_path: PathBuf,

    /// Maximum tokens of a (query, passage) pair.
    #[serde(default = "default_reranker_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            model_path: default_reranker_model(),
            tokenizer_path: default_reranker_tokenizer(),
            max_tokens: default_reranker_max_tokens(),
            num_threads: default_num_threads(),
        }
    }
}

/// Lexical index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalConfig {
    /// Where the serialized index is persisted.
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// BM25 term-frequency saturation.
    #[serde(default = "default_k1")]
    pub k1: f32,

    /// BM25 document-length normalization.
    #[serde(default = "default_b")]
    pub b: f32,

    /// Extra compound words for the segmenter, one per line.
    #[serde(default)]
    pub lexicon_path: Option<PathBuf>,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            k1: default_k1(),
            b: default_b(),
            lexicon_path: None,
        }
    }
}

/// Retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Fusion weight before intent adjustment (0 = lexical only, 1 = dense only).
    #[serde(default = "default_base_alpha")]
    pub base_alpha: f32,

    /// Candidate pool handed from fusion to the reranker.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Default number of final results.
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Upper bound accepted for a caller-supplied `k`; at most `pool_size`.
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            base_alpha: default_base_alpha(),
            pool_size: default_pool_size(),
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
        }
    }
}

/// Timeouts and retries around model and store calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Timeout of a single attempt.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before attempt n+1 is `n * backoff_ms`.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

/// Evidence policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerConfig {
    /// Contexts shorter than this (in characters) are treated as no evidence.
    #[serde(default = "default_min_context_chars")]
    pub min_context_chars: usize,

    /// Contexts longer than this are cut before prompting.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            min_context_chars: default_min_context_chars(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

// Default value functions

fn default_busy_timeout() -> u32 {
    30000
}

fn default_dimension() -> usize {
    768
}

fn default_embedding_max_tokens() -> usize {
    8192
}

fn default_batch_size() -> usize {
    64
}

fn default_num_threads() -> usize {
    4
}

fn default_reranker_max_tokens() -> usize {
    512
}

fn default_k1() -> f32 {
    1.5
}

fn default_b() -> f32 {
    0.75
}

fn default_base_alpha() -> f32 {
    0.55
}

fn default_pool_size() -> usize {
    20
}

fn default_top_k() -> usize {
    5
}

fn default_max_top_k() -> usize {
    20
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    200
}

fn default_min_context_chars() -> usize {
    300
}

fn default_max_context_chars() -> usize {
    20_000
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lawqa")
}

fn default_store_path() -> PathBuf {
    data_dir().join("lawqa.db")
}

fn default_index_path() -> PathBuf {
    data_dir().join("lexical-index.json")
}

fn default_embedding_model() -> PathBuf {
    data_dir()
        .join("models")
        .join("gte-multilingual-base")
        .join("model.onnx")
}

fn default_embedding_tokenizer() -> PathBuf {
    data_dir()
        .join("models")
        .join("gte-multilingual-base")
        .join("tokenizer.json")
}

fn default_reranker_model() -> PathBuf {
    data_dir()
        .join("models")
        .join("bge-reranker-v2-m3")
        .join("model.onnx")
}

fn default_reranker_tokenizer() -> PathBuf {
    data_dir()
        .join("models")
        .join("bge-reranker-v2-m3")
        .join("tokenizer.json")
}

impl LawQaConfig {
    /// Load configuration from file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| LawQaError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("lawqa").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("lawqa.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        if !(0.0..=1.0).contains(&r.base_alpha) {
            return Err(LawQaError::config(format!(
                "retrieval.base_alpha must be within [0, 1], got {}",
                r.base_alpha
            )));
        }
        if r.pool_size == 0 || r.default_top_k == 0 {
            return Err(LawQaError::config(
                "retrieval.pool_size and retrieval.default_top_k must be at least 1",
            ));
        }
        if r.pool_size < r.default_top_k {
            return Err(LawQaError::config(format!(
                "retrieval.pool_size ({}) must not be smaller than retrieval.default_top_k ({})",
                r.pool_size, r.default_top_k
            )));
        }
        if r.max_top_k < r.default_top_k {
            return Err(LawQaError::config(
                "retrieval.max_top_k must not be smaller than retrieval.default_top_k",
            ));
        }
        if r.max_top_k > r.pool_size {
            return Err(LawQaError::config(format!(
                "retrieval.max_top_k ({}) must not exceed retrieval.pool_size ({})",
                r.max_top_k, r.pool_size
            )));
        }
        if self.lexical.k1 <= 0.0 || !(0.0..=1.0).contains(&self.lexical.b) {
            return Err(LawQaError::config(
                "lexical.k1 must be positive and lexical.b within [0, 1]",
            ));
        }
        if self.resilience.max_attempts == 0 || self.resilience.timeout_ms == 0 {
            return Err(LawQaError::config(
                "resilience.max_attempts and resilience.timeout_ms must be at least 1",
            ));
        }
        if self.embedding.dimension == 0 || self.embedding.batch_size == 0 {
            return Err(LawQaError::config(
                "embedding.dimension and embedding.batch_size must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LawQaConfig::default();
        assert!((config.retrieval.base_alpha - 0.55).abs() < f32::EPSILON);
        assert_eq!(config.retrieval.pool_size, 20);
        assert_eq!(config.retrieval.default_top_k, 5);
        assert_eq!(config.answer.min_context_chars, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: LawQaConfig = toml::from_str(
            r#"
            [retrieval]
            pool_size = 40

            [resilience]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.retrieval.pool_size, 40);
        assert_eq!(config.retrieval.default_top_k, 5);
        assert_eq!(config.resilience.max_attempts, 5);
        assert_eq!(config.embedding.batch_size, 64);
        assert_eq!(config.embedding.pooling, Pooling::Cls);
    }

    #[test]
    fn test_validate_rejects_bad_alpha() {
        let mut config = LawQaConfig::default();
        config.retrieval.base_alpha = 1.5;
        let err = config.validate().unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_validate_rejects_pool_smaller_than_k() {
        let mut config = LawQaConfig::default();
        config.retrieval.pool_size = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_max_k_beyond_pool() {
        let mut config = LawQaConfig::default();
        assert_eq!(config.retrieval.max_top_k, config.retrieval.pool_size);

        config.retrieval.max_top_k = 30;
        let err = config.validate().unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");

        config.retrieval.pool_size = 40;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lawqa.toml");
        std::fs::write(&path, "[lexical]\nk1 = 1.2\n").unwrap();

        let config = LawQaConfig::load(&path).unwrap();
        assert!((config.lexical.k1 - 1.2).abs() < f32::EPSILON);

        std::fs::write(&path, "[lexical]\nk1 = -1.0\n").unwrap();
        assert!(LawQaConfig::load(&path).is_err());
    }
}
