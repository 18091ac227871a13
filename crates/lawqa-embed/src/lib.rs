//! lawqa-embed - ONNX model wrappers
//!
//! This crate provides the two scoring oracles of the retrieval pipeline:
//! a bi-encoder producing normalized embeddings for dense search, and a
//! cross-encoder scoring (query, passage) pairs for reranking.
//!
//! # Features
//!
//! - ONNX Runtime inference off the async executor (`spawn_blocking`)
//! - CLS or attention-masked mean pooling
//! - L2 normalization
//! - Deterministic mock models for tests

mod mock;
mod onnx;
mod rerank;

pub use mock::{MockCrossEncoder, MockEmbedder};
pub use onnx::OnnxEmbedder;
pub use rerank::OnnxCrossEncoder;

// Re-export the oracle traits for convenience
pub use lawqa_core::{CrossEncoder, Embedder};
