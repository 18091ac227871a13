//! lawqa-query - Hybrid retrieval over legal fragments
//!
//! This crate turns a question into a ranked, formatted legal context:
//! a pattern classifier picks the dense/lexical blend, BM25 and vector
//! search run concurrently, their scores are fused by citation key, a
//! cross-encoder reorders the pool, and the survivors are rendered as
//! hierarchy-aware blocks with deduplicated citations.
//!
//! # Features
//!
//! - Intent-dependent alpha (legal reference / numeric / generic)
//! - Max-normalized lexical scores fused with cosine similarity
//! - Cross-encoder reranking with fallback to fusion order
//! - Per-call timeouts and bounded retries for model and store calls
//! - Snapshot-consistent queries with explicit `refresh()`
//! - Evidence threshold and prompt construction for answer generation
//!
//! # Example
//!
//! ```rust,ignore
//! use lawqa_query::{RetrievalService, RetrievalSettings};
//!
//! let service = RetrievalService::start(store, embedder, encoder, classifier, settings).await?;
//! let retrieved = service.retrieve("mức phạt khi vượt đèn đỏ", 5).await?;
//! println!("{}", retrieved.context);
//! ```

mod answer;
mod classifier;
mod dense;
mod engine;
mod format;
mod fusion;
mod rerank;
mod retry;

pub use answer::{
    build_prompt, truncate_context, Answer, AnswerComposer, AnswerPolicy, Evidence,
    INSUFFICIENT_INFORMATION, NOT_FOUND, SYSTEM_PROMPT, TRUNCATION_NOTE,
};
pub use classifier::PatternClassifier;
pub use dense::DenseRetriever;
pub use engine::{RefreshReport, RetrievalService, RetrievalSettings};
pub use format::{dedupe_citations, format_block, format_context};
pub use fusion::{fuse, normalize_scores};
pub use rerank::Reranker;
pub use retry::RetryPolicy;

// Re-export for convenience
pub use lawqa_core::{Candidate, Classification, QueryIntent, RetrievedContext};
