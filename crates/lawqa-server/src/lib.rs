//! lawqa-server - Composition root for legal question answering
//!
//! This crate wires the store, the model oracles and the retrieval service
//! together and exposes them as tool-style operations whose results are
//! safe to show to an end user.
//!
//! # Tools
//!
//! - `lawqa_retrieve` - Legal context and citations for a question
//! - `lawqa_ask` - Grounded answer from the configured generator
//! - `lawqa_ingest` - Index fragment files produced by the segmentation pipeline
//! - `lawqa_refresh` - Reload the corpus snapshot
//! - `lawqa_stats` - Store and snapshot statistics

mod indexer;
mod server;

pub use indexer::{IngestReport, Indexer};
pub use server::{
    Components, IngestParams, LawQaServer, QuestionParams, ServerInfo, ToolInfo, ToolResult,
    APOLOGY,
};
