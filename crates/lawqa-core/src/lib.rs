//! lawqa-core - Core types and traits for legal question answering
//!
//! This crate provides the fragment model, the error taxonomy, configuration
//! and the oracle traits shared by the retrieval pipeline.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{LawQaError, Result};
pub use traits::*;
pub use types::*;
