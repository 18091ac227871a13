//! lawqa-store - SQLite vector store
//!
//! This crate persists legal fragments together with their embeddings and
//! answers nearest-neighbour queries over them. The sqlite-vec extension is
//! used when it can be loaded; otherwise search falls back to an exact scan.

mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

// Re-export schema for testing/migrations
pub use schema::{vec_schema, SCHEMA, SCHEMA_VERSION};
