//! Database schema definitions.

/// Main schema SQL for initializing the database.
pub const SCHEMA: &str = r#"
-- Store-level settings (schema version, embedding dimension)
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- One row per fragment; id gives the stable insertion order
CREATE TABLE IF NOT EXISTS fragments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    citation_key TEXT NOT NULL UNIQUE,
    law TEXT NOT NULL,
    article_no TEXT NOT NULL,
    payload TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_fragments_law ON fragments(law);

-- Raw embeddings, little-endian f32, used by the exact-scan search
CREATE TABLE IF NOT EXISTS fragment_vectors (
    fragment_id INTEGER PRIMARY KEY REFERENCES fragments(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL
);
"#;

/// Schema for the sqlite-vec virtual table.
/// This must be created separately after loading the extension.
pub fn vec_schema(dimension: usize) -> String {
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS vec_fragments USING vec0(\n    \
         embedding float[{}] distance_metric=cosine\n);",
        dimension
    )
}

/// Schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;
