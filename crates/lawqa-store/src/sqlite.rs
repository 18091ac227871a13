//! SQLite-based vector store implementation.

use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info, warn};

use lawqa_core::{Fragment, LawQaError, Neighbor, Result, StoreStats, VectorStore};

use crate::schema::{vec_schema, SCHEMA, SCHEMA_VERSION};

const DEFAULT_BUSY_TIMEOUT_MS: u32 = 30_000;

/// SQLite-based store implementation.
///
/// Fragments are stored as JSON payloads keyed by citation key; embeddings
/// live in a side table and, when sqlite-vec is available, in a `vec0`
/// virtual table sharing the fragment row id.
pub struct SqliteStore {
    conn: Mutex<Connection>,

    /// Embedding dimension this store was created with.
    dimension: usize,

    /// Whether sqlite-vec extension is loaded.
    vec_enabled: bool,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>, dimension: usize, busy_timeout_ms: u32) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| LawQaError::database(format!("Failed to open database: {}", e)))?;

        Self::init(conn, dimension, busy_timeout_ms, path)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory(dimension: usize) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            LawQaError::database(format!("Failed to open in-memory database: {}", e))
        })?;

        Self::init(conn, dimension, DEFAULT_BUSY_TIMEOUT_MS, Path::new(":memory:"))
    }

    fn init(conn: Connection, dimension: usize, busy_timeout_ms: u32, path: &Path) -> Result<Self> {
        if dimension == 0 {
            return Err(LawQaError::config("Embedding dimension must be positive"));
        }

        Self::configure_connection(&conn, busy_timeout_ms)?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| LawQaError::database(format!("Failed to initialize schema: {}", e)))?;

        Self::check_dimension(&conn, dimension)?;

        let vec_enabled = Self::try_load_vec_extension(&conn);

        if vec_enabled {
            conn.execute_batch(&vec_schema(dimension))
                .map_err(|e| LawQaError::database(format!("Failed to create vec table: {}", e)))?;
            info!("sqlite-vec extension loaded successfully");
        } else {
            warn!("sqlite-vec extension not available - using exact vector scan");
        }

        info!("Vector store opened at {:?} (dim={})", path, dimension);

        Ok(Self {
            conn: Mutex::new(conn),
            dimension,
            vec_enabled,
        })
    }

    fn configure_connection(conn: &Connection, busy_timeout_ms: u32) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )
        .map_err(|e| LawQaError::database(format!("Failed to configure connection: {}", e)))?;

        conn.busy_timeout(Duration::from_millis(busy_timeout_ms as u64))
            .map_err(|e| LawQaError::database(format!("Failed to set busy timeout: {}", e)))?;

        Ok(())
    }

    /// Record the dimension on first open; refuse a mismatching one afterwards.
    fn check_dimension(conn: &Connection, dimension: usize) -> Result<()> {
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'dimension'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| LawQaError::database(e.to_string()))?;

        match stored {
            Some(value) if value != dimension.to_string() => Err(LawQaError::config(format!(
                "Store was created for {}-dimensional embeddings, configured for {}",
                value, dimension
            ))),
            Some(_) => Ok(()),
            None => {
                conn.execute(
                    "INSERT INTO store_meta (key, value) VALUES ('dimension', ?1), ('schema_version', ?2)",
                    params![dimension.to_string(), SCHEMA_VERSION.to_string()],
                )
                .map_err(|e| LawQaError::database(e.to_string()))?;
                Ok(())
            }
        }
    }

    /// Try to load the sqlite-vec extension.
    fn try_load_vec_extension(conn: &Connection) -> bool {
        let paths = [
            "vec0",
            "libsqlite_vec",
            "/usr/local/lib/libsqlite_vec",
            "/opt/homebrew/lib/libsqlite_vec",
        ];

        unsafe {
            if conn.load_extension_enable().is_err() {
                return false;
            }

            for path in paths {
                if conn.load_extension(path, None).is_ok() {
                    let _ = conn.load_extension_disable();
                    return true;
                }
            }

            let _ = conn.load_extension_disable();
        }

        false
    }

    /// Check if the sqlite-vec index is in use.
    pub fn vec_enabled(&self) -> bool {
        self.vec_enabled
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Execute a blocking operation on the connection.
    fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| LawQaError::database(e.to_string()))?;
        f(&conn)
    }

    fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(LawQaError::invalid_argument(format!(
                "Vector has {} dimensions, store expects {}",
                vector.len(),
                self.dimension
            )));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(LawQaError::invalid_argument(
                "Vector has non-finite components",
            ));
        }
        Ok(())
    }

    fn vec_search(conn: &Connection, vector: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        let mut stmt = conn
            .prepare(
                r#"
                SELECT f.payload, v.distance
                FROM vec_fragments v
                JOIN fragments f ON f.id = v.rowid
                WHERE v.embedding MATCH ?1
                ORDER BY v.distance
                LIMIT ?2
                "#,
            )
            .map_err(|e| LawQaError::database(e.to_string()))?;

        let rows = stmt
            .query_map(params![vec_to_bytes(vector), k as i64], |row| {
                let payload: String = row.get(0)?;
                let distance: f64 = row.get(1)?;
                Ok((payload, distance as f32))
            })
            .map_err(|e| LawQaError::database(e.to_string()))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| LawQaError::database(e.to_string()))
    }

    fn exact_search(conn: &Connection, vector: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        let mut stmt = conn
            .prepare(
                r#"
                SELECT f.payload, v.embedding
                FROM fragment_vectors v
                JOIN fragments f ON f.id = v.fragment_id
                ORDER BY f.id
                "#,
            )
            .map_err(|e| LawQaError::database(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                let payload: String = row.get(0)?;
                let embedding: Vec<u8> = row.get(1)?;
                Ok((payload, embedding))
            })
            .map_err(|e| LawQaError::database(e.to_string()))?;

        let mut scored = Vec::new();
        for row in rows {
            let (payload, embedding) = row.map_err(|e| LawQaError::database(e.to_string()))?;
            let distance = cosine_distance(vector, &bytes_to_vec(&embedding));
            scored.push((payload, distance));
        }

        // Stable: equal distances keep insertion order.
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);
        Ok(scored)
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn nearest_neighbors(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.check_vector(vector)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let vec_enabled = self.vec_enabled;
        let hits = self.with_conn(|conn| {
            if vec_enabled {
                Self::vec_search(conn, vector, k)
            } else {
                Self::exact_search(conn, vector, k)
            }
        })?;

        debug!("Vector search returned {} neighbours", hits.len());

        hits.into_iter()
            .map(|(payload, distance)| {
                Ok(Neighbor {
                    fragment: decode_fragment(&payload)?,
                    distance: Some(distance),
                })
            })
            .collect()
    }

    async fn upsert_batch(&self, items: &[(Fragment, Vec<f32>)]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        for (fragment, vector) in items {
            if fragment.citation_key.trim().is_empty() {
                return Err(LawQaError::invalid_argument("Fragment has an empty citation key"));
            }
            self.check_vector(vector)?;
        }

        let rows = items
            .iter()
            .map(|(fragment, vector)| Ok((fragment, serde_json::to_string(fragment)?, vector)))
            .collect::<Result<Vec<_>>>()?;
        let vec_enabled = self.vec_enabled;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| LawQaError::database(e.to_string()))?;

            {
                // ON CONFLICT keeps the original row id, so order stays stable.
                let mut upsert = tx
                    .prepare(
                        r#"
                        INSERT INTO fragments (citation_key, law, article_no, payload, updated_at)
                        VALUES (?1, ?2, ?3, ?4, ?5)
                        ON CONFLICT(citation_key) DO UPDATE SET
                            law = excluded.law,
                            article_no = excluded.article_no,
                            payload = excluded.payload,
                            updated_at = excluded.updated_at
                        RETURNING id
                        "#,
                    )
                    .map_err(|e| LawQaError::database(e.to_string()))?;

                let mut put_vector = tx
                    .prepare(
                        "INSERT OR REPLACE INTO fragment_vectors (fragment_id, embedding) VALUES (?1, ?2)",
                    )
                    .map_err(|e| LawQaError::database(e.to_string()))?;

                for (fragment, payload, vector) in &rows {
                    let id: i64 = upsert
                        .query_row(
                            params![
                                fragment.citation_key,
                                fragment.law,
                                fragment.article_no,
                                payload,
                                now,
                            ],
                            |row| row.get(0),
                        )
                        .map_err(|e| {
                            LawQaError::database(format!("Failed to upsert fragment: {}", e))
                        })?;

                    let bytes = vec_to_bytes(vector);
                    put_vector
                        .execute(params![id, bytes])
                        .map_err(|e| LawQaError::database(format!("Failed to store vector: {}", e)))?;

                    if vec_enabled {
                        tx.execute("DELETE FROM vec_fragments WHERE rowid = ?1", params![id])
                            .map_err(|e| LawQaError::database(e.to_string()))?;
                        tx.execute(
                            "INSERT INTO vec_fragments (rowid, embedding) VALUES (?1, ?2)",
                            params![id, bytes],
                        )
                        .map_err(|e| LawQaError::database(format!("Failed to index vector: {}", e)))?;
                    }
                }
            }

            tx.commit()
                .map_err(|e| LawQaError::database(e.to_string()))?;

            debug!("Upserted {} fragments", rows.len());
            Ok(())
        })
    }

    async fn fetch_all(&self) -> Result<Vec<Fragment>> {
        let payloads = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT payload FROM fragments ORDER BY id")
                .map_err(|e| LawQaError::database(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| LawQaError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| LawQaError::database(e.to_string()))?;

            Ok(rows)
        })?;

        payloads.iter().map(|p| decode_fragment(p)).collect()
    }

    async fn reset(&self) -> Result<()> {
        let vec_enabled = self.vec_enabled;
        self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| LawQaError::database(e.to_string()))?;

            if vec_enabled {
                tx.execute("DELETE FROM vec_fragments", [])
                    .map_err(|e| LawQaError::database(e.to_string()))?;
            }
            tx.execute("DELETE FROM fragment_vectors", [])
                .map_err(|e| LawQaError::database(e.to_string()))?;
            let removed = tx
                .execute("DELETE FROM fragments", [])
                .map_err(|e| LawQaError::database(e.to_string()))?;

            tx.commit()
                .map_err(|e| LawQaError::database(e.to_string()))?;

            info!("Reset vector store ({} fragments removed)", removed);
            Ok(())
        })
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.with_conn(|conn| {
            let fragments: u64 = conn
                .query_row("SELECT COUNT(*) FROM fragments", [], |row| row.get(0))
                .map_err(|e| LawQaError::database(e.to_string()))?;

            let vectors: u64 = conn
                .query_row("SELECT COUNT(*) FROM fragment_vectors", [], |row| row.get(0))
                .map_err(|e| LawQaError::database(e.to_string()))?;

            // Get page count and page size to estimate storage
            let page_count: u64 = conn
                .query_row("PRAGMA page_count", [], |row| row.get(0))
                .unwrap_or(0);
            let page_size: u64 = conn
                .query_row("PRAGMA page_size", [], |row| row.get(0))
                .unwrap_or(4096);

            Ok(StoreStats {
                fragments,
                vectors,
                storage_bytes: page_count * page_size,
            })
        })
    }
}

fn decode_fragment(payload: &str) -> Result<Fragment> {
    serde_json::from_str(payload)
        .map_err(|e| LawQaError::database(format!("Corrupt fragment payload: {}", e)))
}

/// Convert f32 vector to bytes (little-endian).
fn vec_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// `1 - cos(a, b)`; a zero vector is maximally distant from everything.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot / (na * nb)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(key: &str, body: &str) -> Fragment {
        Fragment::new(key, "Luật số 36/2024/QH15", "15", body)
    }

    #[tokio::test]
    async fn test_open_memory() {
        let store = SqliteStore::open_memory(3).unwrap();
        assert!(store.fetch_all().await.unwrap().is_empty());
        assert_eq!(store.dimension(), 3);
    }

    #[tokio::test]
    async fn test_upsert_and_fetch_in_insertion_order() {
        let store = SqliteStore::open_memory(2).unwrap();
        store
            .upsert_batch(&[
                (fragment("b", "hai"), vec![1.0, 0.0]),
                (fragment("a", "một"), vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        // Replacing "b" keeps its position.
        store
            .upsert_batch(&[(fragment("b", "hai sửa đổi"), vec![0.5, 0.5])])
            .await
            .unwrap();

        let all = store.fetch_all().await.unwrap();
        let keys: Vec<_> = all.iter().map(|f| f.citation_key.as_str()).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(all[0].body_text, "hai sửa đổi");

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.fragments, 2);
        assert_eq!(stats.vectors, 2);
        assert!(stats.storage_bytes > 0);
    }

    #[tokio::test]
    async fn test_nearest_neighbors_ordering() {
        let store = SqliteStore::open_memory(2).unwrap();
        store
            .upsert_batch(&[
                (fragment("x", "trục x"), vec![1.0, 0.0]),
                (fragment("y", "trục y"), vec![0.0, 1.0]),
                (fragment("xy", "chéo"), vec![0.7, 0.7]),
            ])
            .await
            .unwrap();

        let hits = store.nearest_neighbors(&[0.9, 0.1], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].fragment.citation_key, "x");
        assert_eq!(hits[1].fragment.citation_key, "xy");
        assert!(hits[0].similarity() > hits[1].similarity());

        assert!(store.nearest_neighbors(&[1.0, 0.0], 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_finite_vectors_rejected() {
        let store = SqliteStore::open_memory(2).unwrap();
        let err = store
            .upsert_batch(&[(fragment("a", "x"), vec![f32::NAN, 0.0])])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
        assert!(store.fetch_all().await.unwrap().is_empty());

        store
            .upsert_batch(&[(fragment("a", "x"), vec![1.0, 0.0])])
            .await
            .unwrap();
        let err = store
            .nearest_neighbors(&[f32::INFINITY, 0.0], 1)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_equal_distances_keep_insertion_order() {
        let store = SqliteStore::open_memory(2).unwrap();
        store
            .upsert_batch(&[
                (fragment("second", "b"), vec![0.0, 1.0]),
                (fragment("first", "a"), vec![0.0, 2.0]),
                (fragment("other", "c"), vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        if store.vec_enabled() {
            return;
        }
        let hits = store.nearest_neighbors(&[0.0, 1.0], 3).await.unwrap();
        let keys: Vec<_> = hits.iter().map(|h| h.fragment.citation_key.as_str()).collect();
        assert_eq!(keys, vec!["second", "first", "other"]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = SqliteStore::open_memory(2).unwrap();
        let err = store
            .upsert_batch(&[(fragment("a", "x"), vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");

        let err = store.nearest_neighbors(&[1.0], 3).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_reset() {
        let store = SqliteStore::open_memory(2).unwrap();
        store
            .upsert_batch(&[(fragment("a", "x"), vec![1.0, 0.0])])
            .await
            .unwrap();
        store.reset().await.unwrap();

        assert!(store.fetch_all().await.unwrap().is_empty());
        assert!(store.nearest_neighbors(&[1.0, 0.0], 5).await.unwrap().is_empty());
        assert_eq!(store.stats().await.unwrap().vectors, 0);
    }

    #[tokio::test]
    async fn test_reopen_with_other_dimension_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store").join("lawqa.db");

        {
            let store = SqliteStore::open(&path, 4, 1000).unwrap();
            store
                .upsert_batch(&[(fragment("a", "x"), vec![1.0, 0.0, 0.0, 0.0])])
                .await
                .unwrap();
        }

        let reopened = SqliteStore::open(&path, 4, 1000).unwrap();
        assert_eq!(reopened.fetch_all().await.unwrap().len(), 1);
        drop(reopened);

        match SqliteStore::open(&path, 8, 1000) {
            Err(e) => assert_eq!(e.error_code(), "CONFIG_ERROR"),
            Ok(_) => panic!("dimension change must be refused"),
        }
    }

    #[test]
    fn test_cosine_distance() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(bytes_to_vec(&vec_to_bytes(&[0.25, -1.5])), vec![0.25, -1.5]);
    }
}
