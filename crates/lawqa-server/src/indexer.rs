//! Loading segmented fragments into the vector store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use lawqa_core::{Embedder, Fragment, LawQaError, Result, VectorStore};
use lawqa_query::RetryPolicy;

/// Outcome of an ingest run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub files: usize,
    pub fragments: usize,
    /// Repeats or further windows of an earlier fragment, dropped before embedding.
    pub duplicates_skipped: usize,
    pub batches: usize,
    pub reset: bool,
}

/// Embeds fragments in batches and upserts them by citation key.
pub struct Indexer {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            embedder,
            batch_size: batch_size.max(1),
            retry,
        }
    }

    /// Parse one segmentation output file (a JSON array of fragments).
    pub fn read_fragments(path: &Path) -> Result<Vec<Fragment>> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LawQaError::invalid_argument(format!("Cannot read {}: {}", path.display(), e))
        })?;

        let mut fragments: Vec<Fragment> = serde_json::from_str(&content).map_err(|e| {
            LawQaError::invalid_argument(format!(
                "{} is not a JSON array of fragments: {}",
                path.display(),
                e
            ))
        })?;

        let source = path.display().to_string();
        for fragment in &mut fragments {
            if fragment.source_file.is_none() {
                fragment.source_file = Some(source.clone());
            }
        }

        debug!("Read {} fragments from {}", fragments.len(), source);
        Ok(fragments)
    }

    /// Read every file, then ingest their fragments as one corpus.
    pub async fn ingest_files(&self, paths: &[PathBuf], reset: bool) -> Result<IngestReport> {
        if paths.is_empty() {
            return Err(LawQaError::invalid_argument("No input files given"));
        }

        let mut fragments = Vec::new();
        for path in paths {
            fragments.extend(Self::read_fragments(path)?);
        }

        let mut report = self.ingest(fragments, reset).await?;
        report.files = paths.len();
        Ok(report)
    }

    /// Validate, embed and upsert `fragments`, clearing the store first when `reset` is set.
    pub async fn ingest(&self, fragments: Vec<Fragment>, reset: bool) -> Result<IngestReport> {
        let started = Instant::now();
        let (fragments, duplicates_skipped) = prepare(fragments)?;

        if reset {
            self.retry.run("reset", || self.store.reset()).await?;
            info!("Vector store cleared before ingest");
        }

        let mut batches = 0;
        for batch in fragments.chunks(self.batch_size) {
            let texts: Vec<&str> = batch.iter().map(|f| f.enriched_text.as_str()).collect();

            let vectors = self
                .retry
                .run("embed_documents", || self.embedder.embed_documents(&texts))
                .await?;

            if vectors.len() != batch.len() {
                return Err(LawQaError::embedding(format!(
                    "Embedder returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }

            let items: Vec<(Fragment, Vec<f32>)> =
                batch.iter().cloned().zip(vectors).collect();
            self.retry
                .run("upsert_batch", || self.store.upsert_batch(&items))
                .await?;

            batches += 1;
            debug!("Upserted batch {} ({} fragments)", batches, items.len());
        }

        info!(
            "Ingested {} fragments in {} batches ({}ms)",
            fragments.len(),
            batches,
            started.elapsed().as_millis()
        );

        Ok(IngestReport {
            files: 0,
            fragments: fragments.len(),
            duplicates_skipped,
            batches,
            reset,
        })
    }
}

/// Reject unusable fragments and drop repeats.
///
/// Long leaves arrive split into windows that share every field but
/// `enriched_text`; the first window stands for the leaf. A citation key
/// seen twice with any other difference is an error: the key is the join
/// key between retrieval paths and must name one fragment.
fn prepare(fragments: Vec<Fragment>) -> Result<(Vec<Fragment>, usize)> {
    let mut seen: HashMap<String, usize> = HashMap::with_capacity(fragments.len());
    let mut out: Vec<Fragment> = Vec::with_capacity(fragments.len());
    let mut skipped = 0;

    for mut fragment in fragments {
        let key = fragment.citation_key.trim().to_string();
        if key.is_empty() {
            return Err(LawQaError::invalid_argument(format!(
                "Fragment without citation key (article {})",
                fragment.article_no
            )));
        }
        if fragment.enriched_text.trim().is_empty() {
            fragment.enriched_text = fragment.body_text.clone();
        }

        match seen.get(&key) {
            Some(&at) if same_leaf(&out[at], &fragment) => {
                skipped += 1;
            }
            Some(_) => {
                return Err(LawQaError::DuplicateCitation {
                    key: fragment.citation_key,
                });
            }
            None => {
                seen.insert(key, out.len());
                out.push(fragment);
            }
        }
    }

    if skipped > 0 {
        warn!("Skipped {} repeated or windowed fragments", skipped);
    }
    Ok((out, skipped))
}

/// Same leaf, ignoring the per-window enriched text.
fn same_leaf(kept: &Fragment, other: &Fragment) -> bool {
    let aligned = Fragment {
        enriched_text: kept.enriched_text.clone(),
        ..other.clone()
    };
    aligned == *kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use lawqa_embed::MockEmbedder;
    use lawqa_store::SqliteStore;
    use std::time::Duration;

    const DIM: usize = 64;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(5),
            max_attempts: 3,
            backoff: Duration::ZERO,
        }
    }

    fn indexer(store: Arc<SqliteStore>, embedder: MockEmbedder, batch: usize) -> Indexer {
        Indexer::new(store, Arc::new(embedder), batch, policy())
    }

    fn fragment(key: &str, body: &str) -> Fragment {
        Fragment::new(key, "Luật Trật tự, an toàn giao thông đường bộ", "10", body)
    }

    #[tokio::test]
    async fn test_ingest_in_batches() {
        let store = Arc::new(SqliteStore::open_memory(DIM).unwrap());
        let indexer = indexer(store.clone(), MockEmbedder::with_dimension(DIM), 2);

        let fragments = (1..=5)
            .map(|i| fragment(&format!("khoản {} Điều 10", i), &format!("nội dung {}", i)))
            .collect();
        let report = indexer.ingest(fragments, false).await.unwrap();

        assert_eq!(report.fragments, 5);
        assert_eq!(report.batches, 3);
        assert_eq!(store.fetch_all().await.unwrap().len(), 5);
        assert_eq!(store.stats().await.unwrap().vectors, 5);
    }

    #[tokio::test]
    async fn test_conflicting_duplicate_rejected() {
        let store = Arc::new(SqliteStore::open_memory(DIM).unwrap());
        let indexer = indexer(store.clone(), MockEmbedder::with_dimension(DIM), 64);

        let fragments = vec![fragment("khoản 1 Điều 10", "a"), fragment("khoản 1 Điều 10", "b")];
        let err = indexer.ingest(fragments, false).await.unwrap_err();

        assert_eq!(err.error_code(), "DUPLICATE_CITATION");
        assert!(store.fetch_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_identical_duplicate_skipped() {
        let store = Arc::new(SqliteStore::open_memory(DIM).unwrap());
        let indexer = indexer(store.clone(), MockEmbedder::with_dimension(DIM), 64);

        let fragments = vec![fragment("khoản 1 Điều 10", "a"), fragment("khoản 1 Điều 10", "a")];
        let report = indexer.ingest(fragments, false).await.unwrap();

        assert_eq!(report.fragments, 1);
        assert_eq!(report.duplicates_skipped, 1);
    }

    #[tokio::test]
    async fn test_windows_of_one_leaf_keep_first() {
        let store = Arc::new(SqliteStore::open_memory(DIM).unwrap());
        let indexer = indexer(store.clone(), MockEmbedder::with_dimension(DIM), 64);

        let body = "Người điều khiển xe phải giảm tốc độ khi đi qua khu đông dân cư.";
        let mut first = fragment("khoản 3 Điều 10", body);
        first.enriched_text = "[ARTICLE] Điều 10 Người điều khiển xe phải giảm tốc độ".to_string();
        let mut second = fragment("khoản 3 Điều 10", body);
        second.enriched_text = "[ARTICLE] Điều 10 khi đi qua khu đông dân cư.".to_string();

        let report = indexer.ingest(vec![first.clone(), second], false).await.unwrap();
        assert_eq!(report.fragments, 1);
        assert_eq!(report.duplicates_skipped, 1);

        let stored = store.fetch_all().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].enriched_text, first.enriched_text);
    }

    #[tokio::test]
    async fn test_windows_with_different_metadata_rejected() {
        let store = Arc::new(SqliteStore::open_memory(DIM).unwrap());
        let indexer = indexer(store, MockEmbedder::with_dimension(DIM), 64);

        let first = fragment("khoản 3 Điều 10", "giảm tốc độ");
        let mut second = fragment("khoản 3 Điều 10", "giảm tốc độ");
        second.enriched_text = "cửa sổ thứ hai".to_string();
        second.clause_no = Some("4".to_string());

        let err = indexer.ingest(vec![first, second], false).await.unwrap_err();
        assert_eq!(err.error_code(), "DUPLICATE_CITATION");
    }

    #[tokio::test]
    async fn test_missing_key_rejected() {
        let store = Arc::new(SqliteStore::open_memory(DIM).unwrap());
        let indexer = indexer(store, MockEmbedder::with_dimension(DIM), 64);

        let err = indexer.ingest(vec![fragment("  ", "a")], false).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_reset_replaces_corpus() {
        let store = Arc::new(SqliteStore::open_memory(DIM).unwrap());
        let indexer = indexer(store.clone(), MockEmbedder::with_dimension(DIM), 64);

        indexer
            .ingest(vec![fragment("A", "a"), fragment("B", "b")], false)
            .await
            .unwrap();
        indexer.ingest(vec![fragment("C", "c")], true).await.unwrap();

        let keys: Vec<String> = store
            .fetch_all()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.citation_key)
            .collect();
        assert_eq!(keys, vec!["C"]);
    }

    #[tokio::test]
    async fn test_transient_embedder_failure_retried() {
        let store = Arc::new(SqliteStore::open_memory(DIM).unwrap());
        let indexer = indexer(
            store.clone(),
            MockEmbedder::with_dimension(DIM).failing_first(2),
            64,
        );

        let report = indexer.ingest(vec![fragment("A", "a")], false).await.unwrap();
        assert_eq!(report.fragments, 1);
    }

    #[tokio::test]
    async fn test_read_fragments_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("luat.json");
        std::fs::write(
            &path,
            r#"[{
                "display_citation": "khoản 1 Điều 2 Luật số 36/2024/QH15",
                "law": "Luật số 36/2024/QH15",
                "article_no": "2",
                "clause_no": 1,
                "text": "Đường bộ gồm đường, cầu đường bộ.",
                "enriched_text": ""
            }]"#,
        )
        .unwrap();

        let fragments = Indexer::read_fragments(&path).unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].clause_no.as_deref(), Some("1"));
        assert_eq!(
            fragments[0].source_file.as_deref(),
            Some(path.display().to_string().as_str())
        );

        let (prepared, _) = prepare(fragments).unwrap();
        assert_eq!(prepared[0].enriched_text, prepared[0].body_text);
    }

    #[tokio::test]
    async fn test_read_windowed_leaf_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nd168.json");
        let window = |i: usize, enriched: &str| {
            serde_json::json!({
                "id": format!("ND168-D6-K2_w{}", i),
                "granularity": "leaf_window",
                "law": "Nghị định số 168/2024/NĐ-CP",
                "article_no": "6",
                "clause_no": "2",
                "display_citation": "khoản 2 Điều 6 Nghị định số 168/2024/NĐ-CP",
                "path": "Chương II > Điều 6 > Khoản 2",
                "path_text": "Chương II > Điều 6 > Khoản 2",
                "text": "Phạt tiền đối với người điều khiển xe vi phạm quy tắc giao thông.",
                "enriched_text": enriched
            })
        };
        let records = serde_json::Value::Array(vec![
            window(1, "[ARTICLE] Điều 6 Phạt tiền đối với"),
            window(2, "[ARTICLE] Điều 6 vi phạm quy tắc giao thông"),
        ]);
        std::fs::write(&path, records.to_string()).unwrap();

        let fragments = Indexer::read_fragments(&path).unwrap();
        assert_eq!(fragments.len(), 2);

        let (prepared, skipped) = prepare(fragments).unwrap();
        assert_eq!(prepared.len(), 1);
        assert_eq!(skipped, 1);
        assert_eq!(prepared[0].enriched_text, "[ARTICLE] Điều 6 Phạt tiền đối với");
    }

    #[tokio::test]
    async fn test_unreadable_file_is_invalid_argument() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not an array").unwrap();

        let err = Indexer::read_fragments(&path).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");

        let err = Indexer::read_fragments(&dir.path().join("missing.json")).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }
}
