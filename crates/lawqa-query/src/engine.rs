//! Retrieval service: snapshot lifecycle and the per-query pipeline.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tracing::{debug, info, warn};

use lawqa_core::{
    Candidate, Classification, CrossEncoder, Embedder, Fragment, IntentClassifier, LawQaConfig,
    LawQaError, Result, RetrievedContext, VectorStore,
};
use lawqa_lexical::{load_or_build, Bm25Params, IndexOrigin, LexicalIndex, Segmenter};

use crate::dense::DenseRetriever;
use crate::format::format_context;
use crate::fusion::fuse;
use crate::rerank::Reranker;
use crate::retry::RetryPolicy;

/// Knobs of the retrieval pipeline.
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    /// Candidates taken from each path and kept after fusion.
    pub pool_size: usize,

    /// Largest `k` a caller may ask for; never above `pool_size`.
    pub max_top_k: usize,

    pub bm25: Bm25Params,
    pub segmenter: Segmenter,

    /// Persisted lexical index; `None` keeps the index in memory only.
    pub index_path: Option<PathBuf>,

    pub retry: RetryPolicy,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            pool_size: 20,
            max_top_k: 20,
            bm25: Bm25Params::default(),
            segmenter: Segmenter::new(),
            index_path: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl RetrievalSettings {
    pub fn from_config(config: &LawQaConfig) -> Result<Self> {
        let segmenter = match &config.lexical.lexicon_path {
            Some(path) => Segmenter::from_lexicon_file(path).map_err(|e| {
                LawQaError::config(format!("Cannot read lexicon {:?}: {}", path, e))
            })?,
            None => Segmenter::new(),
        };

        Ok(Self {
            pool_size: config.retrieval.pool_size,
            max_top_k: config.retrieval.max_top_k,
            bm25: Bm25Params {
                k1: config.lexical.k1,
                b: config.lexical.b,
            },
            segmenter,
            index_path: Some(config.lexical.index_path.clone()),
            retry: RetryPolicy::from(&config.resilience),
        })
    }
}

/// Corpus snapshot and the lexical index built from it.
struct Snapshot {
    fragments: Vec<Arc<Fragment>>,
    index: LexicalIndex,
}

/// Outcome of loading a snapshot.
#[derive(Debug, Clone)]
pub struct RefreshReport {
    pub fragments: usize,
    pub vocabulary: usize,
    pub origin: IndexOrigin,
}

/// Hybrid retrieval over an immutable corpus snapshot.
///
/// All collaborators are injected. A query clones the current snapshot
/// handle on entry and sees that snapshot throughout, even if `refresh()`
/// swaps in a new one meanwhile.
pub struct RetrievalService {
    snapshot: RwLock<Arc<Snapshot>>,
    refresh_lock: tokio::sync::Mutex<()>,
    store: Arc<dyn VectorStore>,
    dense: DenseRetriever,
    reranker: Reranker,
    classifier: Arc<dyn IntentClassifier>,
    settings: RetrievalSettings,
}

/// Failures after which the pipeline continues with less signal.
fn degradable(error: &LawQaError) -> bool {
    matches!(error, LawQaError::Unavailable { .. }) || error.is_transient()
}

impl RetrievalService {
    /// Load the corpus snapshot and its lexical index, then start serving.
    pub async fn start(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        encoder: Arc<dyn CrossEncoder>,
        classifier: Arc<dyn IntentClassifier>,
        settings: RetrievalSettings,
    ) -> Result<Self> {
        if settings.pool_size == 0 {
            return Err(LawQaError::config("pool_size must be positive"));
        }
        if settings.max_top_k > settings.pool_size {
            return Err(LawQaError::config(format!(
                "max_top_k ({}) must not exceed pool_size ({})",
                settings.max_top_k, settings.pool_size
            )));
        }

        let (snapshot, report) = Self::load_snapshot(store.as_ref(), &settings).await?;

        info!(
            "Retrieval service started: {} fragments, {} terms, index {:?}",
            report.fragments, report.vocabulary, report.origin
        );

        Ok(Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            refresh_lock: tokio::sync::Mutex::new(()),
            dense: DenseRetriever::new(Arc::clone(&store), embedder, settings.retry),
            reranker: Reranker::new(encoder, settings.retry),
            store,
            classifier,
            settings,
        })
    }

    async fn load_snapshot(
        store: &dyn VectorStore,
        settings: &RetrievalSettings,
    ) -> Result<(Snapshot, RefreshReport)> {
        let fragments = settings.retry.run("fetch_all", || store.fetch_all()).await?;

        let mut keys = HashSet::with_capacity(fragments.len());
        for fragment in &fragments {
            if !keys.insert(fragment.citation_key.as_str()) {
                warn!("Duplicate citation key in corpus: {}", fragment.citation_key);
            }
        }

        let fragments: Vec<Arc<Fragment>> = fragments.into_iter().map(Arc::new).collect();
        let corpus = fragments.clone();
        let segmenter = settings.segmenter.clone();
        let params = settings.bm25;
        let path = settings.index_path.clone();

        // Tokenizing the corpus is CPU-bound.
        let (index, origin) = tokio::task::spawn_blocking(move || match path {
            Some(path) => {
                let refs: Vec<&Fragment> = corpus.iter().map(Arc::as_ref).collect();
                load_or_build(&path, &refs, segmenter, params)
            }
            None => Ok((
                LexicalIndex::build(corpus.iter().map(Arc::as_ref), segmenter, params),
                IndexOrigin::Built,
            )),
        })
        .await
        .map_err(|e| LawQaError::internal(format!("Index task failed: {}", e)))??;

        let report = RefreshReport {
            fragments: fragments.len(),
            vocabulary: index.vocabulary_size(),
            origin,
        };

        Ok((Snapshot { fragments, index }, report))
    }

    fn current(&self) -> Result<Arc<Snapshot>> {
        self.snapshot
            .read()
            .map(|s| Arc::clone(&*s))
            .map_err(|e| LawQaError::internal(format!("Snapshot lock poisoned: {}", e)))
    }

    /// Reload the corpus from the store and swap in a fresh snapshot.
    ///
    /// Queries already running finish on the old snapshot.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let _guard = self.refresh_lock.lock().await;

        let (snapshot, report) = Self::load_snapshot(self.store.as_ref(), &self.settings).await?;

        {
            let mut current = self
                .snapshot
                .write()
                .map_err(|e| LawQaError::internal(format!("Snapshot lock poisoned: {}", e)))?;
            *current = Arc::new(snapshot);
        }

        info!(
            "Snapshot refreshed: {} fragments, index {:?}",
            report.fragments, report.origin
        );
        Ok(report)
    }

    /// Number of fragments in the current snapshot.
    pub fn snapshot_len(&self) -> usize {
        self.current().map(|s| s.fragments.len()).unwrap_or(0)
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    pub fn classify(&self, question: &str) -> Classification {
        self.classifier.classify(question)
    }

    fn check_request(&self, question: &str, k: usize) -> Result<()> {
        if question.trim().is_empty() {
            return Err(LawQaError::invalid_argument("Question must not be empty"));
        }
        if k == 0 {
            return Err(LawQaError::invalid_argument("k must be at least 1"));
        }
        if k > self.settings.max_top_k {
            return Err(LawQaError::invalid_argument(format!(
                "k must be at most {}",
                self.settings.max_top_k
            )));
        }
        Ok(())
    }

    fn lexical_candidates(snapshot: &Snapshot, question: &str, k: usize) -> Vec<Candidate> {
        snapshot
            .index
            .query(question, k)
            .into_iter()
            .filter_map(|(doc, score)| {
                snapshot
                    .fragments
                    .get(doc)
                    .map(|f| Candidate::new(Arc::clone(f), score))
            })
            .collect()
    }

    /// Ranked candidates for `question`, at most `k` of them.
    pub async fn search(&self, question: &str, k: usize) -> Result<Vec<Candidate>> {
        self.check_request(question, k)?;

        let started = Instant::now();
        let snapshot = self.current()?;
        let pool = self.settings.pool_size;

        let Classification { intent, alpha } = self.classifier.classify(question);
        debug!("Query intent {} -> alpha {:.2}", intent, alpha);

        let (dense, lexical) = tokio::join!(self.dense.query(question, pool), async {
            Self::lexical_candidates(&snapshot, question, pool)
        });

        let dense = match dense {
            Ok(dense) => dense,
            Err(e) if degradable(&e) => {
                warn!("Dense retrieval failed, continuing lexical-only: {}", e);
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        debug!(
            "Dense returned {} candidates, lexical returned {} candidates",
            dense.len(),
            lexical.len()
        );

        let fused = fuse(lexical, dense, alpha, pool);
        debug!("Fused to {} candidates", fused.len());

        let ranked = match self.reranker.rerank(question, fused.clone(), k).await {
            Ok(ranked) => ranked,
            Err(e) if degradable(&e) => {
                warn!("Rerank failed, keeping fusion order: {}", e);
                let mut fused = fused;
                fused.truncate(k);
                fused
            }
            Err(e) => return Err(e),
        };

        info!(
            "Retrieved {} fragments in {}ms",
            ranked.len(),
            started.elapsed().as_millis()
        );

        Ok(ranked)
    }

    /// Rendered context and citations for the top `k` fragments.
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<RetrievedContext> {
        let ranked = self.search(question, k).await?;
        Ok(format_context(&ranked))
    }

    /// Release the store, the oracles and the snapshot.
    pub fn shutdown(self) {
        info!("Retrieval service shut down ({} fragments)", self.snapshot_len());
    }
}
