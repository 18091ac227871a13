//! Tool-style operations over the retrieval service.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use lawqa_core::{
    CrossEncoder, Embedder, Fragment, Generator, IntentClassifier, LawQaConfig, LawQaError,
    Result, VectorStore,
};
use lawqa_embed::{MockCrossEncoder, MockEmbedder, OnnxCrossEncoder, OnnxEmbedder};
use lawqa_query::{
    AnswerComposer, AnswerPolicy, Evidence, PatternClassifier, RetrievalService,
    RetrievalSettings, RetryPolicy, INSUFFICIENT_INFORMATION,
};
use lawqa_store::SqliteStore;

use crate::indexer::{IngestReport, Indexer};

/// Shown instead of any internal failure.
pub const APOLOGY: &str = "Xin lỗi, đã xảy ra lỗi khi xử lý yêu cầu. Vui lòng thử lại sau.";

/// Oracles and storage the server is assembled from.
pub struct Components {
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub encoder: Arc<dyn CrossEncoder>,
    pub classifier: Arc<dyn IntentClassifier>,
    pub generator: Option<Arc<dyn Generator>>,
}

/// Legal QA server state.
pub struct LawQaServer {
    config: LawQaConfig,
    store: Arc<dyn VectorStore>,
    service: Arc<RetrievalService>,
    indexer: Indexer,
    composer: Option<AnswerComposer>,
    policy: AnswerPolicy,
}

/// Question request parameters.
#[derive(Debug, Deserialize, Serialize)]
pub struct QuestionParams {
    pub question: String,

    /// Number of fragments to use (default: `retrieval.default_top_k`).
    #[serde(default)]
    pub k: Option<usize>,
}

/// Ingest request parameters.
#[derive(Debug, Deserialize, Serialize)]
pub struct IngestParams {
    /// JSON fragment files from the segmentation pipeline.
    pub paths: Vec<PathBuf>,

    /// Clear the store before ingesting.
    #[serde(default)]
    pub reset: bool,
}

/// Tool result.
#[derive(Debug, Serialize)]
pub struct ToolResult {
    /// Whether the operation was successful.
    pub success: bool,

    /// Result message or content.
    pub message: String,
}

impl ToolResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Turn an error into something safe to show a user.
fn failure(operation: &str, e: LawQaError) -> ToolResult {
    match e {
        LawQaError::InvalidArgument { message } => {
            ToolResult::error(format!("Yêu cầu không hợp lệ: {}", message))
        }
        LawQaError::DuplicateCitation { key } => ToolResult::error(format!(
            "Trích dẫn \"{}\" xuất hiện nhiều lần với nội dung khác nhau.",
            key
        )),
        e => {
            error!("{} failed [{}]: {}", operation, e.error_code(), e);
            ToolResult::error(APOLOGY)
        }
    }
}

fn format_ingest(report: &IngestReport, snapshot: usize) -> String {
    let mut output = format!(
        "Đã lập chỉ mục {} đoạn luật ({} lô)",
        report.fragments, report.batches
    );
    if report.files > 0 {
        output.push_str(&format!(" từ {} tệp", report.files));
    }
    output.push_str(".\n");
    if report.duplicates_skipped > 0 {
        output.push_str(&format!(
            "Bỏ qua {} đoạn trùng lặp.\n",
            report.duplicates_skipped
        ));
    }
    output.push_str(&format!("Kho hiện có {} đoạn luật.", snapshot));
    output
}

impl LawQaServer {
    /// Build the server from configuration: SQLite store and ONNX models.
    pub async fn open(config: LawQaConfig) -> Result<Self> {
        config.validate()?;
        info!("Opening lawqa store at {:?}", config.store.path);

        let store = Arc::new(SqliteStore::open(
            &config.store.path,
            config.embedding.dimension,
            config.store.busy_timeout_ms,
        )?);
        let embedder = Arc::new(OnnxEmbedder::new(&config.embedding)?);
        let encoder = Arc::new(OnnxCrossEncoder::new(&config.reranker)?);
        let classifier = Arc::new(PatternClassifier::new(config.retrieval.base_alpha));
        let settings = RetrievalSettings::from_config(&config)?;

        let components = Components {
            store,
            embedder,
            encoder,
            classifier,
            generator: None,
        };
        Self::with_components(config, components, settings).await
    }

    /// Build the server from already constructed components.
    pub async fn with_components(
        config: LawQaConfig,
        components: Components,
        settings: RetrievalSettings,
    ) -> Result<Self> {
        let Components {
            store,
            embedder,
            encoder,
            classifier,
            generator,
        } = components;

        let retry = settings.retry;
        let indexer = Indexer::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            config.embedding.batch_size,
            retry,
        );

        let service = Arc::new(
            RetrievalService::start(Arc::clone(&store), embedder, encoder, classifier, settings)
                .await?,
        );

        let policy = AnswerPolicy::from(&config.answer);
        let composer = generator
            .map(|g| AnswerComposer::new(Arc::clone(&service), g, policy, retry));

        Ok(Self {
            config,
            store,
            service,
            indexer,
            composer,
            policy,
        })
    }

    /// In-memory store with deterministic mock models (for testing).
    pub async fn new_memory() -> Result<Self> {
        info!("Initializing lawqa server with in-memory database");

        let config = LawQaConfig::default();
        let dimension = config.embedding.dimension;
        let components = Components {
            store: Arc::new(SqliteStore::open_memory(dimension)?),
            embedder: Arc::new(MockEmbedder::with_dimension(dimension)),
            encoder: Arc::new(MockCrossEncoder::new()),
            classifier: Arc::new(PatternClassifier::new(config.retrieval.base_alpha)),
            generator: None,
        };
        let settings = RetrievalSettings {
            pool_size: config.retrieval.pool_size,
            max_top_k: config.retrieval.max_top_k,
            retry: RetryPolicy::from(&config.resilience),
            ..Default::default()
        };

        Self::with_components(config, components, settings).await
    }

    /// Attach an answer generator.
    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.composer = Some(AnswerComposer::new(
            Arc::clone(&self.service),
            generator,
            self.policy,
            self.service.settings().retry,
        ));
        self
    }

    pub fn config(&self) -> &LawQaConfig {
        &self.config
    }

    pub fn service(&self) -> &RetrievalService {
        &self.service
    }

    /// Get the server info.
    pub fn info() -> ServerInfo {
        ServerInfo {
            name: "lawqa".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Hybrid retrieval over Vietnamese road traffic law".to_string(),
        }
    }

    /// List available tools.
    pub fn tools() -> Vec<ToolInfo> {
        vec![
            ToolInfo {
                name: "lawqa_retrieve".to_string(),
                description: "Retrieve legal context and citations for a question".to_string(),
            },
            ToolInfo {
                name: "lawqa_ask".to_string(),
                description: "Answer a question from retrieved legal context".to_string(),
            },
            ToolInfo {
                name: "lawqa_ingest".to_string(),
                description: "Index fragment files produced by the segmentation pipeline"
                    .to_string(),
            },
            ToolInfo {
                name: "lawqa_refresh".to_string(),
                description: "Reload the corpus snapshot from the store".to_string(),
            },
            ToolInfo {
                name: "lawqa_stats".to_string(),
                description: "Get statistics about the indexed corpus".to_string(),
            },
        ]
    }

    fn top_k(&self, k: Option<usize>) -> usize {
        k.unwrap_or(self.config.retrieval.default_top_k)
    }

    /// Retrieved context run through the evidence policy.
    pub async fn lookup(&self, question: &str, k: Option<usize>) -> Result<Evidence> {
        let retrieved = self.service.retrieve(question, self.top_k(k)).await?;
        Ok(self.policy.check(retrieved))
    }

    /// Legal context and numbered citations, or the insufficient-information sentinel.
    pub async fn retrieve(&self, params: QuestionParams) -> ToolResult {
        info!("Retrieving context for: {:?}", params.question);

        match self.lookup(&params.question, params.k).await {
            Ok(Evidence::Insufficient) => ToolResult::success(INSUFFICIENT_INFORMATION),
            Ok(Evidence::Sufficient(retrieved)) => {
                let mut output = retrieved.context;
                output.push_str("\n\nCăn cứ pháp lý:\n");
                for (i, citation) in retrieved.citations.iter().enumerate() {
                    output.push_str(&format!("{}. {}\n", i + 1, citation));
                }
                ToolResult::success(output)
            }
            Err(e) => failure("retrieve", e),
        }
    }

    /// Grounded answer from the configured generator.
    pub async fn ask(&self, params: QuestionParams) -> ToolResult {
        let Some(composer) = &self.composer else {
            return ToolResult::error("Chưa cấu hình mô hình sinh câu trả lời.");
        };

        info!("Answering: {:?}", params.question);

        match composer.ask(&params.question, self.top_k(params.k)).await {
            Ok(answer) if answer.is_insufficient() => ToolResult::success(answer.text),
            Ok(answer) => {
                let mut output = answer.text;
                if !answer.citations.is_empty() {
                    output.push_str("\n\nNguồn trích dẫn:\n");
                    for citation in &answer.citations {
                        output.push_str(&format!("- {}\n", citation));
                    }
                }
                ToolResult::success(output)
            }
            Err(e) => failure("ask", e),
        }
    }

    /// Index fragment files, then refresh the snapshot.
    pub async fn ingest_file(&self, params: IngestParams) -> ToolResult {
        info!("Ingesting {} files (reset: {})", params.paths.len(), params.reset);

        let report = match self.indexer.ingest_files(&params.paths, params.reset).await {
            Ok(report) => report,
            Err(e) => return failure("ingest", e),
        };
        self.after_ingest(report).await
    }

    /// Index fragments given directly, then refresh the snapshot.
    pub async fn ingest_fragments(&self, fragments: Vec<Fragment>, reset: bool) -> ToolResult {
        info!("Ingesting {} fragments (reset: {})", fragments.len(), reset);

        let report = match self.indexer.ingest(fragments, reset).await {
            Ok(report) => report,
            Err(e) => return failure("ingest", e),
        };
        self.after_ingest(report).await
    }

    async fn after_ingest(&self, report: IngestReport) -> ToolResult {
        match self.service.refresh().await {
            Ok(refreshed) => ToolResult::success(format_ingest(&report, refreshed.fragments)),
            Err(e) => failure("refresh", e),
        }
    }

    /// Reload the corpus snapshot from the store.
    pub async fn refresh(&self) -> ToolResult {
        match self.service.refresh().await {
            Ok(report) => ToolResult::success(format!(
                "Đã nạp lại {} đoạn luật ({} từ vựng, chỉ mục: {:?}).",
                report.fragments, report.vocabulary, report.origin
            )),
            Err(e) => failure("refresh", e),
        }
    }

    /// Get statistics.
    pub async fn stats(&self) -> ToolResult {
        match self.store.stats().await {
            Ok(stats) => {
                let mut output = String::from("Thống kê kho luật:\n\n");
                output.push_str(&format!("- Fragments: {}\n", stats.fragments));
                output.push_str(&format!("- Embeddings: {}\n", stats.vectors));
                output.push_str(&format!("- Snapshot: {}\n", self.service.snapshot_len()));
                output.push_str(&format!(
                    "- Storage: {:.2} MB\n",
                    stats.storage_bytes as f64 / 1024.0 / 1024.0
                ));
                ToolResult::success(output)
            }
            Err(e) => failure("stats", e),
        }
    }

    /// Release the retrieval service and its dependencies.
    pub fn shutdown(self) {
        let Self {
            service, composer, ..
        } = self;
        drop(composer);

        match Arc::try_unwrap(service) {
            Ok(service) => service.shutdown(),
            Err(_) => warn!("Retrieval service still in use at shutdown"),
        }
    }
}

/// Server info.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// Tool info.
#[derive(Debug, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}
