//! Core domain types for legal retrieval.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};

/// The smallest indexed unit of the legal corpus.
///
/// A fragment is a clause, point or bullet level leaf produced by the
/// segmentation pipeline. It carries its own text and the full structural
/// context it was cut from. `citation_key` is the identity of the fragment
/// within a corpus snapshot and the join key between retrieval paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// Rendered citation, e.g. "khoản 2 Điều 15 Luật số 36/2024/QH15".
    #[serde(alias = "display_citation")]
    pub citation_key: String,

    /// Law or decree title.
    pub law: String,

    /// Short law code (e.g. "L36-2024-QH15").
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub law_code: Option<String>,

    /// Chapter heading ("Chương II. ...").
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub chapter: Option<String>,

    /// Section heading ("Mục 1. ...").
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub section: Option<String>,

    /// Article number, without the "Điều" label.
    #[serde(deserialize_with = "lenient_string")]
    pub article_no: String,

    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub article_title: Option<String>,

    /// Clause number, without the "Khoản" label.
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub clause_no: Option<String>,

    /// Point letter, without the "Điểm" label.
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub point: Option<String>,

    /// Bullet index inside a point or clause.
    #[serde(default, deserialize_with = "lenient_opt_u32")]
    pub bullet_idx: Option<u32>,

    /// Lead-in sentence of the enclosing clause.
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub clause_head: Option<String>,

    /// Original leaf text.
    #[serde(alias = "text")]
    pub body_text: String,

    /// Leaf text prefixed with its full structural context.
    #[serde(default)]
    pub enriched_text: String,

    /// Short header ("Điểm a Khoản 2 Điều 15").
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub header: Option<String>,

    /// Breadcrumb ("Chương II > Điều 15 > Khoản 2").
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub path: Option<String>,

    /// Breadcrumb as emitted for term matching; usually equal to `path`.
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub path_text: Option<String>,

    /// File the fragment was segmented from.
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub source_file: Option<String>,
}

impl Fragment {
    /// Create a clause-level fragment with only the required fields set.
    pub fn new(
        citation_key: impl Into<String>,
        law: impl Into<String>,
        article_no: impl Into<String>,
        body_text: impl Into<String>,
    ) -> Self {
        let body_text = body_text.into();
        Self {
            citation_key: citation_key.into(),
            law: law.into(),
            law_code: None,
            chapter: None,
            section: None,
            article_no: article_no.into(),
            article_title: None,
            clause_no: None,
            point: None,
            bullet_idx: None,
            clause_head: None,
            enriched_text: body_text.clone(),
            body_text,
            header: None,
            path: None,
            path_text: None,
            source_file: None,
        }
    }

    /// Fields used for term-overlap scoring, in a fixed order, empty ones skipped.
    pub fn lexical_projection(&self) -> String {
        let fields = [
            Some(self.article_no.as_str()),
            self.article_title.as_deref(),
            self.clause_no.as_deref(),
            self.point.as_deref(),
            self.clause_head.as_deref(),
            Some(self.body_text.as_str()),
        ];

        fields
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Whether this leaf sits at point level (as opposed to clause level).
    pub fn is_point_leaf(&self) -> bool {
        self.point
            .as_deref()
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false)
    }
}

/// A fragment paired with a per-query relevance score.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub fragment: Arc<Fragment>,

    /// Retrieval or fusion score (higher is better).
    pub score: f32,

    /// Cross-encoder score, set by the reranker stage.
    pub rerank_score: Option<f32>,
}

impl Candidate {
    pub fn new(fragment: Arc<Fragment>, score: f32) -> Self {
        Self {
            fragment,
            score,
            rerank_score: None,
        }
    }

    pub fn citation_key(&self) -> &str {
        &self.fragment.citation_key
    }
}

/// Apparent intent of a query, as far as fusion weighting is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryIntent {
    /// Mentions a chapter / section / article / clause / point by number.
    LegalReference,
    /// Mentions a quantity with a unit (money, time, percent, points...).
    Numeric,
    /// Anything else.
    Generic,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LegalReference => "legal-reference",
            Self::Numeric => "numeric",
            Self::Generic => "generic",
        }
    }
}

impl std::fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier output: the intent plus the dense-side fusion weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: QueryIntent,

    /// Weight of the dense score in `[0, 1]`; the lexical side gets `1 - alpha`.
    pub alpha: f32,
}

/// One hit returned by the vector store.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub fragment: Fragment,

    /// Cosine distance, when the store reports one.
    pub distance: Option<f32>,
}

impl Neighbor {
    /// Similarity in `[0, 1]`-ish, higher is better. A missing distance counts as 0.
    pub fn similarity(&self) -> f32 {
        self.distance.map(|d| 1.0 - d).unwrap_or(0.0)
    }
}

/// Query-level output handed to the answer generator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievedContext {
    /// Rendered, hierarchy-aware context blocks separated by blank lines.
    pub context: String,

    /// Deduplicated citations in rank order.
    pub citations: Vec<String>,
}

/// Statistics about the vector store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub fragments: u64,
    pub vectors: u64,
    pub storage_bytes: u64,
}

fn lenient_value_to_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Accepts a string, a number or null; blank strings become `None`.
fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(lenient_value_to_string(value))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(lenient_value_to_string(value).unwrap_or_default())
}

fn lenient_opt_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Number(n) => Ok(n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .and_then(|v| u32::try_from(v).ok())),
        serde_json::Value::String(s) if s.trim().is_empty() => Ok(None),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "expected bullet index, got {}",
            other
        ))),
    }
}
