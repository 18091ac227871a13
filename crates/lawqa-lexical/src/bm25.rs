//! BM25 inverted index.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use lawqa_core::Fragment;

use crate::segmenter::Segmenter;

/// BM25 tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f32,

    /// Document-length normalization strength.
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// Corpus statistics; this is what gets persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct TermStats {
    /// Token count per document, in corpus order.
    pub(crate) doc_lens: Vec<u32>,

    /// term -> [(doc index, term frequency)], doc indices ascending.
    pub(crate) postings: HashMap<String, Vec<(u32, u32)>>,
}

impl TermStats {
    fn from_tokenized(tokenized: impl IntoIterator<Item = Vec<String>>) -> Self {
        let mut doc_lens = Vec::new();
        let mut postings: HashMap<String, Vec<(u32, u32)>> = HashMap::new();

        for (doc, tokens) in tokenized.into_iter().enumerate() {
            doc_lens.push(tokens.len() as u32);

            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_default() += 1;
            }
            for (term, count) in tf {
                postings.entry(term).or_default().push((doc as u32, count));
            }
        }

        Self { doc_lens, postings }
    }

    fn avg_doc_len(&self) -> f32 {
        if self.doc_lens.is_empty() {
            return 0.0;
        }
        let total: u64 = self.doc_lens.iter().map(|&l| l as u64).sum();
        total as f32 / self.doc_lens.len() as f32
    }
}

/// Immutable BM25 index over a corpus snapshot.
///
/// Document indices returned by [`LexicalIndex::query`] are positions in the
/// fragment sequence the index was built from.
#[derive(Debug, Clone)]
pub struct LexicalIndex {
    stats: TermStats,
    avg_doc_len: f32,
    params: Bm25Params,
    segmenter: Segmenter,
}

impl LexicalIndex {
    /// Build an index over the lexical projection of each fragment.
    pub fn build<'a, I>(fragments: I, segmenter: Segmenter, params: Bm25Params) -> Self
    where
        I: IntoIterator<Item = &'a Fragment>,
    {
        let tokenized: Vec<Vec<String>> = fragments
            .into_iter()
            .map(|f| segmenter.tokenize(&f.lexical_projection()))
            .collect();

        debug!("Tokenized {} fragments for BM25", tokenized.len());

        Self::from_stats(TermStats::from_tokenized(tokenized), segmenter, params)
    }

    pub(crate) fn from_stats(stats: TermStats, segmenter: Segmenter, params: Bm25Params) -> Self {
        let avg_doc_len = stats.avg_doc_len();
        Self {
            stats,
            avg_doc_len,
            params,
            segmenter,
        }
    }

    pub(crate) fn stats(&self) -> &TermStats {
        &self.stats
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.stats.doc_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.doc_lens.is_empty()
    }

    /// Number of distinct terms.
    pub fn vocabulary_size(&self) -> usize {
        self.stats.postings.len()
    }

    pub fn segmenter(&self) -> &Segmenter {
        &self.segmenter
    }

    /// Score of every document for `text`, in corpus order.
    pub fn scores(&self, text: &str) -> Vec<f32> {
        let tokens = self.segmenter.tokenize(text);
        let mut scores = vec![0.0f32; self.len()];
        if scores.is_empty() {
            return scores;
        }

        let n = self.len() as f32;
        let avg_doc_len = if self.avg_doc_len > 0.0 {
            self.avg_doc_len
        } else {
            1.0
        };
        let Bm25Params { k1, b } = self.params;

        // Repeated query tokens count once per occurrence.
        for token in &tokens {
            let Some(postings) = self.stats.postings.get(token) else {
                continue;
            };

            let df = postings.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5)).ln_1p();

            for &(doc, tf) in postings {
                let tf = tf as f32;
                let doc_len = self.stats.doc_lens[doc as usize] as f32;
                let norm = 1.0 - b + b * doc_len / avg_doc_len;
                scores[doc as usize] += idf * tf * (k1 + 1.0) / (tf + k1 * norm);
            }
        }

        scores
    }

    /// Top `k` documents by score, highest first; ties keep corpus order.
    ///
    /// Documents sharing no term with the query are not returned.
    pub fn query(&self, text: &str, k: usize) -> Vec<(usize, f32)> {
        if k == 0 {
            return Vec::new();
        }

        let mut hits: Vec<(usize, f32)> = self
            .scores(text)
            .into_iter()
            .enumerate()
            .filter(|(_, score)| *score > 0.0)
            .collect();

        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        hits.truncate(k);

        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(key: &str, article: &str, body: &str) -> Fragment {
        Fragment::new(key, "Luật số 36/2024/QH15", article, body)
    }

    fn corpus() -> Vec<Fragment> {
        vec![
            fragment("khoản 1 Điều 9", "9", "Người lái xe phải giữ khoảng cách an toàn với xe phía trước"),
            fragment("khoản 2 Điều 15", "15", "Xử phạt người điều khiển xe mô tô vượt đèn tín hiệu"),
            fragment("khoản 3 Điều 20", "20", "Kết cấu hạ tầng đường bộ bao gồm công trình đường bộ"),
        ]
    }

    #[test]
    fn test_build_stats() {
        let index = LexicalIndex::build(&corpus(), Segmenter::new(), Bm25Params::default());
        assert_eq!(index.len(), 3);
        assert!(index.vocabulary_size() > 10);
    }

    #[test]
    fn test_query_ranks_matching_fragment_first() {
        let index = LexicalIndex::build(&corpus(), Segmenter::new(), Bm25Params::default());
        let hits = index.query("kết cấu hạ tầng đường bộ gồm những gì", 3);

        assert!(!hits.is_empty());
        assert_eq!(hits[0].0, 2);
        assert!(hits.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn test_article_number_matches() {
        let index = LexicalIndex::build(&corpus(), Segmenter::new(), Bm25Params::default());
        let hits = index.query("Điều 15", 3);
        assert_eq!(hits[0].0, 1);
    }

    #[test]
    fn test_no_overlap_returns_nothing() {
        let index = LexicalIndex::build(&corpus(), Segmenter::new(), Bm25Params::default());
        assert!(index.query("hôn nhân gia đình", 3).is_empty());
        assert!(index.query("", 3).is_empty());
    }

    #[test]
    fn test_ties_keep_corpus_order() {
        let docs = vec![
            fragment("a", "1", "phạt tiền"),
            fragment("b", "1", "phạt tiền"),
            fragment("c", "1", "phạt tiền"),
        ];
        let index = LexicalIndex::build(&docs, Segmenter::new(), Bm25Params::default());
        let hits = index.query("phạt tiền", 2);

        assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(hits[0].1, hits[1].1);
    }

    #[test]
    fn test_scores_non_negative_for_common_terms() {
        // A term present in every document still has positive idf.
        let docs = vec![
            fragment("a", "1", "giao thông đường bộ"),
            fragment("b", "2", "giao thông đường bộ đô thị"),
        ];
        let index = LexicalIndex::build(&docs, Segmenter::new(), Bm25Params::default());
        let scores = index.scores("giao thông");

        assert!(scores.iter().all(|s| *s > 0.0));
        // Shorter document scores higher for the same tf.
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn test_empty_index() {
        let index = LexicalIndex::build(&[], Segmenter::new(), Bm25Params::default());
        assert!(index.is_empty());
        assert!(index.query("bất kỳ", 5).is_empty());
    }
}
