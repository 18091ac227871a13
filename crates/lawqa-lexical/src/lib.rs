//! lawqa-lexical - Term-overlap retrieval over legal fragments
//!
//! Builds a BM25 inverted index over a tokenized projection of each
//! fragment's structural and textual fields, and answers top-k queries.
//!
//! # Features
//!
//! - Syllable splitting with compound-word joining for Vietnamese text
//! - Okapi BM25 scoring with non-negative idf
//! - Stable ordering under score ties (corpus order)
//! - Persistence keyed by a fingerprint of the corpus snapshot
//!
//! # Example
//!
//! ```rust,ignore
//! use lawqa_lexical::{Bm25Params, LexicalIndex, Segmenter};
//!
//! let index = LexicalIndex::build(fragments.iter(), Segmenter::new(), Bm25Params::default());
//! let hits = index.query("mức phạt vượt đèn đỏ", 20);
//! ```

mod bm25;
mod persist;
mod segmenter;

pub use bm25::{Bm25Params, LexicalIndex};
pub use persist::{load_or_build, save, snapshot_fingerprint, IndexOrigin};
pub use segmenter::Segmenter;
