//! Weighted fusion of lexical and dense candidates.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use lawqa_core::Candidate;

/// Added to the maximum before dividing so an all-zero list stays finite.
const EPSILON: f32 = 1e-8;

/// Descending score order; NaN ranks below every number.
pub(crate) fn by_score_desc(a: f32, b: f32) -> Ordering {
    let key = |s: f32| if s.is_nan() { f32::NEG_INFINITY } else { s };
    key(b).total_cmp(&key(a))
}

/// Scale scores by `1 / (max + ε)`: the best maps to ≈1.0, all land in `[0, 1]`.
pub fn normalize_scores(scores: &[f32]) -> Vec<f32> {
    let Some(max) = scores.iter().copied().reduce(f32::max) else {
        return Vec::new();
    };

    let denom = max + EPSILON;
    scores.iter().map(|s| s / denom).collect()
}

/// Fuse raw-scored lexical hits with similarity-scored dense hits.
///
/// Dense candidates score `alpha * dense + (1 - alpha) * lexical` (lexical
/// defaulting to 0); lexical-only candidates score `(1 - alpha) * lexical`.
/// The union is keyed by citation key, so each fragment appears once. The
/// result is sorted by fused score, ties keeping dense order first, then
/// lexical order, and truncated to `pool_size`. Either side may be empty.
pub fn fuse(
    lexical: Vec<Candidate>,
    dense: Vec<Candidate>,
    alpha: f32,
    pool_size: usize,
) -> Vec<Candidate> {
    let raw: Vec<f32> = lexical.iter().map(|c| c.score).collect();
    let normalized = normalize_scores(&raw);

    let mut lexical_scores: HashMap<String, f32> = HashMap::with_capacity(lexical.len());
    for (candidate, score) in lexical.iter().zip(&normalized) {
        lexical_scores
            .entry(candidate.citation_key().to_string())
            .or_insert(*score);
    }

    let mut seen: HashSet<String> = HashSet::with_capacity(lexical.len() + dense.len());
    let mut fused = Vec::with_capacity(lexical.len() + dense.len());

    for candidate in dense {
        if !seen.insert(candidate.citation_key().to_string()) {
            continue;
        }
        let lexical_score = lexical_scores
            .get(candidate.citation_key())
            .copied()
            .unwrap_or(0.0);
        let score = alpha * candidate.score + (1.0 - alpha) * lexical_score;
        fused.push(Candidate::new(candidate.fragment, score));
    }

    for (candidate, lexical_score) in lexical.into_iter().zip(normalized) {
        if !seen.insert(candidate.citation_key().to_string()) {
            continue;
        }
        fused.push(Candidate::new(
            candidate.fragment,
            (1.0 - alpha) * lexical_score,
        ));
    }

    fused.sort_by(|a, b| by_score_desc(a.score, b.score));
    fused.truncate(pool_size);

    fused
}
