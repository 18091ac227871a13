//! Persistence of the lexical index, keyed by corpus snapshot.
//!
//! The blob records a fingerprint of the snapshot it was built from (citation
//! keys, lexical projections and the segmenter lexicon). A blob whose
//! fingerprint does not match the current snapshot is rebuilt instead of
//! being trusted.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use lawqa_core::{Fragment, LawQaError, Result};

use crate::bm25::{Bm25Params, LexicalIndex, TermStats};
use crate::segmenter::Segmenter;

const FORMAT_VERSION: u32 = 1;

/// How the index returned by [`load_or_build`] came to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOrigin {
    /// Loaded from a blob matching the snapshot.
    Loaded,
    /// No blob existed; built and persisted.
    Built,
    /// A blob existed but was stale or unreadable; rebuilt and persisted.
    Rebuilt { reason: String },
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    fingerprint: String,
    stats: TermStats,
}

/// Fingerprint of a snapshot as seen by the lexical index.
pub fn snapshot_fingerprint<'a, I>(fragments: I, segmenter: &Segmenter) -> String
where
    I: IntoIterator<Item = &'a Fragment>,
{
    let mut hasher = blake3::Hasher::new();
    hasher.update(&FORMAT_VERSION.to_le_bytes());
    hasher.update(segmenter.signature().as_bytes());

    for fragment in fragments {
        hasher.update(&[0x1e]);
        hasher.update(fragment.citation_key.as_bytes());
        hasher.update(&[0x1f]);
        hasher.update(fragment.lexical_projection().as_bytes());
    }

    hex::encode(hasher.finalize().as_bytes())
}

/// Write the index for the snapshot with the given fingerprint.
pub fn save(index: &LexicalIndex, fingerprint: &str, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let blob = PersistedIndex {
        version: FORMAT_VERSION,
        fingerprint: fingerprint.to_string(),
        stats: index.stats().clone(),
    };

    // Write-then-rename so a crash never leaves a truncated blob behind.
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_vec(&blob)?)?;
    std::fs::rename(&tmp, path)?;

    info!(
        "Persisted lexical index ({} documents) to {:?}",
        index.len(),
        path
    );
    Ok(())
}

fn load(
    path: &Path,
    fingerprint: &str,
    segmenter: &Segmenter,
    params: Bm25Params,
) -> std::result::Result<LexicalIndex, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("unreadable: {}", e))?;
    let blob: PersistedIndex =
        serde_json::from_slice(&bytes).map_err(|e| format!("corrupt: {}", e))?;

    if blob.version != FORMAT_VERSION {
        return Err(format!(
            "format version {} (expected {})",
            blob.version, FORMAT_VERSION
        ));
    }
    if blob.fingerprint != fingerprint {
        return Err("built from a different corpus snapshot".to_string());
    }

    Ok(LexicalIndex::from_stats(blob.stats, segmenter.clone(), params))
}

/// Load the persisted index for this snapshot, or build and persist a new one.
pub fn load_or_build(
    path: impl AsRef<Path>,
    fragments: &[&Fragment],
    segmenter: Segmenter,
    params: Bm25Params,
) -> Result<(LexicalIndex, IndexOrigin)> {
    let path = path.as_ref();
    let fingerprint = snapshot_fingerprint(fragments.iter().copied(), &segmenter);

    let origin = if path.exists() {
        match load(path, &fingerprint, &segmenter, params) {
            Ok(index) if index.len() == fragments.len() => {
                info!(
                    "Loaded lexical index ({} documents) from {:?}",
                    index.len(),
                    path
                );
                return Ok((index, IndexOrigin::Loaded));
            }
            Ok(index) => IndexOrigin::Rebuilt {
                reason: format!(
                    "document count {} does not match snapshot size {}",
                    index.len(),
                    fragments.len()
                ),
            },
            Err(reason) => IndexOrigin::Rebuilt { reason },
        }
    } else {
        IndexOrigin::Built
    };

    if let IndexOrigin::Rebuilt { reason } = &origin {
        warn!("Persisted lexical index at {:?} not used: {}", path, reason);
    }

    let index = LexicalIndex::build(fragments.iter().copied(), segmenter, params);
    save(&index, &fingerprint, path).map_err(|e| {
        LawQaError::index(format!("Failed to persist index to {:?}: {}", path, e))
    })?;

    Ok((index, origin))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<Fragment> {
        vec![
            Fragment::new("khoản 1 Điều 5", "Luật X", "5", "Nghiêm cấm điều khiển xe khi có nồng độ cồn"),
            Fragment::new("khoản 2 Điều 6", "Luật X", "6", "Người đi bộ phải đi trên hè phố"),
        ]
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let seg = Segmenter::new();
        let docs = corpus();
        let a = snapshot_fingerprint(&docs, &seg);
        assert_eq!(a, snapshot_fingerprint(&docs, &seg));

        let mut changed = corpus();
        changed[1].body_text.push_str(" và lề đường");
        assert_ne!(a, snapshot_fingerprint(&changed, &seg));

        let other_seg = Segmenter::with_extra(["hè phố"]);
        assert_ne!(a, snapshot_fingerprint(&docs, &other_seg));
    }

    #[test]
    fn test_build_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index").join("lexical.json");
        let docs = corpus();
        let refs: Vec<&Fragment> = docs.iter().collect();

        let (built, origin) =
            load_or_build(&path, &refs, Segmenter::new(), Bm25Params::default()).unwrap();
        assert_eq!(origin, IndexOrigin::Built);
        assert!(path.exists());

        let (loaded, origin) =
            load_or_build(&path, &refs, Segmenter::new(), Bm25Params::default()).unwrap();
        assert_eq!(origin, IndexOrigin::Loaded);
        assert_eq!(
            built.query("nồng độ cồn", 2),
            loaded.query("nồng độ cồn", 2)
        );
    }

    #[test]
    fn test_stale_blob_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexical.json");
        let docs = corpus();
        let refs: Vec<&Fragment> = docs.iter().collect();
        load_or_build(&path, &refs, Segmenter::new(), Bm25Params::default()).unwrap();

        let mut grown = corpus();
        grown.push(Fragment::new("khoản 1 Điều 7", "Luật X", "7", "Xe đạp phải có đèn"));
        let refs: Vec<&Fragment> = grown.iter().collect();

        let (index, origin) =
            load_or_build(&path, &refs, Segmenter::new(), Bm25Params::default()).unwrap();
        assert!(matches!(origin, IndexOrigin::Rebuilt { .. }));
        assert_eq!(index.len(), 3);

        // The rebuilt blob is now current.
        let (_, origin) =
            load_or_build(&path, &refs, Segmenter::new(), Bm25Params::default()).unwrap();
        assert_eq!(origin, IndexOrigin::Loaded);
    }

    #[test]
    fn test_corrupt_blob_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexical.json");
        std::fs::write(&path, b"not json").unwrap();

        let docs = corpus();
        let refs: Vec<&Fragment> = docs.iter().collect();
        let (index, origin) =
            load_or_build(&path, &refs, Segmenter::new(), Bm25Params::default()).unwrap();

        match origin {
            IndexOrigin::Rebuilt { reason } => assert!(reason.starts_with("corrupt")),
            other => panic!("unexpected origin: {:?}", other),
        }
        assert_eq!(index.len(), 2);
    }
}
