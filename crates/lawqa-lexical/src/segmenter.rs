//! Word segmentation for Vietnamese legal text.
//!
//! Vietnamese writes one syllable per space-separated unit, and most
//! content words are compounds of two or more syllables ("giao thông",
//! "giấy phép"). Scoring on raw syllables lets "giao" in "giao nhau" match
//! "giao" in "giao thông", so syllables belonging to a known compound are
//! joined into a single token ("giao_thông") by greedy longest match.

use std::collections::HashSet;
use std::path::Path;

use unicode_normalization::UnicodeNormalization;

use lawqa_core::Result;

/// Compounds common in traffic and administrative-sanction law.
const BUILTIN_COMPOUNDS: &[&str] = &[
    "an toàn",
    "áp dụng",
    "bảo hiểm",
    "biển báo",
    "biển số",
    "bổ sung",
    "cảnh sát",
    "chất ma túy",
    "chở hàng",
    "chở người",
    "chủ xe",
    "chuyển hướng",
    "chính phủ",
    "cơ quan",
    "công trình",
    "dân sự",
    "dàn hàng",
    "dừng xe",
    "đăng ký",
    "đăng kiểm",
    "đào tạo",
    "đèn tín hiệu",
    "điều chỉnh",
    "điều khiển",
    "đi bộ",
    "đỗ xe",
    "đối tượng",
    "đường bộ",
    "đường cao tốc",
    "đường sắt",
    "giao nhau",
    "giao thông",
    "giải thích",
    "giấy phép",
    "hành chính",
    "hành khách",
    "hàng hóa",
    "hạ tầng",
    "hậu quả",
    "hiệu lệnh",
    "hình thức",
    "kết cấu",
    "khắc phục",
    "khoảng cách",
    "kiểm định",
    "kinh doanh",
    "lái xe",
    "làn đường",
    "lùi xe",
    "ma túy",
    "mô tô",
    "mũ bảo hiểm",
    "mức phạt",
    "nghị định",
    "người đi bộ",
    "người điều khiển",
    "nguy hiểm",
    "nồng độ",
    "nút giao",
    "ô tô",
    "phạm vi",
    "phạt tiền",
    "phần đường",
    "phục hồi",
    "phương tiện",
    "quay đầu",
    "quốc hội",
    "quy định",
    "quy tắc",
    "rẽ phải",
    "rẽ trái",
    "sát hạch",
    "sử dụng",
    "tai nạn",
    "tạm giữ",
    "tước quyền",
    "thẩm quyền",
    "thời hạn",
    "tín hiệu",
    "tốc độ",
    "trách nhiệm",
    "tránh xe",
    "trật tự",
    "trẻ em",
    "trừ điểm",
    "từ ngữ",
    "va chạm",
    "vạch kẻ",
    "vận tải",
    "vi phạm",
    "vượt xe",
    "xe đạp",
    "xe gắn máy",
    "xe máy",
    "xe mô tô",
    "xử phạt",
];

/// Upper bound on syllables per compound.
const MAX_COMPOUND_SYLLABLES: usize = 4;

/// Syllable splitter plus greedy compound joiner.
#[derive(Debug, Clone)]
pub struct Segmenter {
    /// Compounds in joined form ("giao_thông").
    compounds: HashSet<String>,

    /// Longest compound, in syllables.
    max_syllables: usize,

    /// Hash of the sorted lexicon; changes whenever tokenization would.
    signature: String,
}

impl Segmenter {
    /// Create a segmenter with the built-in lexicon.
    pub fn new() -> Self {
        Self::with_compounds(BUILTIN_COMPOUNDS.iter().copied())
    }

    /// Create a segmenter with the built-in lexicon plus `extra` compounds.
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extra: Vec<String> = extra.into_iter().map(|s| s.as_ref().to_string()).collect();
        Self::with_compounds(
            BUILTIN_COMPOUNDS
                .iter()
                .copied()
                .chain(extra.iter().map(String::as_str)),
        )
    }

    /// Built-in lexicon plus one compound per non-empty, non-`#` line of a file.
    pub fn from_lexicon_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let extra = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'));
        Ok(Self::with_extra(extra))
    }

    fn with_compounds<'a>(words: impl Iterator<Item = &'a str>) -> Self {
        let mut compounds = HashSet::new();
        let mut max_syllables = 1;

        for word in words {
            let syllables = Self::syllables(word);
            if syllables.len() < 2 || syllables.len() > MAX_COMPOUND_SYLLABLES {
                continue;
            }
            max_syllables = max_syllables.max(syllables.len());
            compounds.insert(syllables.join("_"));
        }

        let mut sorted: Vec<&str> = compounds.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        let signature = hex::encode(&blake3::hash(sorted.join("\n").as_bytes()).as_bytes()[..8]);

        Self {
            compounds,
            max_syllables,
            signature,
        }
    }

    /// NFC-normalized, lowercased alphanumeric runs.
    pub fn syllables(text: &str) -> Vec<String> {
        let normalized: String = text.nfc().collect::<String>().to_lowercase();
        normalized
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Tokenize text into words, joining known compounds with `_`.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let syllables = Self::syllables(text);
        let mut tokens = Vec::with_capacity(syllables.len());
        let mut i = 0;

        while i < syllables.len() {
            let longest = self.max_syllables.min(syllables.len() - i);
            let compound = (2..=longest)
                .rev()
                .map(|len| (len, syllables[i..i + len].join("_")))
                .find(|(_, joined)| self.compounds.contains(joined));

            match compound {
                Some((len, joined)) => {
                    tokens.push(joined);
                    i += len;
                }
                None => {
                    tokens.push(syllables[i].clone());
                    i += 1;
                }
            }
        }

        tokens
    }

    /// Identifies the lexicon; part of the persisted index fingerprint.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Number of known compounds.
    pub fn lexicon_size(&self) -> usize {
        self.compounds.len()
    }
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syllables_normalize_case_and_punctuation() {
        assert_eq!(
            Segmenter::syllables("Điều 15. Quy tắc chung; (khoản 2)"),
            vec!["điều", "15", "quy", "tắc", "chung", "khoản", "2"]
        );
    }

    #[test]
    fn test_syllables_nfc() {
        // "ế" written as e + combining circumflex + combining acute
        let decomposed = "ph\u{0065}\u{0302}\u{0301}t";
        let composed = "phết";
        assert_eq!(Segmenter::syllables(decomposed), Segmenter::syllables(composed));
    }

    #[test]
    fn test_joins_compounds() {
        let seg = Segmenter::new();
        assert_eq!(
            seg.tokenize("Người điều khiển xe mô tô vi phạm quy tắc giao thông"),
            vec!["người_điều_khiển", "xe_mô_tô", "vi_phạm", "quy_tắc", "giao_thông"]
        );
    }

    #[test]
    fn test_longest_match_wins() {
        let seg = Segmenter::new();
        assert_eq!(seg.tokenize("đèn tín hiệu"), vec!["đèn_tín_hiệu"]);
        assert_eq!(seg.tokenize("tín hiệu"), vec!["tín_hiệu"]);
    }

    #[test]
    fn test_unknown_syllables_stay_single() {
        let seg = Segmenter::new();
        assert_eq!(seg.tokenize("xe chạy nhanh"), vec!["xe", "chạy", "nhanh"]);
    }

    #[test]
    fn test_extra_lexicon_changes_signature() {
        let base = Segmenter::new();
        let extended = Segmenter::with_extra(["dây an toàn"]);

        assert_ne!(base.signature(), extended.signature());
        assert_eq!(extended.lexicon_size(), base.lexicon_size() + 1);
        assert_eq!(extended.tokenize("thắt dây an toàn"), vec!["thắt", "dây_an_toàn"]);
    }

    #[test]
    fn test_lexicon_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexicon.txt");
        std::fs::write(&path, "# comment\n\ndây an toàn\nphần trăm\n").unwrap();

        let seg = Segmenter::from_lexicon_file(&path).unwrap();
        assert_eq!(seg.tokenize("50 phần trăm"), vec!["50", "phần_trăm"]);
    }
}
