//! Pattern-based query intent classifier.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use lawqa_core::{Classification, IntentClassifier, QueryIntent};

/// Structural marker followed by an Arabic or Roman number ("Điều 15", "Chương II").
/// The number must end at a word boundary so "điều lệ" is not a reference.
static LEGAL_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:chương|mục|điều|khoản|điểm)\s+[ivxlc\d]+\b").expect("valid regex")
});

/// Number directly followed by a unit. `%` carries no trailing word boundary.
static NUMERIC_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b\d+\s*(?:(?:giờ|km/h|triệu|nghìn|đồng|lần|ngày|tháng|năm|phần trăm|cm3|cc|tấn|km|m|kw|điểm|giấy phép lái xe)\b|%)",
    )
    .expect("valid regex")
});

pub const DEFAULT_BASE_ALPHA: f32 = 0.55;

/// Cheap regex classifier; first matching rule wins.
///
/// | intent | alpha |
/// |--------|-------|
/// | legal reference | `max(0.30, base - 0.25)` |
/// | number + unit | `max(0.40, base - 0.15)` |
/// | otherwise | `min(0.75, base + 0.20)` |
#[derive(Debug, Clone, Copy)]
pub struct PatternClassifier {
    base_alpha: f32,
}

impl PatternClassifier {
    pub fn new(base_alpha: f32) -> Self {
        Self { base_alpha }
    }

    pub fn base_alpha(&self) -> f32 {
        self.base_alpha
    }

    fn intent(query: &str) -> QueryIntent {
        let query: String = query.nfc().collect();

        if LEGAL_REFERENCE.is_match(&query) {
            QueryIntent::LegalReference
        } else if NUMERIC_UNIT.is_match(&query) {
            QueryIntent::Numeric
        } else {
            QueryIntent::Generic
        }
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_ALPHA)
    }
}

impl IntentClassifier for PatternClassifier {
    fn classify(&self, query: &str) -> Classification {
        let intent = Self::intent(query);
        let base = self.base_alpha;

        let alpha = match intent {
            QueryIntent::LegalReference => (base - 0.25).max(0.30),
            QueryIntent::Numeric => (base - 0.15).max(0.40),
            QueryIntent::Generic => (base + 0.20).min(0.75),
        };

        Classification { intent, alpha }
    }
}
