//! Rendering ranked fragments as legal context.

use std::collections::HashSet;

use lawqa_core::{Candidate, Fragment, RetrievedContext};

fn field(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Render one fragment with its place in the law hierarchy.
///
/// ```text
/// [Căn cứ: điểm a khoản 2 Điều 6 Nghị định số 168/2024/NĐ-CP]
/// Nghị định số 168/2024/NĐ-CP
/// Chương II. ...
/// Điều 6. Xử phạt người điều khiển xe ô tô ...
/// Khoản 2. Phạt tiền từ ... đối với người điều khiển xe thực hiện một trong các hành vi vi phạm sau đây:
/// Điểm a)
/// Không chấp hành hiệu lệnh của đèn tín hiệu giao thông;
/// ```
pub fn format_block(fragment: &Fragment) -> String {
    let mut lines: Vec<String> = Vec::new();

    if let Some(citation) = field(Some(fragment.citation_key.as_str())) {
        lines.push(format!("[Căn cứ: {}]", citation));
    }

    for heading in [
        field(Some(fragment.law.as_str())),
        field(fragment.chapter.as_deref()),
        field(fragment.section.as_deref()),
    ]
    .into_iter()
    .flatten()
    {
        lines.push(heading.to_string());
    }

    let article_no = field(Some(fragment.article_no.as_str()));
    let article_title = field(fragment.article_title.as_deref());
    if article_no.is_some() || article_title.is_some() {
        let mut line = format!("Điều {}", article_no.unwrap_or_default())
            .trim()
            .to_string();
        if let Some(title) = article_title {
            line.push_str(". ");
            line.push_str(title);
        }
        lines.push(line);
    }

    let clause_no = field(fragment.clause_no.as_deref());
    let body = field(Some(fragment.body_text.as_str()));

    if let Some(point) = field(fragment.point.as_deref()) {
        // Point leaves need the clause lead-in to read correctly.
        match (clause_no, field(fragment.clause_head.as_deref())) {
            (Some(no), Some(head)) => lines.push(format!("Khoản {}. {}", no, head)),
            (Some(no), None) => lines.push(format!("Khoản {}", no)),
            _ => {}
        }
        lines.push(format!("Điểm {})", point));
    } else if let Some(no) = clause_no {
        lines.push(format!("Khoản {}", no));
    }

    if let Some(body) = body {
        lines.push(body.to_string());
    }

    lines.join("\n").trim().to_string()
}

/// Drop citations that differ only by case or whitespace; first wins.
pub fn dedupe_citations<I, S>(citations: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for citation in citations {
        let citation = citation.as_ref();
        let key = citation
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        if !key.is_empty() && seen.insert(key) {
            out.push(citation.to_string());
        }
    }

    out
}

/// Blocks in rank order separated by a blank line, plus deduplicated citations.
pub fn format_context(candidates: &[Candidate]) -> RetrievedContext {
    let blocks: Vec<String> = candidates
        .iter()
        .map(|c| format_block(&c.fragment))
        .filter(|b| !b.is_empty())
        .collect();

    RetrievedContext {
        context: blocks.join("\n\n"),
        citations: dedupe_citations(candidates.iter().map(|c| c.citation_key())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn point_leaf() -> Fragment {
        let mut f = Fragment::new(
            "điểm a khoản 2 Điều 6 Nghị định số 168/2024/NĐ-CP",
            "Nghị định số 168/2024/NĐ-CP",
            "6",
            "Không chấp hành hiệu lệnh của đèn tín hiệu giao thông;",
        );
        f.chapter = Some("Chương II. HÀNH VI VI PHẠM".to_string());
        f.article_title = Some("Xử phạt người điều khiển xe ô tô".to_string());
        f.clause_no = Some("2".to_string());
        f.clause_head = Some("Phạt tiền từ 18.000.000 đồng đến 20.000.000 đồng:".to_string());
        f.point = Some("a".to_string());
        f
    }

    #[test]
    fn test_point_leaf_block() {
        let block = format_block(&point_leaf());
        assert_eq!(
            block,
            "[Căn cứ: điểm a khoản 2 Điều 6 Nghị định số 168/2024/NĐ-CP]\n\
             Nghị định số 168/2024/NĐ-CP\n\
             Chương II. HÀNH VI VI PHẠM\n\
             Điều 6. Xử phạt người điều khiển xe ô tô\n\
             Khoản 2. Phạt tiền từ 18.000.000 đồng đến 20.000.000 đồng:\n\
             Điểm a)\n\
             Không chấp hành hiệu lệnh của đèn tín hiệu giao thông;"
        );
    }

    #[test]
    fn test_clause_leaf_block() {
        let mut f = Fragment::new("khoản 2 Điều 15", "Luật X", "15", "Nội dung khoản.");
        f.clause_no = Some("2".to_string());
        f.clause_head = Some("ignored for clause leaves".to_string());
        f.section = Some("  ".to_string());

        assert_eq!(
            format_block(&f),
            "[Căn cứ: khoản 2 Điều 15]\nLuật X\nĐiều 15\nKhoản 2\nNội dung khoản."
        );
    }

    #[test]
    fn test_point_without_clause_head() {
        let mut f = point_leaf();
        f.clause_head = None;
        let block = format_block(&f);
        assert!(block.contains("\nKhoản 2\nĐiểm a)\n"));
    }

    #[test]
    fn test_dedupe_citations() {
        assert_eq!(dedupe_citations(["A", "b", "a", "C"]), vec!["A", "b", "C"]);
        assert_eq!(
            dedupe_citations(["khoản 1  Điều 2", "Khoản 1 điều 2", "", "  "]),
            vec!["khoản 1  Điều 2"]
        );
    }

    #[test]
    fn test_format_context_joins_blocks() {
        let a = Arc::new(Fragment::new("A", "L", "1", "một"));
        let b = Arc::new(Fragment::new("a", "L", "2", "hai"));
        let candidates = vec![Candidate::new(a, 0.9), Candidate::new(b, 0.5)];

        let out = format_context(&candidates);
        assert_eq!(out.context, "[Căn cứ: A]\nL\nĐiều 1\nmột\n\n[Căn cứ: a]\nL\nĐiều 2\nhai");
        assert_eq!(out.citations, vec!["A"]);

        assert_eq!(format_context(&[]), RetrievedContext::default());
    }
}
