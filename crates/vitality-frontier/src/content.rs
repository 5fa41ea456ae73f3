//! Page-content analysis feeding the visit ledger's extraction fields.

use scraper::Html;

use vitality_core::KeywordSets;

#[derive(Debug, Clone)]
pub struct ContentAnalysis {
    /// Visible text with markup stripped.
    pub text: String,
    pub schedule_keywords_count: u32,
    /// 0.00–1.00; crude signal combining keyword density and page substance.
    pub quality_score: f64,
}

/// Strip markup and estimate how schedule-bearing a page is.
pub fn analyze_content(html: &str, keywords: &KeywordSets) -> ContentAnalysis {
    let document = Html::parse_document(html);
    let text = document
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    let keyword_count = keywords.count_schedule_keywords(&text) as u32;

    // Substance: empty or near-empty pages score 0 regardless of keywords.
    let substance = (text.len() as f64 / 2000.0).min(1.0);
    let keyword_signal = (keyword_count as f64 / 5.0).min(1.0);
    let quality_score = (0.4 * substance + 0.6 * keyword_signal).clamp(0.0, 1.0);

    ContentAnalysis {
        text,
        schedule_keywords_count: keyword_count,
        quality_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_page_scores_high() {
        let kw = KeywordSets::default();
        let html = format!(
            "<html><body><h1>Mass Schedule</h1><p>Confession Saturday 3pm, \
             Adoration Friday, office hours daily. {}</p></body></html>",
            "Parish life and worship. ".repeat(100)
        );
        let analysis = analyze_content(&html, &kw);
        assert!(analysis.schedule_keywords_count >= 3);
        assert!(analysis.quality_score > 0.6);
    }

    #[test]
    fn empty_page_scores_zero() {
        let kw = KeywordSets::default();
        let analysis = analyze_content("<html><body></body></html>", &kw);
        assert_eq!(analysis.schedule_keywords_count, 0);
        assert!(analysis.quality_score < 0.05);
    }

    #[test]
    fn text_is_flattened_without_markup() {
        let kw = KeywordSets::default();
        let analysis = analyze_content("<p>Mass <b>times</b>\n\n here</p>", &kw);
        assert_eq!(analysis.text, "Mass times here");
    }
}
