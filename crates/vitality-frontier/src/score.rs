//! Discovery scoring: fixed token weights plus an injected ML scorer.

use url::Url;

use vitality_core::KeywordSets;

/// Output of the injected URL scoring model.
#[derive(Debug, Clone, Copy)]
pub struct Prediction {
    /// Probability the URL carries schedule content, in [0, 1].
    pub probability: f64,
    /// Model confidence in that probability, in [0, 1].
    pub confidence: f64,
}

/// Injected scoring function. The model is trained elsewhere; the frontier
/// only consumes its predictions.
pub trait UrlScorer: Send + Sync {
    fn score(&self, url: &Url, anchor: &str) -> Prediction;
}

/// Scorer used when no model is configured; contributes nothing.
pub struct NoopScorer;

impl UrlScorer for NoopScorer {
    fn score(&self, _url: &Url, _anchor: &str) -> Prediction {
        Prediction {
            probability: 0.0,
            confidence: 0.0,
        }
    }
}

/// Compute the 0–100 discovery score for a candidate URL.
pub fn score_candidate(
    url: &Url,
    anchor: &str,
    keywords: &KeywordSets,
    scorer: &dyn UrlScorer,
) -> u8 {
    let path = url.path();
    let host = url.host_str().unwrap_or("");
    let mut score: u32 = 0;

    if keywords.is_dedicated_schedule_path(path) {
        score += 40;
    }
    if keywords.is_cathedral(host) || keywords.is_cathedral(path) {
        score += 20;
    }
    score += 10 * keywords.count_anchor_keywords(anchor) as u32;

    let prediction = scorer.score(url, anchor);
    if prediction.probability >= 0.5 {
        score += (15.0 * prediction.confidence.clamp(0.0, 1.0)).round() as u32;
    }

    score.min(100) as u8
}
