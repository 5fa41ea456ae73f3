//! Schedule keyword configuration and URL/content token matching.
//!
//! The keyword table is read-only to the pipeline; rows are loaded at worker
//! start and reloaded on a refresh interval. `KeywordSets` is the in-memory
//! view the fetcher, frontier and AI gate match against.

use serde::{Deserialize, Serialize};

/// One configured keyword row: `(schedule_type, keyword, negative)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleKeyword {
    pub schedule_type: String,
    pub keyword: String,
    pub negative: bool,
}

/// In-memory keyword view, rebuilt atomically on reload.
#[derive(Debug, Clone)]
pub struct KeywordSets {
    /// Tokens that mark a URL path or page as schedule-adjacent.
    schedule_tokens: Vec<String>,
    /// Tokens that mark a dedicated schedule page (`mass-times`, ...).
    dedicated_tokens: Vec<String>,
    /// Cathedral / major-parish markers.
    cathedral_tokens: Vec<String>,
    /// Promotional / events-list markers.
    promotional_tokens: Vec<String>,
    /// Negative keywords that disqualify a content match.
    negative_tokens: Vec<String>,
}

impl Default for KeywordSets {
    fn default() -> Self {
        Self {
            schedule_tokens: to_owned(&[
                "schedule",
                "mass",
                "masses",
                "adoration",
                "reconciliation",
                "confession",
                "confessions",
                "hours",
                "worship",
                "liturgy",
                "sacrament",
                "parish-life",
            ]),
            dedicated_tokens: to_owned(&[
                "mass-times",
                "mass-schedule",
                "masstimes",
                "confession-times",
                "schedule",
                "service-times",
                "worship-times",
            ]),
            cathedral_tokens: to_owned(&["cathedral", "basilica", "shrine"]),
            promotional_tokens: to_owned(&["events", "bulletin", "news", "calendar"]),
            negative_tokens: to_owned(&["school", "cemetery", "donate"]),
        }
    }
}

fn to_owned(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

impl KeywordSets {
    /// Build the sets from configured rows, keeping the built-in defaults for
    /// categories the table does not cover.
    pub fn from_rows(rows: &[ScheduleKeyword]) -> Self {
        let mut sets = Self::default();
        let mut positive: Vec<String> = Vec::new();
        let mut negative: Vec<String> = Vec::new();
        for row in rows {
            let kw = row.keyword.trim().to_lowercase();
            if kw.is_empty() {
                continue;
            }
            if row.negative {
                negative.push(kw);
            } else {
                positive.push(kw);
            }
        }
        if !positive.is_empty() {
            sets.schedule_tokens = positive;
        }
        if !negative.is_empty() {
            sets.negative_tokens = negative;
        }
        sets
    }

    /// Does this URL path contain any schedule-adjacent token?
    pub fn is_schedule_path(&self, path: &str) -> bool {
        let path = path.to_lowercase();
        self.schedule_tokens.iter().any(|t| path.contains(t))
    }

    /// Does this URL path contain a dedicated-schedule token?
    pub fn is_dedicated_schedule_path(&self, path: &str) -> bool {
        let path = path.to_lowercase();
        self.dedicated_tokens.iter().any(|t| path.contains(t))
    }

    /// Does this host or path look like a cathedral / major parish?
    pub fn is_cathedral(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.cathedral_tokens.iter().any(|t| text.contains(t))
    }

    /// Promotional/events URL without any schedule token.
    pub fn is_promotional_path(&self, path: &str) -> bool {
        let path = path.to_lowercase();
        self.promotional_tokens.iter().any(|t| path.contains(t))
            && !self.schedule_tokens.iter().any(|t| path.contains(t))
    }

    /// Count distinct schedule keywords present in page text, net of
    /// negative keywords.
    pub fn count_schedule_keywords(&self, text: &str) -> usize {
        let text = text.to_lowercase();
        if self.negative_tokens.iter().any(|t| text.contains(t))
            && !self.schedule_tokens.iter().any(|t| text.contains(t))
        {
            return 0;
        }
        self.schedule_tokens
            .iter()
            .filter(|t| text.contains(t.as_str()))
            .count()
    }

    /// Count schedule keywords in anchor text (used by the URL scorer).
    pub fn count_anchor_keywords(&self, anchor: &str) -> usize {
        let anchor = anchor.to_lowercase();
        self.schedule_tokens
            .iter()
            .filter(|t| anchor.contains(t.as_str()))
            .count()
    }
}
