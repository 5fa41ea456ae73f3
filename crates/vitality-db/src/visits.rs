//! Visit ledger writes and candidate enumeration.

use async_trait::async_trait;
use sqlx::Row;

use vitality_core::{ExtractionMarks, Result, VisitOutcome, VisitSink};

use crate::store::PgStore;

/// A ledger row re-read for candidate ordering.
#[derive(Debug, Clone)]
pub struct UrlCandidate {
    pub url: String,
    pub score: i16,
    pub visit_count: i32,
}

impl PgStore {
    /// Persist a discovery score on first sight. The score never decreases,
    /// so a visit row created before discovery picks the real score up.
    pub async fn record_discovery(&self, parish_id: i64, url: &str, score: i16) -> Result<()> {
        sqlx::query(
            "INSERT INTO discovered_urls (parish_id, url, score, visit_count)
             VALUES ($1, $2, $3, 0)
             ON CONFLICT (parish_id, url) DO UPDATE
                 SET score = greatest(discovered_urls.score, EXCLUDED.score)",
        )
        .bind(parish_id)
        .bind(url)
        .bind(score)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Candidates for a parish in visit order: score descending, shorter
    /// URLs first, then alphabetical.
    pub async fn url_candidates(&self, parish_id: i64, limit: i64) -> Result<Vec<UrlCandidate>> {
        let rows = sqlx::query(
            "SELECT url, score, visit_count FROM discovered_urls
             WHERE parish_id = $1
             ORDER BY score DESC, char_length(url) ASC, url ASC
             LIMIT $2",
        )
        .bind(parish_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| UrlCandidate {
                url: r.get("url"),
                score: r.get("score"),
                visit_count: r.get("visit_count"),
            })
            .collect())
    }
}

#[async_trait]
impl VisitSink for PgStore {
    /// Upsert one visit. `visit_count` only ever increments;
    /// `last_successful_visit` advances only when the visit produced usable
    /// content.
    async fn record_visit(&self, parish_id: i64, url: &str, outcome: &VisitOutcome) -> Result<()> {
        sqlx::query(
            "INSERT INTO discovered_urls
                 (parish_id, url, score, visited_at, http_status, response_time_ms,
                  content_type, content_size_bytes, error_type, error_message,
                  visit_count, last_successful_visit)
             VALUES ($1, $2, 0, $3, $4, $5, $6, $7, $8, $9, 1,
                     CASE WHEN $10 THEN $3 ELSE NULL END)
             ON CONFLICT (parish_id, url) DO UPDATE SET
                 visited_at = EXCLUDED.visited_at,
                 http_status = EXCLUDED.http_status,
                 response_time_ms = EXCLUDED.response_time_ms,
                 content_type = EXCLUDED.content_type,
                 content_size_bytes = EXCLUDED.content_size_bytes,
                 error_type = EXCLUDED.error_type,
                 error_message = EXCLUDED.error_message,
                 visit_count = discovered_urls.visit_count + 1,
                 last_successful_visit = CASE WHEN $10 THEN EXCLUDED.visited_at
                                              ELSE discovered_urls.last_successful_visit END",
        )
        .bind(parish_id)
        .bind(url)
        .bind(outcome.fetched_at)
        .bind(outcome.http_status.map(|s| s as i16))
        .bind(outcome.response_time_ms as i64)
        .bind(&outcome.content_type)
        .bind(outcome.content_size_bytes.map(|b| b as i64))
        .bind(&outcome.error_type)
        .bind(&outcome.error_message)
        .bind(outcome.is_usable())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Update extraction findings on an existing ledger row without touching
    /// the visit counters.
    async fn record_extraction(
        &self,
        parish_id: i64,
        url: &str,
        marks: &ExtractionMarks,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE discovered_urls SET
                 extraction_success = $3,
                 schedule_data_found = $4,
                 schedule_keywords_count = $5,
                 quality_score = coalesce($6, quality_score)
             WHERE parish_id = $1 AND url = $2",
        )
        .bind(parish_id)
        .bind(url)
        .bind(marks.extraction_success)
        .bind(marks.schedule_data_found)
        .bind(marks.schedule_keywords_count as i32)
        .bind(marks.quality_score)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
