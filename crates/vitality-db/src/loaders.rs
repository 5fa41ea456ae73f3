//! Read-side queries: configuration, work selection and reporting.

use sqlx::Row;

use vitality_core::{Parish, ParishDirectory, DetectedBy, Result, ScheduleKeyword, SuppressionUrl};

use crate::store::PgStore;

/// Aggregates for the lead worker's periodic report.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ReportingSummary {
    pub dioceses: i64,
    pub dioceses_with_directory: i64,
    pub parishes: i64,
    pub parishes_with_website: i64,
    pub facts_total: i64,
    pub facts_last_day: i64,
    pub urls_visited: i64,
    pub urls_blocked: i64,
}

impl PgStore {
    /// Schedule keyword configuration; reloaded on worker start and on the
    /// refresh interval.
    pub async fn load_schedule_keywords(&self) -> Result<Vec<ScheduleKeyword>> {
        let rows = sqlx::query(
            "SELECT schedule_type, keyword, negative FROM schedule_keywords ORDER BY keyword",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| ScheduleKeyword {
                schedule_type: r.get("schedule_type"),
                keyword: r.get("keyword"),
                negative: r.get("negative"),
            })
            .collect())
    }

    pub async fn load_suppression_urls(&self) -> Result<Vec<SuppressionUrl>> {
        let rows =
            sqlx::query("SELECT url, reason, added_at FROM suppression_urls ORDER BY added_at")
                .fetch_all(self.pool())
                .await?;
        Ok(rows
            .into_iter()
            .map(|r| SuppressionUrl {
                url: r.get("url"),
                reason: r.get("reason"),
                added_at: r.get("added_at"),
            })
            .collect())
    }

    /// Dioceses the discovery role still has work on: no directory row, or a
    /// directory probe that previously came up empty.
    pub async fn dioceses_missing_directory(&self, limit: i64) -> Result<Vec<(i64, String, String)>> {
        let rows = sqlx::query(
            "SELECT d.diocese_id, d.name, d.website_url
             FROM dioceses d
             LEFT JOIN parish_directories pd ON pd.diocese_id = d.diocese_id
             WHERE pd.diocese_id IS NULL OR pd.found = false
             ORDER BY d.diocese_id
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get("diocese_id"), r.get("name"), r.get("website_url")))
            .collect())
    }

    pub async fn directory_for(&self, diocese_id: i64) -> Result<Option<ParishDirectory>> {
        let row = sqlx::query(
            "SELECT diocese_id, directory_url, found, detected_by
             FROM parish_directories WHERE diocese_id = $1",
        )
        .bind(diocese_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|r| ParishDirectory {
            diocese_id: r.get("diocese_id"),
            directory_url: r.get("directory_url"),
            found: r.get("found"),
            detected_by: parse_detected_by(r.get::<String, _>("detected_by").as_str()),
        }))
    }

    /// Parish batch for the schedule role, in priority order:
    /// 1. never looked at (no facts, no ledger rows);
    /// 2. stale facts, or visited long ago with nothing extracted;
    /// 3. recently visited without a single successful fetch (retry last).
    /// Parishes with fresh facts are excluded, as are suppressed hosts.
    pub async fn select_parishes_for_schedule(
        &self,
        limit: i64,
        stale_after_days: i64,
        suppressed_hosts: &[String],
    ) -> Result<Vec<Parish>> {
        let rows = sqlx::query(
            "WITH ranked AS (
                 SELECT p.*,
                        (SELECT max(f.created_at) FROM parish_data f
                         WHERE f.parish_id = p.parish_id) AS last_fact,
                        (SELECT max(u.visited_at) FROM discovered_urls u
                         WHERE u.parish_id = p.parish_id) AS last_visit,
                        (SELECT max(u.last_successful_visit) FROM discovered_urls u
                         WHERE u.parish_id = p.parish_id) AS last_success
                 FROM parishes p
                 WHERE p.website_url IS NOT NULL
             )
             SELECT parish_id, diocese_id, name, street, city, state, postal_code,
                    website_url, phone, extraction_method,
                    CASE
                        WHEN last_fact IS NULL AND last_visit IS NULL THEN 0
                        WHEN last_fact IS NOT NULL
                             AND last_fact < now() - make_interval(days => $2::int) THEN 1
                        WHEN last_fact IS NULL AND last_visit < now() - interval '7 days' THEN 1
                        WHEN last_success IS NULL
                             AND last_visit >= now() - interval '7 days' THEN 2
                    END AS priority
             FROM ranked
             WHERE (last_fact IS NULL OR last_fact < now() - make_interval(days => $2::int))
               AND NOT EXISTS (
                   SELECT 1 FROM unnest($3::text[]) AS h
                   WHERE ranked.website_url ILIKE '%//' || h || '%'
                      OR ranked.website_url ILIKE '%.' || h || '%'
               )
             ORDER BY priority NULLS LAST, parish_id ASC
             LIMIT $1",
        )
        .bind(limit)
        .bind(stale_after_days)
        .bind(suppressed_hosts)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(parish_from_row).collect())
    }

    pub async fn reporting_summary(&self) -> Result<ReportingSummary> {
        let row = sqlx::query(
            "SELECT
                 (SELECT count(*) FROM dioceses) AS dioceses,
                 (SELECT count(*) FROM parish_directories WHERE found) AS dioceses_with_directory,
                 (SELECT count(*) FROM parishes) AS parishes,
                 (SELECT count(*) FROM parishes WHERE website_url IS NOT NULL) AS parishes_with_website,
                 (SELECT count(*) FROM parish_data) AS facts_total,
                 (SELECT count(*) FROM parish_data
                  WHERE created_at > now() - interval '1 day') AS facts_last_day,
                 (SELECT count(*) FROM discovered_urls WHERE visited_at IS NOT NULL) AS urls_visited,
                 (SELECT count(*) FROM discovered_urls WHERE error_type = 'blocked') AS urls_blocked",
        )
        .fetch_one(self.pool())
        .await?;
        Ok(ReportingSummary {
            dioceses: row.get("dioceses"),
            dioceses_with_directory: row.get("dioceses_with_directory"),
            parishes: row.get("parishes"),
            parishes_with_website: row.get("parishes_with_website"),
            facts_total: row.get("facts_total"),
            facts_last_day: row.get("facts_last_day"),
            urls_visited: row.get("urls_visited"),
            urls_blocked: row.get("urls_blocked"),
        })
    }
}

fn parish_from_row(r: sqlx::postgres::PgRow) -> Parish {
    Parish {
        parish_id: r.get("parish_id"),
        diocese_id: r.get("diocese_id"),
        name: r.get("name"),
        street: r.get("street"),
        city: r.get("city"),
        state: r.get("state"),
        postal_code: r.get("postal_code"),
        website_url: r.get("website_url"),
        phone: r.get("phone"),
        extraction_method: r.get("extraction_method"),
    }
}

fn parse_detected_by(value: &str) -> DetectedBy {
    match value {
        "ai" => DetectedBy::Ai,
        "search_fallback" => DetectedBy::SearchFallback,
        "manual_override" => DetectedBy::ManualOverride,
        _ => DetectedBy::Heuristic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detected_by_round_trips_wire_names() {
        for variant in [
            DetectedBy::Heuristic,
            DetectedBy::Ai,
            DetectedBy::SearchFallback,
            DetectedBy::ManualOverride,
        ] {
            assert_eq!(parse_detected_by(variant.as_str()), variant);
        }
    }

    #[test]
    fn unknown_detected_by_defaults_to_heuristic() {
        assert_eq!(parse_detected_by("weird"), DetectedBy::Heuristic);
    }
}
