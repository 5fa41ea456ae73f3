//! Visit ledger contract between the fetch layer and the persistence adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Everything one fetch attempt learned about a URL, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitOutcome {
    pub http_status: Option<u16>,
    pub response_time_ms: u64,
    pub content_type: Option<String>,
    pub content_size_bytes: Option<u64>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub extraction_success: bool,
    pub schedule_data_found: bool,
    pub schedule_keywords_count: u32,
    /// 0.00–1.00 content quality estimate, when one was computed.
    pub quality_score: Option<f64>,
    pub fetched_at: DateTime<Utc>,
}

impl VisitOutcome {
    /// A visit that produced usable content advances `last_successful_visit`.
    pub fn is_usable(&self) -> bool {
        self.error_type.is_none()
            && matches!(self.http_status, Some(status) if (200..300).contains(&status))
    }

    pub fn failure(error_type: &str, message: &str, elapsed_ms: u64) -> Self {
        Self {
            http_status: None,
            response_time_ms: elapsed_ms,
            content_type: None,
            content_size_bytes: None,
            error_type: Some(error_type.to_string()),
            error_message: Some(message.to_string()),
            extraction_success: false,
            schedule_data_found: false,
            schedule_keywords_count: 0,
            quality_score: None,
            fetched_at: Utc::now(),
        }
    }
}

/// Extraction-stage findings for an already-recorded visit. Written after
/// content analysis; never touches `visit_count`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExtractionMarks {
    pub extraction_success: bool,
    pub schedule_data_found: bool,
    pub schedule_keywords_count: u32,
    pub quality_score: Option<f64>,
}

/// Sink for visit results. Implemented by the persistence adapter; every
/// fetch (success or failure) is recorded through it.
#[async_trait]
pub trait VisitSink: Send + Sync {
    async fn record_visit(&self, parish_id: i64, url: &str, outcome: &VisitOutcome) -> Result<()>;

    /// Update extraction flags on the ledger row for `(parish_id, url)`.
    async fn record_extraction(
        &self,
        parish_id: i64,
        url: &str,
        marks: &ExtractionMarks,
    ) -> Result<()>;
}
