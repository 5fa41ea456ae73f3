//! Persistent entities and their wire-name enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An administrative region with a canonical website; root of the data
/// hierarchy. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diocese {
    pub diocese_id: i64,
    pub name: String,
    pub address: Option<String>,
    pub website_url: String,
}

/// How a parish directory page was located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectedBy {
    Heuristic,
    Ai,
    SearchFallback,
    ManualOverride,
}

impl DetectedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectedBy::Heuristic => "heuristic",
            DetectedBy::Ai => "ai",
            DetectedBy::SearchFallback => "search_fallback",
            DetectedBy::ManualOverride => "manual_override",
        }
    }
}

/// The page on a diocese website that lists its parishes. One per diocese.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParishDirectory {
    pub diocese_id: i64,
    pub directory_url: String,
    pub found: bool,
    pub detected_by: DetectedBy,
}

/// A leaf unit belonging to one diocese, with its own website and schedules.
///
/// Deduped on `(diocese_id, normalized_name, normalized_street)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Parish {
    pub parish_id: i64,
    pub diocese_id: i64,
    pub name: String,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub website_url: Option<String>,
    pub phone: Option<String>,
    pub extraction_method: Option<String>,
}

/// Kinds of schedule facts the pipeline extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FactType {
    ReconciliationSchedule,
    AdorationSchedule,
    MassSchedule,
}

impl FactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactType::ReconciliationSchedule => "ReconciliationSchedule",
            FactType::AdorationSchedule => "AdorationSchedule",
            FactType::MassSchedule => "MassSchedule",
        }
    }

    pub const ALL: [FactType; 3] = [
        FactType::ReconciliationSchedule,
        FactType::AdorationSchedule,
        FactType::MassSchedule,
    ];
}

/// How a schedule fact was extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    KeywordBased,
    KeywordBasedSimple,
    AiGemini,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::KeywordBased => "keyword_based",
            ExtractionMethod::KeywordBasedSimple => "keyword_based_simple",
            ExtractionMethod::AiGemini => "ai_gemini",
        }
    }
}

/// A single time-stamped schedule fact. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParishData {
    pub parish_id: i64,
    pub fact_type: FactType,
    pub fact_value: String,
    pub fact_source_url: String,
    pub extraction_method: ExtractionMethod,
    /// 0–100; None when the extraction was not AI-based.
    pub confidence_score: Option<i16>,
    /// Full AI payload, stored verbatim when `extraction_method` is AI.
    pub ai_structured_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Visit ledger row: the durable record of every fetch against a parish URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredUrl {
    pub parish_id: i64,
    pub url: String,
    /// Discovery score, 0–100. Written on first sight, stable thereafter.
    pub score: i16,
    pub visited_at: Option<DateTime<Utc>>,
    pub http_status: Option<i16>,
    pub response_time_ms: Option<i64>,
    pub content_type: Option<String>,
    pub content_size_bytes: Option<i64>,
    pub extraction_success: bool,
    pub schedule_data_found: bool,
    pub schedule_keywords_count: i32,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    /// 0.00–1.00 content quality estimate.
    pub quality_score: Option<f64>,
    pub visit_count: i32,
    pub last_successful_visit: Option<DateTime<Utc>>,
}

/// An origin or URL the fetcher must never touch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionUrl {
    pub url: String,
    pub reason: Option<String>,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Active,
    Inactive,
    Failed,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Active => "active",
            WorkerStatus::Inactive => "inactive",
            WorkerStatus::Failed => "failed",
        }
    }
}

/// A registered pipeline worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineWorker {
    pub worker_id: String,
    pub pod_name: String,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub assigned_dioceses: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Processing,
    Completed,
    Failed,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Processing => "processing",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Failed => "failed",
        }
    }
}

/// The exclusive lease of a diocese to one worker for one extraction cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DioceseWorkAssignment {
    pub id: Uuid,
    pub diocese_id: i64,
    pub worker_id: String,
    pub status: AssignmentStatus,
    pub assigned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
}

/// How often a schedule repeats, as reported by the AI extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Weekly,
    Biweekly,
    Monthly,
    Irregular,
    #[serde(other)]
    Unknown,
}

/// The structured result the AI extractor returns for one schedule type.
///
/// Serialized verbatim into `ParishData.ai_structured_data` when accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiSchedule {
    pub has_weekly_schedule: bool,
    #[serde(default)]
    pub days_offered: Vec<String>,
    #[serde(default)]
    pub times: Vec<String>,
    #[serde(default = "default_frequency")]
    pub frequency: Frequency,
    #[serde(default)]
    pub appointment_required: bool,
    #[serde(default)]
    pub schedule_details: String,
    pub confidence: u8,
}

fn default_frequency() -> Frequency {
    Frequency::Unknown
}

/// Stable diocese identifier derived from the canonical website host, so
/// every worker seeds the same row regardless of which one sees the
/// registry first.
pub fn stable_diocese_id(host: &str) -> i64 {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(host.trim().to_ascii_lowercase().as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (i64::from_be_bytes(bytes) & i64::MAX).max(1)
}

/// Normalize a parish name or street for the dedupe key: lowercase, strip
/// punctuation, collapse whitespace.
pub fn normalize_field(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_space = true;
    for c in value.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}
