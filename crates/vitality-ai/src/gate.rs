//! Adaptive confidence gate around the AI extractor.
//!
//! The gate decides, per URL and page, how much confidence to demand from
//! the model before a schedule is persisted, and owns the retry discipline
//! for rate limits and malformed output.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use vitality_breaker::BreakerRegistry;
use vitality_core::{
    AiSchedule, ExtractionMethod, FactType, KeywordSets, ParishData, PipelineError, Result,
};

use crate::client::ScheduleExtractor;
use crate::prompt::{build_repair_prompt, build_user_prompt, parse_schedule_response, SYSTEM_PROMPT};

const BASE_THRESHOLD: i16 = 15;
const THRESHOLD_FLOOR: i16 = 3;
const THRESHOLD_CEILING: i16 = 60;

/// Compute the acceptance threshold for one page. URL and content signals
/// lower the bar where schedule data is likely and raise it on promotional
/// pages.
pub fn adaptive_threshold(url: &Url, page_text: &str, keywords: &KeywordSets) -> u8 {
    let host = url.host_str().unwrap_or("");
    let path = url.path();
    let mut threshold = BASE_THRESHOLD;

    if keywords.is_cathedral(host) || keywords.is_cathedral(path) {
        threshold -= 10;
    }
    if keywords.is_dedicated_schedule_path(path) {
        threshold -= 7;
    }
    if keywords.count_schedule_keywords(page_text) >= 3 {
        threshold -= 5;
    }
    if keywords.is_promotional_path(path) {
        threshold += 10;
    }

    threshold.clamp(THRESHOLD_FLOOR, THRESHOLD_CEILING) as u8
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Attempts against the model when it rate-limits us.
    pub max_attempts: u32,
    /// Base for the `2^n` rate-limit backoff.
    pub backoff_base: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff_base: Duration::from_secs(1),
        }
    }
}

pub struct ConfidenceGate {
    extractor: Arc<dyn ScheduleExtractor>,
    breakers: Arc<BreakerRegistry>,
    config: GateConfig,
    cancel: CancellationToken,
}

impl ConfidenceGate {
    pub fn new(
        extractor: Arc<dyn ScheduleExtractor>,
        breakers: Arc<BreakerRegistry>,
        config: GateConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            extractor,
            breakers,
            config,
            cancel,
        }
    }

    /// Run extraction for one schedule type against one page. Returns the
    /// accepted schedule, or `None` when the model's answer did not clear
    /// the gate (no row is written in that case; the visit still counts).
    pub async fn extract(
        &self,
        parish_name: &str,
        schedule_type: FactType,
        page_url: &Url,
        page_text: &str,
        keywords: &KeywordSets,
    ) -> Result<Option<AiSchedule>> {
        let threshold = adaptive_threshold(page_url, page_text, keywords);
        let user_prompt =
            build_user_prompt(parish_name, schedule_type, page_url.as_str(), page_text);

        let response = self.generate_with_retries(&user_prompt).await?;
        let schedule = match parse_schedule_response(&response) {
            Ok(schedule) => schedule,
            Err(first_err) => {
                // One repair round, then give up on this page.
                debug!("repairing unparseable model output: {}", first_err);
                let repair = build_repair_prompt(&response);
                let repaired = self.generate_with_retries(&repair).await?;
                match parse_schedule_response(&repaired) {
                    Ok(schedule) => schedule,
                    Err(second_err) => {
                        warn!(
                            "model output unparseable after repair for {}: {}",
                            page_url, second_err
                        );
                        return Ok(None);
                    }
                }
            }
        };

        if accepts(&schedule, threshold) {
            info!(
                "accepted {:?} for '{}' at confidence {} (threshold {})",
                schedule_type, parish_name, schedule.confidence, threshold
            );
            Ok(Some(schedule))
        } else {
            debug!(
                "rejected {:?} for '{}': confidence {} vs threshold {}, weekly={}",
                schedule_type,
                parish_name,
                schedule.confidence,
                threshold,
                schedule.has_weekly_schedule
            );
            Ok(None)
        }
    }

    async fn generate_with_retries(&self, user_prompt: &str) -> Result<String> {
        let mut attempt: u32 = 0;
        loop {
            let call = self
                .breakers
                .guard("ai_content_analysis", async {
                    self.extractor.generate(SYSTEM_PROMPT, user_prompt).await
                })
                .await;
            match call {
                Ok(text) => return Ok(text),
                Err(PipelineError::ResourceExhausted(msg))
                    if attempt + 1 < self.config.max_attempts =>
                {
                    let backoff = self.config.backoff_base * 2u32.pow(attempt);
                    debug!("ai rate limited ({}), backing off {:?}", msg, backoff);
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// The acceptance predicate: confident enough, a stated weekly schedule, and
/// at least one concrete day or time.
fn accepts(schedule: &AiSchedule, threshold: u8) -> bool {
    schedule.confidence >= threshold
        && schedule.has_weekly_schedule
        && (!schedule.days_offered.is_empty() || !schedule.times.is_empty())
}

/// Materialize an accepted schedule as the ParishData row to append.
pub fn to_parish_data(
    parish_id: i64,
    schedule_type: FactType,
    source_url: &Url,
    schedule: &AiSchedule,
) -> ParishData {
    ParishData {
        parish_id,
        fact_type: schedule_type,
        fact_value: schedule.schedule_details.clone(),
        fact_source_url: source_url.to_string(),
        extraction_method: ExtractionMethod::AiGemini,
        confidence_score: Some(schedule.confidence as i16),
        ai_structured_data: serde_json::to_value(schedule).ok(),
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn kw() -> KeywordSets {
        KeywordSets::default()
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn threshold_base_is_fifteen() {
        assert_eq!(adaptive_threshold(&url("https://p.example/info"), "", &kw()), 15);
    }

    #[test]
    fn threshold_drops_for_cathedral_and_schedule_pages() {
        assert_eq!(
            adaptive_threshold(&url("https://cathedral.example/page"), "", &kw()),
            5
        );
        assert_eq!(
            adaptive_threshold(&url("https://p.example/mass-times"), "", &kw()),
            8
        );
        // Cathedral + dedicated + keyword-rich page bottoms out at the floor.
        let text = "mass confession adoration hours";
        assert_eq!(
            adaptive_threshold(&url("https://cathedral.example/mass-times"), text, &kw()),
            3
        );
    }

    #[test]
    fn threshold_rises_on_promotional_pages() {
        assert_eq!(
            adaptive_threshold(&url("https://p.example/events"), "", &kw()),
            25
        );
        // A promotional path that also carries schedule tokens is not
        // penalized.
        assert_eq!(
            adaptive_threshold(&url("https://p.example/events/mass-schedule"), "", &kw()),
            8
        );
    }

    fn schedule(confidence: u8) -> AiSchedule {
        AiSchedule {
            has_weekly_schedule: true,
            days_offered: vec!["Saturday".to_string()],
            times: vec![],
            frequency: vitality_core::Frequency::Weekly,
            appointment_required: false,
            schedule_details: "Saturdays".to_string(),
            confidence,
        }
    }

    #[test]
    fn acceptance_boundary_is_inclusive() {
        assert!(!accepts(&schedule(14), 15));
        assert!(accepts(&schedule(15), 15));
    }

    #[test]
    fn acceptance_requires_weekly_and_concrete_days_or_times() {
        let mut s = schedule(90);
        s.has_weekly_schedule = false;
        assert!(!accepts(&s, 15));

        let mut s = schedule(90);
        s.days_offered.clear();
        s.times.clear();
        assert!(!accepts(&s, 15));

        let mut s = schedule(90);
        s.days_offered.clear();
        s.times = vec!["3pm".to_string()];
        assert!(accepts(&s, 15));
    }

    struct ScriptedModel {
        responses: Mutex<Vec<Result<String>>>,
        calls: AtomicU32,
    }

    impl ScriptedModel {
        fn new(responses: Vec<Result<String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ScheduleExtractor for ScriptedModel {
        async fn generate(&self, _system: &str, _user: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses.lock().unwrap().remove(0)
        }
    }

    const GOOD: &str = r#"{"has_weekly_schedule": true, "days_offered": ["Saturday"],
        "times": ["15:00"], "frequency": "weekly", "appointment_required": false,
        "schedule_details": "Sat 3pm", "confidence": 72}"#;

    fn gate(model: ScriptedModel) -> (ConfidenceGate, Arc<ScriptedModel>) {
        let model = Arc::new(model);
        let gate = ConfidenceGate::new(
            model.clone(),
            Arc::new(BreakerRegistry::new()),
            GateConfig {
                max_attempts: 4,
                backoff_base: Duration::from_millis(1),
            },
            CancellationToken::new(),
        );
        (gate, model)
    }

    #[tokio::test]
    async fn accepted_result_comes_back() {
        let (gate, _) = gate(ScriptedModel::new(vec![Ok(GOOD.to_string())]));
        let out = gate
            .extract(
                "St. Mary",
                FactType::ReconciliationSchedule,
                &url("https://p.example/confession"),
                "Confession Saturday 3pm",
                &kw(),
            )
            .await
            .unwrap();
        assert_eq!(out.unwrap().confidence, 72);
    }

    #[tokio::test]
    async fn low_confidence_is_rejected_not_errored() {
        let low = GOOD.replace("72", "9");
        let (gate, _) = gate(ScriptedModel::new(vec![Ok(low)]));
        let out = gate
            .extract(
                "St. Mary",
                FactType::ReconciliationSchedule,
                &url("https://p.example/info"),
                "",
                &kw(),
            )
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn invalid_output_gets_one_repair_round() {
        let (gate, model) = gate(ScriptedModel::new(vec![
            Ok("The schedule is on Saturdays.".to_string()),
            Ok(GOOD.to_string()),
        ]));
        let out = gate
            .extract(
                "St. Mary",
                FactType::MassSchedule,
                &url("https://p.example/mass"),
                "",
                &kw(),
            )
            .await
            .unwrap();
        assert!(out.is_some());
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_parse_failure_returns_none() {
        let (gate, model) = gate(ScriptedModel::new(vec![
            Ok("nope".to_string()),
            Ok("still nope".to_string()),
        ]));
        let out = gate
            .extract(
                "St. Mary",
                FactType::MassSchedule,
                &url("https://p.example/mass"),
                "",
                &kw(),
            )
            .await
            .unwrap();
        assert!(out.is_none());
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rate_limits_back_off_and_retry() {
        let (gate, model) = gate(ScriptedModel::new(vec![
            Err(PipelineError::ResourceExhausted("quota".to_string())),
            Err(PipelineError::ResourceExhausted("quota".to_string())),
            Ok(GOOD.to_string()),
        ]));
        let out = gate
            .extract(
                "St. Mary",
                FactType::AdorationSchedule,
                &url("https://p.example/adoration"),
                "",
                &kw(),
            )
            .await
            .unwrap();
        assert!(out.is_some());
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rate_limit_exhaustion_surfaces() {
        let exhausted = || Err(PipelineError::ResourceExhausted("quota".to_string()));
        let (gate, model) = gate(ScriptedModel::new(vec![
            exhausted(),
            exhausted(),
            exhausted(),
            exhausted(),
        ]));
        let out = gate
            .extract(
                "St. Mary",
                FactType::AdorationSchedule,
                &url("https://p.example/adoration"),
                "",
                &kw(),
            )
            .await;
        assert!(matches!(out, Err(PipelineError::ResourceExhausted(_))));
        assert_eq!(model.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn parish_data_row_carries_full_payload() {
        let s = schedule(72);
        let row = to_parish_data(
            5,
            FactType::ReconciliationSchedule,
            &url("https://p.example/confession"),
            &s,
        );
        assert_eq!(row.extraction_method, ExtractionMethod::AiGemini);
        assert_eq!(row.confidence_score, Some(72));
        let payload = row.ai_structured_data.unwrap();
        let back: AiSchedule = serde_json::from_value(payload).unwrap();
        assert_eq!(back, s);
    }
}
