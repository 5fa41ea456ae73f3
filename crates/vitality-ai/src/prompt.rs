//! Prompt building and response parsing for schedule extraction.

use vitality_core::{AiSchedule, FactType, PipelineError, Result};

/// Page text beyond this is noise for the model and cost for us.
const MAX_PAGE_CHARS: usize = 12_000;

pub const SYSTEM_PROMPT: &str = r#"You are an expert at reading Catholic parish websites. Your task is to extract a specific kind of recurring schedule from page text.

Respond with ONLY a JSON object of this exact shape, no explanation:
{
  "has_weekly_schedule": <bool, true only if the page states a recurring schedule of the requested kind>,
  "days_offered": [<weekday names, e.g. "Saturday">],
  "times": [<time ranges as printed, e.g. "3:00 PM - 4:00 PM">],
  "frequency": "weekly" | "biweekly" | "monthly" | "irregular" | "unknown",
  "appointment_required": <bool>,
  "schedule_details": "<one-sentence summary of the schedule as stated>",
  "confidence": <int 0-100, how certain you are the extracted schedule is correct and current>
}

Rules:
1. Extract only the requested schedule type. Mass times are NOT confession times.
2. If the page only says "call for an appointment", set appointment_required true and has_weekly_schedule false.
3. Never invent days or times that are not printed on the page.
4. confidence reflects textual evidence, not hope. A bare mention scores low."#;

/// Build the user prompt for one parish page and schedule type.
pub fn build_user_prompt(
    parish_name: &str,
    schedule_type: FactType,
    page_url: &str,
    page_text: &str,
) -> String {
    let wanted = match schedule_type {
        FactType::ReconciliationSchedule => "Reconciliation (Confession) schedule",
        FactType::AdorationSchedule => "Eucharistic Adoration schedule",
        FactType::MassSchedule => "Mass schedule",
    };
    let mut text = page_text;
    if text.len() > MAX_PAGE_CHARS {
        let mut end = MAX_PAGE_CHARS;
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        text = &text[..end];
    }
    format!(
        "## Parish\n{parish_name}\n\n## Page URL\n{page_url}\n\n## Requested schedule\n{wanted}\n\n## Page text\n{text}"
    )
}

/// Repair prompt for a response that did not parse.
pub fn build_repair_prompt(previous_response: &str) -> String {
    let mut previous = previous_response;
    if previous.len() > 2_000 {
        let mut end = 2_000;
        while end > 0 && !previous.is_char_boundary(end) {
            end -= 1;
        }
        previous = &previous[..end];
    }
    format!(
        "Your previous response could not be parsed as the required JSON object:\n\n{previous}\n\nRespond again with ONLY the JSON object, no markdown fences, no commentary."
    )
}

/// Parse the model response into an [`AiSchedule`], tolerating markdown code
/// fences around the JSON.
pub fn parse_schedule_response(response: &str) -> Result<AiSchedule> {
    let json_str = if response.contains("```json") {
        response
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .unwrap_or(response)
    } else if response.contains("```") {
        response
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .unwrap_or(response)
    } else {
        response.trim()
    };

    let mut schedule: AiSchedule = serde_json::from_str(json_str)
        .map_err(|e| PipelineError::InvalidOutput(format!("schedule json: {e}")))?;
    schedule.confidence = schedule.confidence.min(100);
    Ok(schedule)
}
