//! AI schedule extraction: the Gemini client, prompt orchestration and the
//! adaptive confidence gate deciding which results are persisted.

mod client;
mod gate;
mod prompt;

pub use client::{GeminiClient, ScheduleExtractor};
pub use gate::{adaptive_threshold, to_parish_data, ConfidenceGate, GateConfig};
pub use prompt::{build_repair_prompt, build_user_prompt, parse_schedule_response, SYSTEM_PROMPT};
