//! # Finalizer
//!
//! Scores a finished interview.
//!
//! The transcript is rendered as a role-labelled conversation and sent with a
//! scoring rubric to the feedback model. The answer is expected to be a bare
//! JSON object, but code fences are stripped before parsing since models add
//! them anyway.
//!
//! ## Never fails:
//! - A field that is missing or has the wrong type gets its own default
//! - `overall_mark` is clamped to `0..=100` when numeric, else defaulted
//! - A failed call or unparsable answer yields [`Feedback::default`]

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::LlmConfig;
use crate::llm::{Content, GenerationRequest, GenerativeModel};
use crate::store::Turn;

const DEFAULT_ANALYSIS: &str = "Interview completed successfully.";
const DEFAULT_STRENGTH: &str = "Communication skills";
const DEFAULT_IMPROVEMENT: &str = "Technical depth";
const DEFAULT_MARK: u8 = 70;
const DEFAULT_CUTDOWN: &str = "Did not provide enough practical examples.";
const DEFAULT_TIP: &str = "Continue practicing and improving your skills.";

const ASSESSOR_INSTRUCTION: &str = "You are an expert interview assessor and career coach. \
Respond with ONLY a valid JSON object in the requested structure, without markdown or extra text.";

/// Scored feedback for one interview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub overall_analysis: String,
    pub notable_strengths: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    pub overall_mark: u8,
    pub marks_cutdown_points: Vec<String>,
    pub final_tip: String,
}

/// Feedback used when no analysis could be produced at all.
impl Default for Feedback {
    fn default() -> Self {
        Self {
            overall_analysis: "Interview completed. Unable to generate detailed analysis at this time."
                .to_string(),
            notable_strengths: vec![
                "Active participation".to_string(),
                "Professional communication".to_string(),
            ],
            areas_for_improvement: vec![
                "Technical depth".to_string(),
                "Specific examples".to_string(),
            ],
            overall_mark: 65,
            marks_cutdown_points: vec![
                "Detailed scoring was unavailable for this interview.".to_string(),
            ],
            final_tip: "Continue practicing technical skills and prepare specific examples from your experience."
                .to_string(),
        }
    }
}

/// Remove markdown code fences around a JSON answer.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```JSON"))
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .trim_end()
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

fn text_field(value: &Value, key: &str, default: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default)
        .to_string()
}

fn list_field(value: &Value, key: &str, default: &str) -> Vec<String> {
    match value.get(key).and_then(Value::as_array) {
        Some(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        None => vec![default.to_string()],
    }
}

fn mark_field(value: &Value) -> u8 {
    match value.get("overall_mark").and_then(Value::as_f64) {
        Some(mark) if mark.is_finite() => mark.round().clamp(0.0, 100.0) as u8,
        _ => DEFAULT_MARK,
    }
}

/// Feedback from a parsed model answer, defaulting each bad field.
pub fn normalize_feedback(value: &Value) -> Feedback {
    Feedback {
        overall_analysis: text_field(value, "overall_analysis", DEFAULT_ANALYSIS),
        notable_strengths: list_field(value, "notable_strengths", DEFAULT_STRENGTH),
        areas_for_improvement: list_field(value, "areas_for_improvement", DEFAULT_IMPROVEMENT),
        overall_mark: mark_field(value),
        marks_cutdown_points: list_field(value, "marks_cutdown_points", DEFAULT_CUTDOWN),
        final_tip: text_field(value, "final_tip", DEFAULT_TIP),
    }
}

/// Parse a raw model answer. `None` when it is not a JSON object.
pub fn parse_feedback(raw: &str) -> Option<Feedback> {
    match serde_json::from_str::<Value>(strip_code_fences(raw)) {
        Ok(value) if value.is_object() => Some(normalize_feedback(&value)),
        Ok(_) => None,
        Err(err) => {
            warn!(error = %err, "Feedback answer is not valid JSON");
            None
        }
    }
}

/// Transcript as `ROLE: content` lines.
pub fn render_conversation(transcript: &[Turn]) -> String {
    transcript
        .iter()
        .map(|turn| format!("{}: {}", turn.role.as_str().to_uppercase(), turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn feedback_prompt(resume_text: &str, transcript: &[Turn]) -> String {
    format!(
        "Analyze the interview conversation below and score the candidate on their actual performance.

--- INTERVIEW CONVERSATION ---
{conversation}

--- CANDIDATE RESUME ---
{resume_text}

--- OUTPUT ---
Respond with this JSON object only:
{{
  \"overall_analysis\": \"2-3 sentence summary of performance and role readiness\",
  \"notable_strengths\": [\"Strength 1\", \"Strength 2\", \"Strength 3\"],
  \"areas_for_improvement\": [\"Weakness 1\", \"Weakness 2\", \"Weakness 3\"],
  \"overall_mark\": <integer 0-100>,
  \"marks_cutdown_points\": [\"Specific reason a mark was deducted\", \"...\"],
  \"final_tip\": \"One actionable suggestion\"
}}

SCORING (out of 100): 90-100 exceptional, 80-89 strong, 70-79 good, 60-69 average, 50-59 weak, below 50 not ready.
Base the mark only on what the conversation shows. Tie every cutdown point to a specific answer.",
        conversation = render_conversation(transcript),
    )
}

/// Generates end-of-interview feedback with the configured model.
#[derive(Clone)]
pub struct Finalizer {
    model: Arc<dyn GenerativeModel>,
    model_name: String,
}

impl Finalizer {
    pub fn new(model: Arc<dyn GenerativeModel>, config: &LlmConfig) -> Self {
        Self {
            model,
            model_name: config.feedback_model.clone(),
        }
    }

    pub fn request(&self, resume_text: &str, transcript: &[Turn]) -> GenerationRequest {
        GenerationRequest {
            model: self.model_name.clone(),
            system_instruction: Some(ASSESSOR_INSTRUCTION.to_string()),
            contents: vec![Content::text("user", feedback_prompt(resume_text, transcript))],
            generation_config: None,
        }
    }

    pub async fn generate(&self, resume_text: &str, transcript: &[Turn]) -> Feedback {
        let request = self.request(resume_text, transcript);
        let raw = match self.model.generate_text(request).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "Feedback generation failed, using default feedback");
                return Feedback::default();
            }
        };

        match parse_feedback(&raw) {
            Some(feedback) => {
                info!(
                    overall_mark = feedback.overall_mark,
                    turns = transcript.len(),
                    "Interview feedback generated"
                );
                feedback
            }
            None => Feedback::default(),
        }
    }
}
