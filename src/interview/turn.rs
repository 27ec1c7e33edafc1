//! # Turn Engine
//!
//! Produces the interviewer's next utterance from the conversation so far.
//!
//! ## How a turn is generated:
//! 1. The transcript is mapped to model roles (`user` stays `user`, `ai`
//!    becomes `model`)
//! 2. A system instruction is assembled from the interview configuration,
//!    the resume, and the time window
//! 3. One bounded, low-temperature generation call is issued
//! 4. The first text part of the response is returned as-is
//!
//! ## Termination:
//! The model ends the interview by answering with [`TERMINATION_SENTINEL`].
//! The sentinel is passed through to the client untouched.
//!
//! ## Failure handling:
//! Any failure (transport, missing key, unrecognized response shape) is
//! logged and replaced by a fixed apology in the interview language.

use std::sync::Arc;
use tracing::{debug, error};

use crate::config::LlmConfig;
use crate::interview::timing::TimingWindow;
use crate::llm::{Content, GenerationConfig, GenerationRequest, GenerativeModel};
use crate::store::{InterviewDetails, Role, Turn};

pub const TERMINATION_SENTINEL: &str = "[END]";

const DEFAULT_LANGUAGE: &str = "English";
const DEFAULT_INTERVIEWER_ROLE: &str = "Professional Interviewer";
const DEFAULT_JOB_POSITION: &str = "Software Developer";
const DEFAULT_LEVEL: &str = "Intermediate";

/// Apology per interview language. Languages not listed get
/// [`FALLBACK_APOLOGY`].
const APOLOGIES: &[(&str, &str)] = &[(
    "English",
    "Due to some issues, I couldn’t understand this properly. Could you please repeat the answer?",
)];

const FALLBACK_APOLOGY: &str = "कुछ समस्या के कारण मैं इसे ठीक से समझ नहीं पाया, क्या आप कृपया इसका उत्तर दोबारा बता सकते हैं?";

/// Apology returned when a turn cannot be generated.
pub fn apology(language: &str) -> &'static str {
    APOLOGIES
        .iter()
        .find(|(name, _)| *name == language)
        .map(|(_, text)| *text)
        .unwrap_or(FALLBACK_APOLOGY)
}

/// Whether the utterance ends the interview.
pub fn is_termination(utterance: &str) -> bool {
    utterance.contains(TERMINATION_SENTINEL)
}

/// Everything one turn is generated from.
pub struct TurnContext<'a> {
    pub history: &'a [Turn],
    pub resume_text: &'a str,
    pub details: &'a InterviewDetails,
    pub window: &'a TimingWindow,
    pub current_time: &'a str,
}

impl TurnContext<'_> {
    pub fn language(&self) -> &str {
        non_empty(self.details.language.as_deref()).unwrap_or(DEFAULT_LANGUAGE)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn model_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Ai => "model",
    }
}

/// Transcript in the model's conversation format.
pub fn build_history(turns: &[Turn]) -> Vec<Content> {
    turns
        .iter()
        .map(|turn| Content::text(model_role(turn.role), turn.content.clone()))
        .collect()
}

/// System instruction for one turn.
pub fn build_system_instruction(ctx: &TurnContext<'_>) -> String {
    let details = ctx.details;
    let role = non_empty(details.interviewer_role.as_deref()).unwrap_or(DEFAULT_INTERVIEWER_ROLE);
    let position = non_empty(details.job_position.as_deref()).unwrap_or(DEFAULT_JOB_POSITION);
    let level = non_empty(details.level.as_deref()).unwrap_or(DEFAULT_LEVEL);
    let skills = if details.skills.is_empty() {
        "[SKILLS]".to_string()
    } else {
        details.skills.join(", ")
    };
    let questions = if details.questions.is_empty() {
        "[MANDATORY_QUESTIONS]".to_string()
    } else {
        details
            .questions
            .iter()
            .enumerate()
            .map(|(i, q)| format!("{}. {}", i + 1, q))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let description = non_empty(details.job_description.as_deref()).unwrap_or("[JOB_DESCRIPTION]");
    let resume = non_empty(Some(ctx.resume_text)).unwrap_or("[RESUME_CONTENT]");
    let qualification = non_empty(details.minimum_qualification.as_deref()).unwrap_or("not specified");
    let minimum_skills = non_empty(details.minimum_skills.as_deref()).unwrap_or("not specified");
    let language = ctx.language();

    format!(
        "### ROLE
You are a senior {role} interviewing a candidate for the {level} position \"{position}\". \
Speak like an experienced human interviewer: acknowledge each answer briefly, then ask one clear question.

### LANGUAGE
Speak ONLY in {language}. Plain text only, no markdown or lists; your reply is read aloud.

### CONTEXT
- Candidate resume: {resume}
- Job description: {description}
- Skills to probe: {skills}
- Minimum qualification: {qualification}
- Minimum skills: {minimum_skills}
- Mandatory questions (ask each at a natural point):
{questions}

### TIME
- Started: {start} | Ends: {end} | Current time: {current}
- When the current time reaches the end time, say the time is up and ask whether the candidate has final questions.
- If the candidate asks to stop, confirm once; if they insist, reply with exactly {sentinel}.
- When the interview is over, reply with exactly {sentinel}.
",
        start = ctx.window.start_time,
        end = ctx.window.end_time,
        current = ctx.current_time,
        sentinel = TERMINATION_SENTINEL,
    )
}

/// Generates interviewer turns with the configured model.
#[derive(Clone)]
pub struct TurnEngine {
    model: Arc<dyn GenerativeModel>,
    model_name: String,
    generation_config: GenerationConfig,
}

impl TurnEngine {
    pub fn new(model: Arc<dyn GenerativeModel>, config: &LlmConfig) -> Self {
        Self {
            model,
            model_name: config.turn_model.clone(),
            generation_config: GenerationConfig {
                temperature: Some(config.turn_temperature),
                top_k: Some(1),
                top_p: Some(1.0),
                max_output_tokens: Some(config.turn_max_output_tokens),
            },
        }
    }

    pub fn request(&self, ctx: &TurnContext<'_>) -> GenerationRequest {
        GenerationRequest {
            model: self.model_name.clone(),
            system_instruction: Some(build_system_instruction(ctx)),
            contents: build_history(ctx.history),
            generation_config: Some(self.generation_config.clone()),
        }
    }

    /// The interviewer's reply to the latest turn. Never fails: errors
    /// become the language's apology.
    pub async fn next_utterance(&self, ctx: TurnContext<'_>) -> String {
        let request = self.request(&ctx);
        match self.model.generate_text(request).await {
            Ok(text) => {
                debug!(
                    chars = text.len(),
                    terminated = is_termination(&text),
                    "Generated interviewer turn"
                );
                text
            }
            Err(err) => {
                error!(error = %err, language = ctx.language(), "Turn generation failed");
                apology(ctx.language()).to_string()
            }
        }
    }
}
