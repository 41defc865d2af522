use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::session::{DiagnosisResult, Session, Turn};

const REASONING_TIMEOUT: Duration = Duration::from_secs(60);

const CONSULTATION_PREAMBLE: &str = r#"You are an experienced physician conducting a structured
intake consultation. The conversation history contains everything the patient has reported so
far, including transcribed voice notes and findings extracted from images.

DECIDE BETWEEN TWO ACTIONS:
1. If the clinical picture is incomplete (missing onset time, triggers, associated symptoms,
   or severity), ask the single most valuable follow-up question.
2. If the information is sufficient, produce a preliminary diagnosis.

Prefer one focused question over several. Respond with ONLY one JSON object, no markdown and
no extra prose, in exactly one of these two shapes:

{"type": "question", "content": "your follow-up question"}

{"type": "diagnosis", "result": {
  "possible_causes": [{"name": "condition name", "confidence": "85%"}],
  "risk_level": "low | medium | high | urgent",
  "advice": "clear, actionable guidance for the patient (under 200 words)"
}}"#;

const FORCE_DIAGNOSIS_SUFFIX: &str = "\n\nYou have already asked the maximum number of \
follow-up questions. You MUST respond with a \"diagnosis\" object now, based on what is \
known; do not ask another question.";

const DEGRADED_PARSE_ADVICE: &str = "We could not produce a reliable assessment this time \
because the AI doctor's reply was malformed. Please try again later or consult a medical \
professional.";

const FORCED_CLOSURE_ADVICE: &str = "The information gathered was not sufficient for a \
confident assessment. Please consider seeing a medical professional in person for a proper \
examination.";

/// Single seam to the external language model: full preamble plus the ordered
/// dialogue, returning the raw completion text.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn complete(&self, preamble: &str, history: &[Turn]) -> anyhow::Result<String>;
}

/// Outcome of one reasoning turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Question(String),
    Diagnosis(DiagnosisResult),
}

/// Transport-level failure (HTTP error, timeout). The pipeline keeps the
/// session retryable on this; everything else is folded into a [`Decision`].
#[derive(Debug, Error)]
#[error("reasoning call failed: {0}")]
pub struct ReasoningFailure(pub String);

/// Wire shape of the model's decision payload.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawDecision {
    Question { content: String },
    Diagnosis { result: DiagnosisResult },
}

pub struct Reasoner {
    client: Arc<dyn ReasoningClient>,
    timeout: Duration,
}

impl Reasoner {
    pub fn new(client: Arc<dyn ReasoningClient>) -> Self {
        Self {
            client,
            timeout: REASONING_TIMEOUT,
        }
    }

    pub fn with_timeout(client: Arc<dyn ReasoningClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Run one reasoning turn over the session's full history.
    ///
    /// The 3-round clarification cap is enforced here, not delegated to the
    /// model: once the rounds are exhausted the preamble demands a diagnosis,
    /// and a question coming back anyway is converted into a terminal
    /// degraded diagnosis so the session always terminates.
    pub async fn decide(&self, session: &Session) -> Result<Decision, ReasoningFailure> {
        let force_diagnosis = session.rounds_exhausted();
        let preamble = if force_diagnosis {
            format!("{CONSULTATION_PREAMBLE}{FORCE_DIAGNOSIS_SUFFIX}")
        } else {
            CONSULTATION_PREAMBLE.to_string()
        };

        let call = self.client.complete(&preamble, &session.history);
        let raw = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!("Reasoning call failed for session {}: {}", session.id, e);
                return Err(ReasoningFailure(e.to_string()));
            }
            Err(_) => {
                warn!(
                    "Reasoning call timed out after {:?} for session {}",
                    self.timeout, session.id
                );
                return Err(ReasoningFailure(format!(
                    "timed out after {:?}",
                    self.timeout
                )));
            }
        };

        let decision = match parse_decision(&raw) {
            Some(decision) => decision,
            None => {
                warn!(
                    "Undecodable reasoning payload for session {}: {:?}",
                    session.id,
                    raw.chars().take(200).collect::<String>()
                );
                return Ok(Decision::Diagnosis(DiagnosisResult::degraded(
                    DEGRADED_PARSE_ADVICE,
                )));
            }
        };

        match decision {
            Decision::Question(q) if force_diagnosis => {
                // The model ignored the forced-diagnosis instruction; close
                // the session out rather than looping forever.
                info!(
                    "Session {} exhausted clarification rounds, forcing closure (model asked: {})",
                    session.id, q
                );
                Ok(Decision::Diagnosis(DiagnosisResult::degraded(
                    FORCED_CLOSURE_ADVICE,
                )))
            }
            other => Ok(other),
        }
    }
}

/// Extract and decode the first well-formed decision payload from model output.
///
/// Models routinely wrap JSON in markdown fences or surround it with prose, so
/// fenced content is preferred, then the substring between the first `{` and
/// the last `}`.
pub fn parse_decision(raw: &str) -> Option<Decision> {
    let candidate = extract_json_payload(raw)?;
    let decoded: RawDecision = serde_json::from_str(&candidate).ok()?;
    Some(match decoded {
        RawDecision::Question { content } => Decision::Question(content),
        RawDecision::Diagnosis { result } => Decision::Diagnosis(result),
    })
}

fn extract_json_payload(raw: &str) -> Option<String> {
    let fence = regex::Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").ok()?;
    if let Some(caps) = fence.captures(raw) {
        return Some(caps.get(1)?.as_str().to_string());
    }

    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(raw[start..=end].to_string())
}
