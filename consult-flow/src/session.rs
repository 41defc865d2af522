use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How many follow-up questions the assistant may ask before a diagnosis is forced.
pub const MAX_CLARIFICATION_ROUNDS: u32 = 3;

/// Progress added per clarification round, capped below completion.
const QUESTION_PROGRESS_STEP: u8 = 15;
const QUESTION_PROGRESS_CAP: u8 = 90;

/// Lifecycle state of a consultation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The background pipeline is working on the latest submission.
    Processing,
    /// The assistant asked a follow-up question and is waiting for the user.
    AwaitingInput,
    /// Terminal: a diagnosis result is available.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry in the session dialogue, replayed to the reasoning model every turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Urgent,
    /// Sentinel for a degraded/failure outcome; excluded from durable history.
    Unknown,
}

/// A single candidate cause with the model's stated confidence (e.g. "85%").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cause {
    pub name: String,
    pub confidence: String,
}

/// Final structured outcome of a consultation. Immutable once attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub possible_causes: Vec<Cause>,
    pub risk_level: RiskLevel,
    pub advice: String,
}

impl DiagnosisResult {
    /// Degraded result used when the pipeline cannot complete normally.
    pub fn degraded(advice: impl Into<String>) -> Self {
        Self {
            possible_causes: Vec::new(),
            risk_level: RiskLevel::Unknown,
            advice: advice.into(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.risk_level == RiskLevel::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Text,
    Voice,
    Image,
}

/// One user submission. `content` is the symptom text, or a URL for voice/image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymptomInput {
    #[serde(default)]
    pub session_id: Option<String>,
    pub input_type: InputType,
    pub content: String,
}

/// One end-to-end consultation conversation.
///
/// Mutated only through the methods below; the read path never writes. All
/// mutators are no-ops once the session is [`SessionStatus::Complete`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: i64,
    pub status: SessionStatus,
    pub progress: u8,
    pub next_question: Option<String>,
    pub diagnosis_result: Option<DiagnosisResult>,
    pub history: Vec<Turn>,
    pub clarification_rounds: u32,
}

impl Session {
    pub fn new(user_id: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            status: SessionStatus::Processing,
            progress: 0,
            next_question: None,
            diagnosis_result: None,
            history: Vec::new(),
            clarification_rounds: 0,
        }
    }

    /// Accept a new submission on an existing session: back to `processing`,
    /// pending question cleared. The normalized user turn is appended by the
    /// pipeline once normalization has run.
    pub fn resume(&mut self) {
        if self.status == SessionStatus::Complete {
            return;
        }
        self.status = SessionStatus::Processing;
        self.next_question = None;
    }

    pub fn push_user_turn(&mut self, content: impl Into<String>) {
        if self.status == SessionStatus::Complete {
            return;
        }
        self.history.push(Turn::user(content));
    }

    /// The reasoner asked a follow-up question.
    pub fn record_question(&mut self, question: impl Into<String>) {
        if self.status == SessionStatus::Complete {
            return;
        }
        let question = question.into();
        self.history.push(Turn::assistant(question.clone()));
        self.next_question = Some(question);
        self.status = SessionStatus::AwaitingInput;
        self.progress = (self.progress + QUESTION_PROGRESS_STEP).min(QUESTION_PROGRESS_CAP);
        self.clarification_rounds += 1;
    }

    /// The reasoner produced a diagnosis; the session becomes terminal.
    pub fn record_diagnosis(&mut self, result: DiagnosisResult) {
        if self.status == SessionStatus::Complete {
            return;
        }
        self.history.push(Turn::assistant(result.advice.clone()));
        self.diagnosis_result = Some(result);
        self.next_question = None;
        self.progress = 100;
        self.status = SessionStatus::Complete;
    }

    /// Reasoning failed in a retryable way: park the session in
    /// `awaiting_input` with an apology so the user can try again. Does not
    /// consume a clarification round.
    pub fn record_failure(&mut self, apology: impl Into<String>) {
        if self.status == SessionStatus::Complete {
            return;
        }
        let apology = apology.into();
        self.history.push(Turn::assistant(apology.clone()));
        self.next_question = Some(apology);
        self.status = SessionStatus::AwaitingInput;
    }

    /// A diagnosis must now be forced instead of another follow-up question.
    pub fn rounds_exhausted(&self) -> bool {
        self.clarification_rounds >= MAX_CLARIFICATION_ROUNDS
    }
}
