use chrono::{DateTime, Utc};
use consult_flow::{DiagnosisResult, HistoryRecord, Session, SessionStatus, Turn};
use serde::{Deserialize, Serialize};

/// The snapshot shape clients poll against.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConsultationResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub progress: u8,
    pub next_question: Option<String>,
    pub diagnosis_result: Option<DiagnosisResult>,
}

impl From<Session> for ConsultationResponse {
    fn from(session: Session) -> Self {
        Self {
            session_id: session.id,
            status: session.status,
            progress: session.progress,
            next_question: session.next_question,
            diagnosis_result: session.diagnosis_result,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub result: DiagnosisResult,
    pub dialogue_history: Vec<Turn>,
    pub created_at: DateTime<Utc>,
}

impl From<HistoryRecord> for HistoryResponse {
    fn from(record: HistoryRecord) -> Self {
        Self {
            session_id: record.session_id,
            result: record.result,
            dialogue_history: record.dialogue,
            created_at: record.created_at,
        }
    }
}
