use std::sync::Arc;

use tracing::{error, info, warn};

use crate::{
    error::{ConsultError, Result},
    history::{HistoryRecord, HistoryStore},
    normalize::Normalizer,
    reasoner::{Decision, Reasoner},
    session::{Session, SessionStatus, SymptomInput},
    storage::SessionStore,
};

const RETRY_APOLOGY: &str = "Sorry, the AI doctor could not be reached just now. Please \
resend your last message, or add any further details, and we will try again.";

/// The slow half of a submission: normalize the input, run one reasoning
/// turn, apply the decision to the session and persist it.
///
/// Runs as a detached task per submission. Every run ends with the session in
/// `awaiting_input` or `complete` within one reasoning-timeout window; no
/// error from a collaborator escapes the task.
pub struct ConsultationPipeline {
    store: Arc<dyn SessionStore>,
    normalizer: Normalizer,
    reasoner: Reasoner,
    history: Arc<dyn HistoryStore>,
}

impl ConsultationPipeline {
    pub fn new(
        store: Arc<dyn SessionStore>,
        normalizer: Normalizer,
        reasoner: Reasoner,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            store,
            normalizer,
            reasoner,
            history,
        }
    }

    /// Entry point for the background task. Store faults are logged here so
    /// the spawned future never panics the runtime.
    pub async fn run(&self, session_id: &str, input: SymptomInput) {
        if let Err(e) = self.process(session_id, input).await {
            error!("Pipeline failed for session {}: {}", session_id, e);
        }
    }

    async fn process(&self, session_id: &str, input: SymptomInput) -> Result<()> {
        let mut session = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| ConsultError::SessionNotFound(session_id.to_string()))?;

        let text = self.normalizer.normalize(&input).await;
        session.push_user_turn(text);

        match self.reasoner.decide(&session).await {
            Ok(Decision::Question(question)) => {
                info!(
                    "Session {} needs clarification (round {})",
                    session.id,
                    session.clarification_rounds + 1
                );
                session.record_question(question);
            }
            Ok(Decision::Diagnosis(result)) => {
                info!(
                    "Session {} diagnosed with risk level {:?}",
                    session.id, result.risk_level
                );
                session.record_diagnosis(result);
            }
            Err(failure) => {
                warn!(
                    "Session {} reasoning failed, parking for retry: {}",
                    session.id, failure
                );
                session.record_failure(RETRY_APOLOGY);
            }
        }

        self.store.put(session.clone()).await?;

        self.persist_history(&session).await;
        Ok(())
    }

    /// Durable-history write for completed, non-degraded sessions. Failures
    /// are swallowed: the session-store view the client polls must not be
    /// affected by the archive being down.
    async fn persist_history(&self, session: &Session) {
        if session.status != SessionStatus::Complete {
            return;
        }
        let Some(result) = &session.diagnosis_result else {
            return;
        };
        if result.is_degraded() {
            return;
        }

        let record = HistoryRecord::new(
            session.user_id,
            session.id.clone(),
            result.clone(),
            session.history.clone(),
        );
        if let Err(e) = self.history.record(record).await {
            error!(
                "Failed to archive diagnosis for session {}: {}",
                session.id, e
            );
        }
    }
}
