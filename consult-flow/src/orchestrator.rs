use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{error, info};

use crate::{
    error::{ConsultError, Result},
    pipeline::ConsultationPipeline,
    session::{DiagnosisResult, Session, SessionStatus, SymptomInput},
    storage::SessionStore,
};

/// A unit of background work, boxed so dispatchers stay object-safe.
pub type PipelineJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Seam for fire-and-forget execution of pipeline runs. The submission path
/// enqueues a job and returns; the runner decides where it executes.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, job: PipelineJob);
}

/// Default dispatcher: one detached tokio task per submission.
pub struct TokioDispatcher;

impl Dispatcher for TokioDispatcher {
    fn dispatch(&self, job: PipelineJob) {
        tokio::spawn(job);
    }
}

/// Entry point for user submissions and the poll-based read path.
///
/// `submit` does only fast local work: resolve or create the session, persist
/// the snapshot, hand the slow pipeline to the dispatcher, and return the
/// snapshot so the client has a consistent view to poll against.
pub struct Orchestrator {
    store: Arc<dyn SessionStore>,
    pipeline: Arc<ConsultationPipeline>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        pipeline: Arc<ConsultationPipeline>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            store,
            pipeline,
            dispatcher,
        }
    }

    pub async fn submit(&self, input: SymptomInput, user_id: i64) -> Result<Session> {
        let session = self.resolve_session(&input, user_id).await?;
        self.store.put(session.clone()).await?;

        let pipeline = self.pipeline.clone();
        let session_id = session.id.clone();
        self.dispatcher.dispatch(Box::pin(async move {
            pipeline.run(&session_id, input).await;
        }));

        Ok(session)
    }

    /// A resumable session is one that exists, belongs to the caller and is
    /// not terminal. Anything else gets a fresh session, matching the
    /// first-submission path. A `processing` session may be resumed too;
    /// last write wins on the store in that case.
    async fn resolve_session(&self, input: &SymptomInput, user_id: i64) -> Result<Session> {
        if let Some(id) = &input.session_id {
            if let Some(mut existing) = self.store.get(id).await? {
                if existing.user_id == user_id && existing.status != SessionStatus::Complete {
                    info!("Resuming session {} for user {}", id, user_id);
                    existing.resume();
                    return Ok(existing);
                }
            }
        }
        let session = Session::new(user_id);
        info!("Created session {} for user {}", session.id, user_id);
        Ok(session)
    }

    /// Pure read for polling; never mutates the session.
    pub async fn get_status(&self, session_id: &str) -> Result<Session> {
        self.store
            .get(session_id)
            .await?
            .ok_or_else(|| ConsultError::SessionNotFound(session_id.to_string()))
    }

    pub async fn get_result(&self, session_id: &str) -> Result<DiagnosisResult> {
        let session = self.get_status(session_id).await?;
        if session.status != SessionStatus::Complete {
            return Err(ConsultError::NotReady(session_id.to_string()));
        }
        session.diagnosis_result.ok_or_else(|| {
            // Violates the diagnosis-iff-complete invariant; a server-side
            // fault, not a user error.
            error!("Session {} is complete but has no diagnosis result", session_id);
            ConsultError::ResultMissing(session_id.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryHistoryStore;
    use crate::normalize::{Normalizer, TranscriptionClient, VisionClient};
    use crate::reasoner::{Reasoner, ReasoningClient};
    use crate::session::{InputType, Turn};
    use crate::storage::InMemorySessionStore;
    use async_trait::async_trait;

    /// Swallows jobs so tests can observe the synchronous snapshot alone.
    struct NullDispatcher;

    impl Dispatcher for NullDispatcher {
        fn dispatch(&self, _job: PipelineJob) {}
    }

    struct NoMedia;

    #[async_trait]
    impl TranscriptionClient for NoMedia {
        async fn transcribe(&self, _audio: &[u8]) -> anyhow::Result<String> {
            anyhow::bail!("not used")
        }
    }

    #[async_trait]
    impl VisionClient for NoMedia {
        async fn extract(&self, _url: &str, _instruction: &str) -> anyhow::Result<String> {
            anyhow::bail!("not used")
        }
    }

    struct SilentClient;

    #[async_trait]
    impl ReasoningClient for SilentClient {
        async fn complete(&self, _preamble: &str, _history: &[Turn]) -> anyhow::Result<String> {
            anyhow::bail!("not used")
        }
    }

    fn orchestrator() -> (Orchestrator, Arc<InMemorySessionStore>) {
        let store = Arc::new(InMemorySessionStore::new());
        let pipeline = Arc::new(ConsultationPipeline::new(
            store.clone(),
            Normalizer::new(Arc::new(NoMedia), Arc::new(NoMedia)),
            Reasoner::new(Arc::new(SilentClient)),
            Arc::new(InMemoryHistoryStore::new()),
        ));
        (
            Orchestrator::new(store.clone(), pipeline, Arc::new(NullDispatcher)),
            store,
        )
    }

    fn input(session_id: Option<&str>, content: &str) -> SymptomInput {
        SymptomInput {
            session_id: session_id.map(|s| s.to_string()),
            input_type: InputType::Text,
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn submit_without_id_creates_fresh_distinct_sessions() {
        let (orchestrator, _) = orchestrator();
        let a = orchestrator.submit(input(None, "fever"), 1).await.unwrap();
        let b = orchestrator.submit(input(None, "cough"), 1).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(a.status, SessionStatus::Processing);
        assert_eq!(a.progress, 0);
        assert!(a.history.is_empty());
    }

    #[tokio::test]
    async fn unknown_session_id_also_creates_fresh_session() {
        let (orchestrator, _) = orchestrator();
        let snapshot = orchestrator
            .submit(input(Some("missing"), "fever"), 1)
            .await
            .unwrap();
        assert_ne!(snapshot.id, "missing");
    }

    #[tokio::test]
    async fn resume_transitions_before_pipeline_runs() {
        let (orchestrator, store) = orchestrator();
        let mut session = Session::new(1);
        session.push_user_turn("fever");
        session.record_question("Since when?");
        let id = session.id.clone();
        store.put(session).await.unwrap();

        // NullDispatcher never runs the pipeline, so this snapshot is purely
        // the synchronous submission path.
        let snapshot = orchestrator
            .submit(input(Some(&id), "since monday"), 1)
            .await
            .unwrap();

        assert_eq!(snapshot.id, id);
        assert_eq!(snapshot.status, SessionStatus::Processing);
        assert!(snapshot.next_question.is_none());

        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Processing);
    }

    #[tokio::test]
    async fn complete_session_is_never_resumed() {
        let (orchestrator, store) = orchestrator();
        let mut session = Session::new(1);
        session.record_diagnosis(DiagnosisResult::degraded("done"));
        let id = session.id.clone();
        store.put(session).await.unwrap();

        let snapshot = orchestrator
            .submit(input(Some(&id), "one more thing"), 1)
            .await
            .unwrap();
        assert_ne!(snapshot.id, id);

        let original = store.get(&id).await.unwrap().unwrap();
        assert_eq!(original.status, SessionStatus::Complete);
    }

    #[tokio::test]
    async fn another_users_session_is_not_resumable() {
        let (orchestrator, store) = orchestrator();
        let mut session = Session::new(1);
        session.record_question("Since when?");
        let id = session.id.clone();
        store.put(session).await.unwrap();

        let snapshot = orchestrator
            .submit(input(Some(&id), "hello"), 2)
            .await
            .unwrap();
        assert_ne!(snapshot.id, id);
    }

    #[tokio::test]
    async fn get_status_unknown_session_is_not_found() {
        let (orchestrator, _) = orchestrator();
        assert!(matches!(
            orchestrator.get_status("nope").await,
            Err(ConsultError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn get_result_before_complete_is_not_ready() {
        let (orchestrator, store) = orchestrator();
        let session = Session::new(1);
        let id = session.id.clone();
        store.put(session).await.unwrap();

        assert!(matches!(
            orchestrator.get_result(&id).await,
            Err(ConsultError::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn complete_without_result_is_an_internal_error() {
        let (orchestrator, store) = orchestrator();
        // Forge an invariant-violating session the state machine cannot
        // produce, to exercise the invariant check on the read path.
        let mut session = Session::new(1);
        session.status = SessionStatus::Complete;
        let id = session.id.clone();
        store.put(session).await.unwrap();

        assert!(matches!(
            orchestrator.get_result(&id).await,
            Err(ConsultError::ResultMissing(_))
        ));
    }
}
