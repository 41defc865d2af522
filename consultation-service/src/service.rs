use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::Json,
    routing::{get, post},
};
use consult_flow::{
    ConsultError, ConsultationPipeline, DiagnosisResult, HistoryStore, InMemoryHistoryStore,
    InMemorySessionStore, Normalizer, Orchestrator, Reasoner, SessionStore, SymptomInput,
    TokioDispatcher,
};
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::auth::{Authenticator, GatewayIdentity};
use crate::clients::{OpenRouterReasoner, OpenRouterTranscription, OpenRouterVision};
use crate::history::PostgresHistoryStore;
use crate::models::{ConsultationResponse, HistoryResponse};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn unauthorized_error(message: &str) -> ApiError {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message })))
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn consult_error(e: ConsultError) -> ApiError {
    match &e {
        ConsultError::SessionNotFound(id) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "Session not found",
                "session_id": id
            })),
        ),
        // Expected during polling, hence 425 rather than a server fault.
        ConsultError::NotReady(id) => (
            StatusCode::TOO_EARLY,
            Json(json!({
                "error": "Diagnosis still in progress, try again shortly",
                "session_id": id
            })),
        ),
        ConsultError::ResultMissing(_) => {
            error!("Invariant violation on read path: {}", e);
            internal_error("Diagnosis completed but its result is missing", &e.to_string())
        }
        _ => {
            error!("Read path failed: {}", e);
            internal_error("Consultation backend failure", &e.to_string())
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub history: Arc<dyn HistoryStore>,
    pub authenticator: Arc<dyn Authenticator>,
}

/// Wire the core to real collaborators and build the router.
pub async fn create_app() -> anyhow::Result<Router> {
    let session_store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());

    let history: Arc<dyn HistoryStore> = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let store = PostgresHistoryStore::connect(&url).await?;
            Arc::new(store)
        }
        Err(_) => {
            info!("DATABASE_URL not set, keeping diagnosis history in memory");
            Arc::new(InMemoryHistoryStore::new())
        }
    };

    let normalizer = Normalizer::new(
        Arc::new(OpenRouterTranscription::from_env()?),
        Arc::new(OpenRouterVision::from_env()?),
    );
    let reasoner = Reasoner::new(Arc::new(OpenRouterReasoner::from_env()?));

    let pipeline = Arc::new(ConsultationPipeline::new(
        session_store.clone(),
        normalizer,
        reasoner,
        history.clone(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        session_store,
        pipeline,
        Arc::new(TokioDispatcher),
    ));

    let app_state = AppState {
        orchestrator,
        history,
        authenticator: Arc::new(GatewayIdentity),
    };

    Ok(build_router(app_state))
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/v1/consultation/submit_symptom", post(submit_symptom))
        .route(
            "/api/v1/consultation/{session_id}/status",
            get(get_consultation_status),
        )
        .route(
            "/api/v1/consultation/{session_id}/result",
            get(get_diagnosis_result),
        )
        .route("/api/v1/history", get(read_user_history))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "AI Consultation Backend",
        "version": "1.0.0",
        "description": "Multi-turn symptom intake with AI-assisted preliminary diagnosis",
        "endpoints": {
            "POST /api/v1/consultation/submit_symptom": "Submit symptoms, start or continue a session",
            "GET /api/v1/consultation/{session_id}/status": "Poll the session snapshot",
            "GET /api/v1/consultation/{session_id}/result": "Fetch the final diagnosis",
            "GET /api/v1/history": "List the caller's past diagnoses",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<i64, ApiError> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| unauthorized_error("Missing bearer credential"))?;

    state
        .authenticator
        .verify(bearer)
        .await
        .map_err(|_| unauthorized_error("Invalid credential"))
}

async fn submit_symptom(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<SymptomInput>,
) -> ApiResult<ConsultationResponse> {
    let user_id = authenticate(&state, &headers).await?;
    info!(
        "Submission from user {} ({:?}, session {:?})",
        user_id, input.input_type, input.session_id
    );

    let snapshot = state
        .orchestrator
        .submit(input, user_id)
        .await
        .map_err(consult_error)?;

    Ok(Json(snapshot.into()))
}

async fn get_consultation_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<ConsultationResponse> {
    let snapshot = state
        .orchestrator
        .get_status(&session_id)
        .await
        .map_err(consult_error)?;
    Ok(Json(snapshot.into()))
}

async fn get_diagnosis_result(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<DiagnosisResult> {
    let result = state
        .orchestrator
        .get_result(&session_id)
        .await
        .map_err(consult_error)?;
    Ok(Json(result))
}

async fn read_user_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Vec<HistoryResponse>> {
    let user_id = authenticate(&state, &headers).await?;

    let records = state
        .history
        .list_for_user(user_id)
        .await
        .map_err(consult_error)?;

    Ok(Json(records.into_iter().map(Into::into).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use consult_flow::{ReasoningClient, TranscriptionClient, Turn, VisionClient};
    use tower::ServiceExt;

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

    struct QuestionDoctor;

    #[async_trait]
    impl ReasoningClient for QuestionDoctor {
        async fn complete(&self, _preamble: &str, _history: &[Turn]) -> anyhow::Result<String> {
            Ok(r#"{"type": "question", "content": "Since when?"}"#.to_string())
        }
    }

    fn test_app() -> (Router, Arc<InMemorySessionStore>) {
        let store = Arc::new(InMemorySessionStore::new());
        let session_store: Arc<dyn SessionStore> = store.clone();
        let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        let pipeline = Arc::new(ConsultationPipeline::new(
            session_store.clone(),
            Normalizer::new(Arc::new(NoMedia), Arc::new(NoMedia)),
            Reasoner::new(Arc::new(QuestionDoctor)),
            history.clone(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            session_store,
            pipeline,
            Arc::new(TokioDispatcher),
        ));
        let router = build_router(AppState {
            orchestrator,
            history,
            authenticator: Arc::new(GatewayIdentity),
        });
        (router, store)
    }

    fn test_router() -> Router {
        test_app().0
    }

    #[tokio::test]
    async fn health_check_is_open() {
        let response = test_router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn submit_requires_bearer_credential() {
        let request = Request::post("/api/v1/consultation/submit_symptom")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"input_type": "text", "content": "fever"}"#,
            ))
            .unwrap();
        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn submit_with_credential_returns_snapshot() {
        let request = Request::post("/api/v1/consultation/submit_symptom")
            .header("content-type", "application/json")
            .header("authorization", "Bearer 7")
            .body(Body::from(
                r#"{"input_type": "text", "content": "fever and cough for 3 days"}"#,
            ))
            .unwrap();
        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_session_status_is_404() {
        let response = test_router()
            .oneshot(
                Request::get("/api/v1/consultation/no-such-session/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn result_before_complete_is_425() {
        let (router, store) = test_app();
        let session = consult_flow::Session::new(7);
        let id = session.id.clone();
        store.put(session).await.unwrap();

        let response = router
            .oneshot(
                Request::get(format!("/api/v1/consultation/{id}/result"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_EARLY);
    }

    #[tokio::test]
    async fn history_is_scoped_to_the_caller() {
        let response = test_router()
            .oneshot(
                Request::get("/api/v1/history")
                    .header("authorization", "Bearer 7")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
