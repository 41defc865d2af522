pub mod error;
pub mod history;
pub mod normalize;
pub mod orchestrator;
pub mod pipeline;
pub mod reasoner;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use error::{ConsultError, Result};
pub use history::{HistoryRecord, HistoryStore, InMemoryHistoryStore};
pub use normalize::{Normalizer, TranscriptionClient, VisionClient};
pub use orchestrator::{Dispatcher, Orchestrator, PipelineJob, TokioDispatcher};
pub use pipeline::ConsultationPipeline;
pub use reasoner::{Decision, Reasoner, ReasoningClient, ReasoningFailure};
pub use session::{
    Cause, DiagnosisResult, InputType, RiskLevel, Role, Session, SessionStatus, SymptomInput,
    Turn, MAX_CLARIFICATION_ROUNDS,
};
pub use storage::{InMemorySessionStore, SessionStore};
