use thiserror::Error;

/// Errors surfaced by the consultation core.
///
/// External-collaborator failures (transcription, vision, reasoning) are
/// degraded inside the pipeline and never reach this enum; what remains is
/// the read-path taxonomy plus storage faults.
#[derive(Error, Debug)]
pub enum ConsultError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The diagnosis was requested before the session reached `complete`.
    /// Expected during normal polling, not an internal fault.
    #[error("diagnosis not ready for session {0}")]
    NotReady(String),

    /// Invariant violation: a `complete` session without a diagnosis result.
    #[error("session {0} is complete but its diagnosis result is missing")]
    ResultMissing(String),

    #[error("session storage error: {0}")]
    Storage(String),

    #[error("history storage error: {0}")]
    History(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ConsultError>;
