use thiserror::Error;

/// Error taxonomy the engine distinguishes when reporting task outcomes.
///
/// The variant chosen determines the user-visible message shape and whether
/// the owning task remains retryable (see `OrchestratorError::retryable`).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Lock wait, connection drop, or any other transient store failure.
    /// Never touches task/job rows — the caller retries the whole operation.
    #[error("store error: {0}")]
    StoreTransient(#[from] sqlx::Error),

    /// Credential or OAuth failure surfaced by a source adapter.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A page-fetch call against a source adapter failed outright.
    #[error("source fetch failed: {0}")]
    SourceFetch(String),

    /// The heartbeat closure observed cancellation.
    #[error("cancelled")]
    Cancelled,

    /// `processor_registry[job.method]` had no entry.
    #[error("method {0} not registered")]
    MethodNotRegistered(String),

    /// Catch-all for processor bugs that don't fit another category.
    #[error("processor error: {0}")]
    Processor(String),
}

impl OrchestratorError {
    /// User-visible message persisted to `job.message` / `task.message`.
    pub fn user_message(&self) -> String {
        match self {
            OrchestratorError::StoreTransient(e) => format!("internal error: {e}"),
            OrchestratorError::Auth(msg) => format!("Authentication failed: {msg}"),
            OrchestratorError::SourceFetch(msg) => msg.clone(),
            OrchestratorError::Cancelled => "cancelled".to_string(),
            OrchestratorError::MethodNotRegistered(method) => {
                format!("method {method} not registered")
            }
            OrchestratorError::Processor(msg) => msg.clone(),
        }
    }

    /// Whether a task that failed with this error should still count toward
    /// the retry budget. The engine doesn't model a transient/permanent
    /// distinction at this layer — every terminal failure increments
    /// `retry_count` the same way; callers rely on the message to judge
    /// whether retrying is useful.
    pub fn increments_retry_count(&self) -> bool {
        !matches!(self, OrchestratorError::StoreTransient(_))
    }
}
