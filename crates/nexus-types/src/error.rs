//! Error kinds the core distinguishes and surfaces, per the error handling design.

/// The stable set of error kinds every component maps its failures into.
/// Each variant carries a human-readable detail; the `error_code()` method
/// is the stable identifier logged and exported as a metric label.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("overloaded: {0}")]
    Overloaded(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("embedder failed: {0}")]
    EmbedderFailed(String),

    #[error("store failed: {0}")]
    StoreFailed(String),

    #[error("graph disabled")]
    GraphDisabled,

    /// Unique-constraint race on a graph UPSERT. Handled internally by the
    /// retry-as-update branch; never expected to escape to a caller.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl CoreError {
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidInput(_) => "invalid_input",
            CoreError::NotFound(_) => "not_found",
            CoreError::Overloaded(_) => "overloaded",
            CoreError::BackendUnavailable(_) => "backend_unavailable",
            CoreError::EmbedderFailed(_) => "embedder_failed",
            CoreError::StoreFailed(_) => "store_failed",
            CoreError::GraphDisabled => "graph_disabled",
            CoreError::Conflict(_) => "conflict",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            CoreError::InvalidInput(_) => 400,
            CoreError::NotFound(_) => 404,
            CoreError::Overloaded(_) => 503,
            CoreError::BackendUnavailable(_) => 503,
            CoreError::EmbedderFailed(_) => 502,
            CoreError::StoreFailed(_) => 500,
            CoreError::GraphDisabled => 503,
            CoreError::Conflict(_) => 500,
        }
    }
}
