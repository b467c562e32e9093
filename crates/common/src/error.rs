use thiserror::Error;

/// Top-level error type for orchestrator-domain operations shared across crates.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    // --- Hard dependency errors (system cannot function) ---
    #[error("state store error: {0}")]
    StateStore(String),

    // --- Soft dependency errors (task/request-scoped, does not crash the process) ---
    #[error("control plane call failed: {0}")]
    ControlPlane(String),

    // --- Operational errors ---
    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("circuit breaker open for {0}")]
    CircuitOpen(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Whether this error is from a hard dependency (startup should refuse to proceed).
    pub fn is_hard_dependency(&self) -> bool {
        matches!(self, Self::StateStore(_))
    }
}

/// Result type alias for orchestrator-domain operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
