use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("local API call failed: {0}")]
    LocalApi(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
