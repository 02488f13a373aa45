//! Core error type for the Promptgate engine.
//!
//! `EngineError` is used throughout the core domain (stores, stages, RPC).
//! User-input conflicts, unknown references and gate failures are normally
//! turned into regular responses by the stages; only precondition faults,
//! stage faults and timeouts travel as `EngineError` to the top level.

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Precondition failed in stage '{stage}': {message}")]
    Precondition { stage: String, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Stage '{stage}' failed: {message}")]
    StageFailed { stage: String, message: String },

    #[error("Timed out after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Pipeline completed without producing a response")]
    NoResponse,

    #[error("Response already set for this execution")]
    ResponseAlreadySet,

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Shorthand for a precondition fault raised by a stage.
    pub fn precondition(stage: &str, message: impl Into<String>) -> Self {
        EngineError::Precondition {
            stage: stage.to_string(),
            message: message.into(),
        }
    }

    /// A short message safe to replay across the protocol boundary.
    pub fn public_message(&self) -> String {
        match self {
            EngineError::Precondition { stage, .. } => {
                format!("Internal pipeline error in stage '{}'", stage)
            }
            EngineError::StageFailed { stage, .. } => {
                format!("Stage '{}' failed", stage)
            }
            EngineError::Timeout { operation, .. } => format!("Timed out: {}", operation),
            EngineError::Database(_) | EngineError::Io(_) | EngineError::Internal(_) => {
                "Internal error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Parse(err.to_string())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_message_hides_internal_detail() {
        let err = EngineError::Internal("lock poisoned at 0xdeadbeef".to_string());
        assert_eq!(err.public_message(), "Internal error");

        let err = EngineError::StageFailed {
            stage: "step_execution".to_string(),
            message: "renderer exploded".to_string(),
        };
        assert_eq!(err.public_message(), "Stage 'step_execution' failed");
    }

    #[test]
    fn test_user_facing_errors_keep_message() {
        let err = EngineError::InvalidRequest("missing command".to_string());
        assert_eq!(err.public_message(), "Invalid request: missing command");
    }
}
