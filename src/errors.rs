use thiserror::Error;

/// Error taxonomy for the vector relationship core.
///
/// Validation problems carry the full list of violations so callers can
/// report every issue at once instead of fixing them one round-trip at a
/// time.
#[derive(Debug, Error)]
pub enum RelationError {
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Storage(String),

    #[error("embedding backend error: {0}")]
    Embedding(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RelationError>;

impl RelationError {
    /// Validation errors and missing ids are caller mistakes; everything
    /// else is an operational problem worth retrying or alerting on.
    pub fn is_client_error(&self) -> bool {
        matches!(self, RelationError::Validation(_) | RelationError::NotFound(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RelationError::Validation(_) => "validation",
            RelationError::NotFound(_) => "not_found",
            RelationError::Storage(_) => "storage",
            RelationError::Embedding(_) => "embedding",
            RelationError::Config(_) => "configuration",
            RelationError::Serialization(_) => "serialization",
        }
    }

    /// Individual violations for validation errors, empty otherwise.
    pub fn violations(&self) -> &[String] {
        match self {
            RelationError::Validation(errors) => errors,
            _ => &[],
        }
    }
}

/// Convert an error into a user-facing message with recovery hints.
pub fn format_user_error(error: &RelationError) -> String {
    match error {
        RelationError::Validation(errors) => format!(
            "The request was rejected:\n{}",
            errors
                .iter()
                .map(|e| format!("  - {}", e))
                .collect::<Vec<_>>()
                .join("\n")
        ),
        RelationError::NotFound(id) => format!(
            "Content not found: {}\n\
             The item may have been deleted or the id is wrong.",
            id
        ),
        RelationError::Storage(msg) => format!(
            "Cannot reach the storage backend: {}\n\
             If this persists, check:\n\
             - The redis server is running and reachable\n\
             - STORAGE_BACKEND=memory for offline development",
            msg
        ),
        RelationError::Embedding(msg) => format!(
            "Embedding backend error: {}\n\
             Similarity results fall back to deterministic mock vectors \
             until the backend recovers.",
            msg
        ),
        RelationError::Config(msg) => format!(
            "Invalid configuration: {}\n\
             Check your config file or environment variables.",
            msg
        ),
        RelationError::Serialization(e) => format!("Malformed stored record: {}", e),
    }
}

/// JSON error payload for the tool server.
pub fn create_error_response(error: &RelationError) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "message": format_user_error(error),
            "type": error.kind(),
            "recoverable": !error.is_client_error(),
            "violations": error.violations(),
        }
    })
}
