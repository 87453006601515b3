use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("embedding backend failed for {item}: {message}")]
    EmbeddingBackend { item: String, message: String },
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
    #[error("response does not satisfy schema: {0}")]
    SchemaViolation(String),
    #[error("generation backend error: {0}")]
    Backend(String),
    #[error("generation timed out: {0}")]
    Timeout(String),
    #[error("store error: {0}")]
    Store(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RagError {
    pub fn store<E: std::fmt::Display>(err: E) -> Self {
        RagError::Store(err.to_string())
    }

    /// Maps a transport failure, keeping timeouts distinguishable.
    pub fn backend(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RagError::Timeout(err.to_string())
        } else {
            RagError::Backend(err.to_string())
        }
    }

    pub fn embedding(item: impl Into<String>, message: impl std::fmt::Display) -> Self {
        RagError::EmbeddingBackend {
            item: item.into(),
            message: message.to_string(),
        }
    }

    /// Stable class name, reported back to the model on a corrective retry.
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::Configuration(_) => "ConfigurationError",
            RagError::EmbeddingBackend { .. } => "EmbeddingBackendError",
            RagError::DimensionMismatch { .. } => "DimensionMismatchError",
            RagError::MalformedResponse(_) => "MalformedResponseError",
            RagError::SchemaViolation(_) => "SchemaViolationError",
            RagError::Backend(_) => "BackendError",
            RagError::Timeout(_) => "TimeoutError",
            RagError::Store(_) => "StoreError",
            RagError::Io(_) => "IoError",
        }
    }

    /// Whether the structured adapter may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::MalformedResponse(_)
                | RagError::SchemaViolation(_)
                | RagError::Backend(_)
                | RagError::Timeout(_)
        )
    }
}

impl From<sqlx::Error> for RagError {
    fn from(err: sqlx::Error) -> Self {
        RagError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classes() {
        assert!(RagError::MalformedResponse("x".into()).is_retryable());
        assert!(RagError::Timeout("x".into()).is_retryable());
        assert!(RagError::SchemaViolation("x".into()).is_retryable());
        assert!(!RagError::Configuration("x".into()).is_retryable());
        assert!(!RagError::Store("x".into()).is_retryable());
    }

    #[test]
    fn embedding_error_names_the_item() {
        let err = RagError::embedding("doc.txt#400", "connection refused");
        assert_eq!(err.kind(), "EmbeddingBackendError");
        assert!(err.to_string().contains("doc.txt#400"));
    }
}
