//! Error types for lawqa.

use thiserror::Error;

/// Result type alias using LawQaError.
pub type Result<T> = std::result::Result<T, LawQaError>;

/// Errors that can occur while indexing or answering.
#[derive(Error, Debug)]
pub enum LawQaError {
    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Two different fragments render the same citation key.
    #[error("Duplicate citation key: {key}")]
    DuplicateCitation { key: String },

    /// Vector store / database error.
    #[error("Database error: {message}")]
    Database { message: String },

    /// Embedding oracle error.
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    /// Cross-encoder oracle error.
    #[error("Rerank error: {message}")]
    Rerank { message: String },

    /// Lexical index build or load error.
    #[error("Lexical index error: {message}")]
    Index { message: String },

    /// Answer generation oracle error.
    #[error("Generation error: {message}")]
    Generation { message: String },

    /// A remote call did not finish in time.
    #[error("{operation} timed out after {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    /// Retries exhausted for a remote call.
    #[error("{operation} unavailable after {attempts} attempts: {message}")]
    Unavailable {
        operation: String,
        attempts: u32,
        message: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl LawQaError {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create a rerank error.
    pub fn rerank(message: impl Into<String>) -> Self {
        Self::Rerank {
            message: message.into(),
        }
    }

    /// Create a lexical index error.
    pub fn index(message: impl Into<String>) -> Self {
        Self::Index {
            message: message.into(),
        }
    }

    /// Create a generation error.
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a call that failed with this error may succeed if retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Database { .. }
                | Self::Embedding { .. }
                | Self::Rerank { .. }
                | Self::Generation { .. }
                | Self::Timeout { .. }
        )
    }

    /// Get the error code for tool responses and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::DuplicateCitation { .. } => "DUPLICATE_CITATION",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::Rerank { .. } => "RERANK_ERROR",
            Self::Index { .. } => "INDEX_ERROR",
            Self::Generation { .. } => "GENERATION_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Unavailable { .. } => "UNAVAILABLE",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LawQaError::DuplicateCitation {
            key: "khoản 2 Điều 15".to_string(),
        };
        assert!(err.to_string().contains("khoản 2 Điều 15"));

        let err = LawQaError::Timeout {
            operation: "embed_query".to_string(),
            elapsed_ms: 1500,
        };
        assert_eq!(err.to_string(), "embed_query timed out after 1500ms");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(LawQaError::database("x").error_code(), "DATABASE_ERROR");
        assert_eq!(LawQaError::rerank("x").error_code(), "RERANK_ERROR");
        assert_eq!(LawQaError::config("x").error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_transient_classification() {
        assert!(LawQaError::embedding("connection reset").is_transient());
        assert!(LawQaError::Timeout {
            operation: "score".to_string(),
            elapsed_ms: 10
        }
        .is_transient());
        assert!(!LawQaError::config("missing model").is_transient());
        assert!(!LawQaError::invalid_argument("k must be >= 1").is_transient());
    }
}
