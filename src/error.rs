use thiserror::Error;

/// Main error type for RAGSync
#[derive(Error, Debug)]
pub enum RagsyncError {
    /// Knowledge source could not be loaded into the staging directory
    #[error("Load error: {0}")]
    Load(String),

    /// A parser failed on a file
    #[error("Parse error: {0}")]
    Parse(String),

    /// Embedding API errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Target collection does not exist in the vector store
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// Collection already exists in the vector store
    #[error("Collection already exists: {0}")]
    CollectionConflict(String),

    /// Network/timeout failures talking to the vector store (retryable)
    #[error("Transient vector store error: {0}")]
    TransientGateway(String),

    /// Schema/validation failures reported by the vector store (not retried)
    #[error("Vector store error: {0}")]
    PermanentGateway(String),

    /// Job status store errors
    #[error("Job status error: {0}")]
    JobStatus(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Run was cancelled between batches
    #[error("Run cancelled: {0}")]
    Cancelled(String),
}

impl RagsyncError {
    /// Whether a failed gateway call is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, RagsyncError::TransientGateway(_))
    }
}

/// Convenient Result type using RagsyncError
pub type Result<T> = std::result::Result<T, RagsyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RagsyncError::Config("Test error".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("Test error"));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let rusqlite_err = rusqlite::Error::InvalidQuery;
        let err: RagsyncError = rusqlite_err.into();
        assert!(matches!(err, RagsyncError::Database(_)));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RagsyncError = io_err.into();
        assert!(matches!(err, RagsyncError::Io(_)));
    }

    #[test]
    fn test_only_transient_gateway_is_retryable() {
        assert!(RagsyncError::TransientGateway("timeout".into()).is_transient());
        assert!(!RagsyncError::PermanentGateway("bad dim".into()).is_transient());
        assert!(!RagsyncError::CollectionNotFound("docs".into()).is_transient());
        assert!(!RagsyncError::Embedding("429".into()).is_transient());
    }
}
