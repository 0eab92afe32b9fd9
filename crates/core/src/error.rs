//! Error types for Scout.
//!
//! A single error enum covers every hard-failure category in the workspace:
//! configuration, I/O, retrieval, embedding and persistence. Degraded retrieval
//! states (timeouts, missing index) are not errors; they are reported through
//! typed results in the retrieval crate.

use thiserror::Error;

/// Unified error type for Scout.
///
/// All fallible functions return `Result<T, AppError>`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Query-time retrieval errors
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Embedding method or dimension disagrees with the one an index was built with
    #[error("Configuration mismatch: {0}")]
    ConfigMismatch(String),

    /// Index build and storage errors
    #[error("Index error: {0}")]
    Index(String),

    /// A persisted generation is not the one the caller expected
    #[error("Stale generation: expected {expected}, found {found}")]
    StaleGeneration { expected: u64, found: u64 },

    /// Embedding provider errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_generation_message() {
        let err = AppError::StaleGeneration {
            expected: 3,
            found: 4,
        };
        assert_eq!(err.to_string(), "Stale generation: expected 3, found 4");
    }

    #[test]
    fn test_from_serde_json() {
        let err: AppError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, AppError::Serialization(_)));
    }
}
