//! Error types for the RAG pipeline.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the pipeline.
///
/// The variants follow three classes:
/// - caller mistakes ([`Error::InvalidArgument`]), always reported back;
/// - collaborator failures ([`Error::ExternalService`]), recovered locally
///   by the component that made the call whenever a fallback exists;
/// - integrity violations ([`Error::DataIntegrity`]), which abort the
///   operation because continuing would corrupt ranking.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad input from the caller (k = 0, no modality, malformed predicate).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A remote or external collaborator failed.
    #[error("External service '{service}' failed: {reason}")]
    ExternalService {
        /// Collaborator name (e.g. "embedding", "vision", "llm", "qdrant").
        service: String,
        /// Failure description.
        reason: String,
    },

    /// The index or store is inconsistent.
    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON/TOML encoding or decoding failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Shorthand for an [`Error::ExternalService`].
    pub fn external(service: impl Into<String>, reason: impl ToString) -> Self {
        Error::ExternalService {
            service: service.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether a component may fall back instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::ExternalService { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_external_failures_are_recoverable() {
        assert!(Error::external("llm", "timeout").is_recoverable());
        assert!(!Error::InvalidArgument("k must be positive".into()).is_recoverable());
        assert!(!Error::DataIntegrity("dimension mismatch".into()).is_recoverable());
    }

    #[test]
    fn test_external_error_message_names_service() {
        let err = Error::external("vision", "HTTP 500");
        assert_eq!(err.to_string(), "External service 'vision' failed: HTTP 500");
    }
}
