use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A single history window query failed.
    #[error("History source query failed: {0}")]
    SourceQuery(String),

    /// The remote store could not be reached.
    #[error("Remote connection error: {0}")]
    RemoteConnection(String),

    /// Credentials were rejected by the remote store.
    #[error("Remote authentication failed: {0}")]
    RemoteAuth(String),

    #[error("Remote object not found: {0}")]
    RemoteNotFound(String),

    #[error("Remote object already exists: {0}")]
    AlreadyExists(String),

    /// A downloaded object could be neither decrypted nor parsed.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    /// A required setting is absent or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Sync already in progress for {0}")]
    SyncInProgress(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns a stable error code for this error variant.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "IO_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::SourceQuery(_) => "SOURCE_QUERY_ERROR",
            Error::RemoteConnection(_) => "REMOTE_CONNECTION_ERROR",
            Error::RemoteAuth(_) => "REMOTE_AUTH_ERROR",
            Error::RemoteNotFound(_) => "REMOTE_NOT_FOUND",
            Error::AlreadyExists(_) => "ALREADY_EXISTS",
            Error::Decode(_) => "DECODE_ERROR",
            Error::Encryption(_) => "ENCRYPTION_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::SyncInProgress(_) => "SYNC_IN_PROGRESS",
            Error::Cancelled => "CANCELLED",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true if this error is potentially retryable.
    ///
    /// Transient transport failures are retryable; credential, configuration
    /// and data errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::SourceQuery(_) => true,
            Error::RemoteConnection(_) => true,
            Error::SyncInProgress(_) => true,

            Error::Serialization(_) => false,
            Error::RemoteAuth(_) => false,
            Error::RemoteNotFound(_) => false,
            Error::AlreadyExists(_) => false,
            Error::Decode(_) => false,
            Error::Encryption(_) => false,
            Error::Config(_) => false,
            Error::InvalidArgument(_) => false,
            Error::Cancelled => false,
            Error::Internal(_) => false,
        }
    }

    /// True for failures that must not schedule another attempt
    /// (bad or missing credentials, missing settings).
    pub fn is_fatal_for_schedule(&self) -> bool {
        matches!(self, Error::RemoteAuth(_) | Error::Config(_))
    }

    /// Adds context to an error by wrapping it in an Internal error.
    ///
    /// # Examples
    ///
    /// ```
    /// use histsync_core::Error;
    ///
    /// let err = Error::Decode("bad json".to_string()).with_context("increment 1700000000000");
    /// assert_eq!(err.code(), "INTERNAL_ERROR");
    /// ```
    pub fn with_context(self, context: &str) -> Error {
        Error::Internal(format!("{}: {}", context, self))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(Error::SourceQuery("x".into()).code(), "SOURCE_QUERY_ERROR");
        assert_eq!(Error::RemoteAuth("x".into()).code(), "REMOTE_AUTH_ERROR");
        assert_eq!(Error::Decode("x".into()).code(), "DECODE_ERROR");
        assert_eq!(Error::Cancelled.code(), "CANCELLED");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::RemoteConnection("timeout".into()).is_retryable());
        assert!(!Error::RemoteAuth("401".into()).is_retryable());
        assert!(!Error::Config("missing url".into()).is_retryable());
        assert!(Error::Config("missing url".into()).is_fatal_for_schedule());
        assert!(!Error::RemoteConnection("timeout".into()).is_fatal_for_schedule());
    }
}
