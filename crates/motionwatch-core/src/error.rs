//! Error types for the core library.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in the pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration is missing or invalid. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The source connection is unusable (after retries, when surfaced from
    /// the connection manager).
    #[error("Connection error: {0}")]
    Connection(String),

    /// The source rejected one request; the session is still healthy.
    #[error("Source error: {0}")]
    Source(String),

    /// A payload is missing, truncated or not a decodable image.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The inference backend failed.
    #[error("Inference error: {0}")]
    Inference(String),

    /// The notifier could not deliver an alert.
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Ledger storage failed.
    #[error("Ledger error: {0}")]
    Ledger(#[from] sqlx::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An external call exceeded its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// What was being attempted.
        operation: &'static str,
        /// The deadline that elapsed.
        after: Duration,
    },
}

impl Error {
    /// Returns true if the error means the source session must be replaced.
    #[must_use]
    pub const fn is_connection_level(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Io(_) | Self::Timeout { .. })
    }
}

impl From<motionwatch_imap::Error> for Error {
    fn from(err: motionwatch_imap::Error) -> Self {
        if err.is_connection_error() {
            Self::Connection(err.to_string())
        } else {
            Self::Source(err.to_string())
        }
    }
}

impl From<motionwatch_smtp::Error> for Error {
    fn from(err: motionwatch_smtp::Error) -> Self {
        Self::Dispatch(err.to_string())
    }
}

impl From<motionwatch_mime::Error> for Error {
    fn from(err: motionwatch_mime::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_imap_errors_are_classified() {
        let no: Error = motionwatch_imap::Error::No("gone".into()).into();
        assert!(matches!(no, Error::Source(_)));
        assert!(!no.is_connection_level());

        let bye: Error = motionwatch_imap::Error::Bye("shutdown".into()).into();
        assert!(bye.is_connection_level());
    }

    #[test]
    fn test_timeout_is_connection_level() {
        let err = Error::Timeout {
            operation: "fetch",
            after: Duration::from_secs(1),
        };
        assert!(err.is_connection_level());
        assert_eq!(err.to_string(), "fetch timed out after 1s");
    }
}
