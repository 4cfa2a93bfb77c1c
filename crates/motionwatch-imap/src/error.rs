//! Error types for the IMAP library.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during IMAP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Response could not be parsed.
    #[error("Parse error at byte {position}: {message}")]
    Parse {
        /// Byte offset into the response line.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// Server returned NO response.
    #[error("Server returned NO: {0}")]
    No(String),

    /// Server returned BAD response.
    #[error("Server returned BAD: {0}")]
    Bad(String),

    /// Server sent BYE (disconnecting).
    #[error("Server sent BYE: {0}")]
    Bye(String),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Protocol violation or unexpected data.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Returns true if the error means the connection can no longer be used.
    ///
    /// `NO` and `BAD` are command-level rejections; the session is still
    /// healthy after them. Everything else leaves the stream in an unknown
    /// state.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        !matches!(self, Self::No(_) | Self::Bad(_))
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_classification() {
        assert!(!Error::No("message expunged".into()).is_connection_error());
        assert!(!Error::Bad("syntax".into()).is_connection_error());
        assert!(Error::Bye("shutting down".into()).is_connection_error());
        assert!(Error::Timeout(Duration::from_secs(5)).is_connection_error());
        assert!(
            Error::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof))
                .is_connection_error()
        );
    }
}
