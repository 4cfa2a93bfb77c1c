//! Error types for SMTP operations.

use std::io;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Hostname is not a valid TLS server name.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Server replied with a non-success code.
    #[error("SMTP error {code}: {message}")]
    Reply {
        /// Reply code (e.g., 550).
        code: u16,
        /// Reply text.
        message: String,
    },

    /// Unexpected or malformed data from the server.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Envelope address failed validation.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Server lacks a required extension.
    #[error("Server does not support {0}")]
    NotSupported(String),
}

impl Error {
    /// Builds a reply error.
    #[must_use]
    pub fn reply(code: u16, message: impl Into<String>) -> Self {
        Self::Reply {
            code,
            message: message.into(),
        }
    }

    /// Returns true for 5xx replies, which will fail again on retry.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Reply { code, .. } if *code >= 500 && *code < 600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_classification() {
        assert!(Error::reply(550, "mailbox unavailable").is_permanent());
        assert!(!Error::reply(451, "try later").is_permanent());
        assert!(!Error::Protocol("x".into()).is_permanent());
    }
}
