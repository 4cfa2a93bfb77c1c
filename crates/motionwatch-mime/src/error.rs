//! Error types for MIME operations.

/// Result type alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Content-Type header could not be parsed.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    /// Transfer encoding could not be decoded.
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// Multipart body without a boundary parameter.
    #[error("Missing boundary in multipart message")]
    MissingBoundary,

    /// Multipart body whose boundaries never appear.
    #[error("Invalid multipart structure: {0}")]
    InvalidMultipart(String),

    /// Nesting deeper than the parser allows.
    #[error("MIME nesting exceeds {0} levels")]
    TooDeep(usize),
}
