//! Error types
//!
//! Errors never cross connection boundaries: a failing handshake or stream
//! ends only the connection it belongs to.

use thiserror::Error;

use crate::mount::MountError;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Socket or stream I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed request from the remote party
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Credential extraction failed
    #[error("Authorization error: {0}")]
    Auth(#[from] AuthError),

    /// Mount registry rejected the operation
    #[error("Mount error: {0}")]
    Mount(#[from] MountError),

    /// An operation did not finish in time
    #[error("Timed out during {0}")]
    Timeout(&'static str),
}

/// Request-level protocol errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Request line is not `METHOD TARGET VERSION`
    #[error("invalid request line: {0:?}")]
    InvalidRequestLine(String),

    /// Method not accepted by the handler that received it
    #[error("unexpected method: {0}")]
    UnexpectedMethod(String),

    /// Request target could not be parsed as a URI path
    #[error("invalid request uri: {0}")]
    InvalidUri(String),

    /// Header line without a colon or with invalid bytes
    #[error("invalid header line: {0:?}")]
    InvalidHeader(String),

    /// Request head exceeded the configured size
    #[error("request head larger than {0} bytes")]
    HeadTooLarge(usize),

    /// Connection closed before the request head was complete
    #[error("connection closed during request head")]
    IncompleteHead,

    /// Required query parameter missing
    #[error("missing query parameter: {0}")]
    MissingParameter(&'static str),

    /// Metadata charset not supported by the configured decoder
    #[error("unsupported charset: {0}")]
    UnsupportedCharset(String),
}

/// Basic authorization header errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Header is not `Basic <base64(user:pass)>`
    #[error("unable to parse authorization header")]
    InvalidHeader,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
