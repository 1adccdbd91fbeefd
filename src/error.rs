// Error handling module
// Defines the error taxonomy shared by the token manager, client and transport

use thiserror::Error;

/// Errors that can occur while authenticating or issuing requests
#[derive(Error, Debug)]
pub enum Error {
    /// Neither explicit nor environment credentials were available
    #[error("No login credentials available: set a username and password for the environment")]
    MissingCredentials,

    /// The login endpoint answered with a non-success status
    #[error("Login failed: {status} - {body}")]
    Authentication { status: u16, body: String },

    /// Login succeeded but the response carried no recognizable token field
    #[error("Login response does not contain a token (tried: token, access_token, jwt)")]
    TokenExtraction,

    /// Login reported success but the token cache is still empty
    #[error("Failed to obtain a valid token")]
    NoTokenAvailable,

    /// A caller-supplied header could not be encoded
    #[error("Invalid header '{name}': {message}")]
    InvalidHeader { name: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A response assertion did not hold
    #[error("Assertion failed: {0}")]
    Assertion(String),

    /// Error raised by the HTTP transport, passed through unchanged
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors raised by an HTTP transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// The underlying reqwest call failed
    #[error("HTTP request to {url} failed ({kind}): {source}")]
    Http {
        kind: &'static str,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Failure from a non-reqwest transport
    #[error("Transport error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl TransportError {
    /// Wrap a reqwest error, classifying it the way the retry loop logs it
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        TransportError::Http {
            kind: classify(&source),
            url: url.into(),
            source,
        }
    }

    /// Whether the failure was a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Http { kind: "timeout", .. })
    }
}

/// Categorize a reqwest error for logging and diagnostics
pub(crate) fn classify(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection_failed"
    } else if e.is_request() {
        "request_error"
    } else if e.is_body() {
        "body_error"
    } else if e.is_decode() {
        "decode_error"
    } else {
        "unknown"
    }
}

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, Error>;
