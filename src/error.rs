//! Error types for vehicle operations

use thiserror::Error;

/// Result type alias for vehicle operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the facade, the resolver and the upstream client.
///
/// The set is closed: presentation layers match on [`Error::kind`] to pick
/// a status code.
#[derive(Error, Debug)]
pub enum Error {
    /// Credential login was rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// No reachable account holds the VIN
    #[error("Vehicle with VIN {vin} not found in any account. Found: {seen:?}")]
    VehicleNotFound { vin: String, seen: Vec<String> },

    /// The upstream API answered with an error or an unreadable body
    #[error("Upstream error {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Network-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request exceeded its time budget
    #[error("Request timed out")]
    Timeout,

    /// Missing or invalid local configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Coarse error category used at the presentation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    BadGateway,
    GatewayTimeout,
    Internal,
}

impl ErrorKind {
    /// HTTP status a REST surface should answer with.
    pub fn http_status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Unauthorized => 401,
            Self::BadGateway => 502,
            Self::GatewayTimeout => 504,
            Self::Internal => 500,
        }
    }
}

impl Error {
    /// Create an upstream error from a status code and message
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::VehicleNotFound { .. } => ErrorKind::NotFound,
            Self::Authentication(_) => ErrorKind::Unauthorized,
            Self::Upstream { .. } => ErrorKind::BadGateway,
            Self::Transport(_) | Self::Timeout => ErrorKind::GatewayTimeout,
            Self::Configuration(_) => ErrorKind::Internal,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::upstream(0, format!("invalid response body: {err}"))
        } else if let Some(status) = err.status() {
            Self::upstream(status.as_u16(), err.to_string())
        } else {
            // reqwest errors carry the URL, never the form body
            Self::Transport(err.without_url().to_string())
        }
    }
}
