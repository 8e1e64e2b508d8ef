use hyper::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Unified error type for the relay
#[derive(Error, Debug)]
pub enum RelayError {
    // Request errors
    #[error("Please provide a valid URL to proxy")]
    InvalidUrl { usage: String },

    #[error("Only HTTP and HTTPS protocols are supported")]
    InvalidProtocol,

    // Upstream errors
    #[error("{message}")]
    Upstream { target: String, message: String },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// JSON body returned to the caller for a failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl RelayError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            RelayError::InvalidUrl { .. } | RelayError::InvalidProtocol => {
                StatusCode::BAD_REQUEST
            }

            // 502 Bad Gateway
            RelayError::Upstream { .. } => StatusCode::BAD_GATEWAY,

            // 500 Internal Server Error
            RelayError::InvalidConfig(_) | RelayError::Io(_) | RelayError::Http(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable error kind, used as the `error` field of the payload
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::InvalidUrl { .. } => "Invalid URL",
            RelayError::InvalidProtocol => "Invalid Protocol",
            RelayError::Upstream { .. } => "Proxy Error",
            RelayError::InvalidConfig(_) => "Invalid Configuration",
            RelayError::Io(_) | RelayError::Http(_) => "Internal Error",
        }
    }

    /// Build the JSON payload describing this error
    pub fn payload(&self) -> ErrorPayload {
        let (usage, target) = match self {
            RelayError::InvalidUrl { usage } => (Some(usage.clone()), None),
            RelayError::Upstream { target, .. } => (None, Some(target.clone())),
            _ => (None, None),
        };

        ErrorPayload {
            error: self.kind(),
            message: self.to_string(),
            usage,
            target,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl From<hyper::Error> for RelayError {
    fn from(err: hyper::Error) -> Self {
        RelayError::Http(err.to_string())
    }
}
