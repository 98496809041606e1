//! Error types for Statuspage operations.
//!
//! Every failure surfaced by the transport, the service client and the provider
//! is expressed as an [`Error`] variant, so callers can tell configuration
//! problems, exhausted retries, cancellation and API-level rejections apart.

use thiserror::Error;

/// Main error type for Statuspage operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A required credential was not supplied
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Remote service is unavailable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// HTTP exchange failed at the transport level
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    /// A single exchange timed out
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Retry budget was used up without a terminal response
    #[error("giving up after {attempts} attempt(s): {message}")]
    RetriesExhausted {
        /// Number of physical exchanges issued
        attempts: u32,
        /// Status code of the last response, if the last attempt produced one
        status: Option<u16>,
        /// Last error text or a snippet of the last response body
        message: String,
    },

    /// Request body cannot be replayed across attempts
    #[error("Request is not replayable: {0}")]
    NonReplayableRequest(String),

    /// The caller cancelled the logical call or its deadline passed
    #[error("Request cancelled: {0}")]
    Cancelled(String),

    /// Structured error returned by the remote API
    #[error("API error {status}")]
    Api {
        /// HTTP status code of the response
        status: u16,
        /// Raw response body, preserved verbatim
        body: String,
    },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Failed to parse a response payload
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Invalid endpoint
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Specialized result type for Statuspage operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingCredentials(_) => "MISSING_CREDENTIALS",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::HttpError(_) => "HTTP_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            Self::NonReplayableRequest(_) => "NON_REPLAYABLE_REQUEST",
            Self::Cancelled(_) => "CANCELLED",
            Self::Api { .. } => "API_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::ParseError(_) => "PARSE_ERROR",
            Self::InvalidEndpoint(_) => "INVALID_ENDPOINT",
        }
    }

    /// Returns true if this error points at a problem the operator should
    /// see in the logs, not just in the failed operation.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(
            self,
            Self::ConfigError(_)
                | Self::ValidationError(_)
                | Self::MissingCredentials(_)
                | Self::RetriesExhausted { .. }
        )
    }

    /// Returns true for failures that happened below the API layer: the
    /// request never produced a usable response.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::HttpError(_)
                | Self::Timeout(_)
                | Self::ServiceUnavailable(_)
                | Self::RetriesExhausted { .. }
                | Self::Cancelled(_)
                | Self::InvalidEndpoint(_)
        )
    }

    /// HTTP status associated with the error, when one was observed.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::RetriesExhausted { status, .. } => *status,
            _ => None,
        }
    }
}

// Conversions from external error types
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::ServiceUnavailable(err.to_string())
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else {
            Self::HttpError(err.to_string())
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidEndpoint(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ValidationError(err.to_string())
    }
}
