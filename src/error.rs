//! Error handling for the SnipURL client.
//!
//! Every failure, whether it originated from the service, the transport or
//! the client itself, is represented by a single normalized [`struct@Error`].
//! Its [`ErrorKind`] follows the service's error taxonomy:
//!
//! * Request problems (`VALIDATION_ERROR`, `CONFLICT_ERROR`, `NOT_FOUND_ERROR`)
//! * Credential problems (`AUTHENTICATION_ERROR`, `AUTHORIZATION_ERROR`)
//! * Throttling (`RATE_LIMIT_ERROR`)
//! * Service and transport failures (`INTERNAL_ERROR`, `NETWORK_ERROR`)
//! * Everything else (`UNKNOWN_ERROR`)
//!
//! Error types the service may add in the future are carried through
//! verbatim as [`ErrorKind::Other`].
//!
//! # Example
//!
//! ```rust
//! use snipurl::error::{Error, ErrorKind, Result};
//!
//! fn lookup(id: &str) -> Result<()> {
//!     if id.is_empty() {
//!         return Err(Error::not_found("short url does not exist"));
//!     }
//!
//!     Ok(())
//! }
//! ```

use std::{convert::Infallible, fmt, str::FromStr, time::Duration};

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;

/// Normalized error flowing from the transport up to form validation.
///
/// Cloneable so that a single refresh failure can be handed to every
/// request waiting on it.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{message}")]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Human-readable description
    pub message: String,

    /// HTTP status of the response, absent for transport failures
    pub status: Option<StatusCode>,

    /// Errors attributed to individual form inputs, in service order
    pub field_errors: Vec<FieldError>,

    /// Free-form auxiliary payload from the service
    pub details: Option<serde_json::Value>,

    /// Suggested wait before retrying, for rate-limited requests
    pub retry_after: Option<Duration>,
}

/// Standard result type for SnipURL client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An error message attributed to a specific form input.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub struct FieldError {
    /// Name of the offending input
    #[serde(alias = "path", alias = "param")]
    pub field: String,

    /// Message to show under the input
    #[serde(alias = "msg")]
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error categories of the service's taxonomy.
///
/// The wire representation (`VALIDATION_ERROR`, ...) is used for both
/// `Display` and serialization. Unrecognized service values deserialize into
/// [`ErrorKind::Other`] instead of failing.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, DeserializeFromStr, SerializeDisplay)]
pub enum ErrorKind {
    /// Typical HTTP mapping: 400 Bad Request, 422 Unprocessable Entity
    Validation,

    /// Typical HTTP mapping: 401 Unauthorized
    Authentication,

    /// Typical HTTP mapping: 403 Forbidden
    Authorization,

    /// Typical HTTP mapping: 409 Conflict
    Conflict,

    /// Typical HTTP mapping: 404 Not Found
    NotFound,

    /// Typical HTTP mapping: 429 Too Many Requests
    RateLimit,

    /// Typical HTTP mapping: 5xx
    Internal,

    /// No response was received
    Network,

    /// Anything not covered above
    Unknown,

    /// A service-provided type this client does not know about
    Other(String),
}

impl ErrorKind {
    /// Returns the wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::Authentication => "AUTHENTICATION_ERROR",
            Self::Authorization => "AUTHORIZATION_ERROR",
            Self::Conflict => "CONFLICT_ERROR",
            Self::NotFound => "NOT_FOUND_ERROR",
            Self::RateLimit => "RATE_LIMIT_ERROR",
            Self::Internal => "INTERNAL_ERROR",
            Self::Network => "NETWORK_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
            Self::Other(kind) => kind,
        }
    }

    /// Maps an HTTP status to a kind when the service did not type its error.
    #[must_use]
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            400 | 422 => Self::Validation,
            401 => Self::Authentication,
            403 => Self::Authorization,
            404 => Self::NotFound,
            409 => Self::Conflict,
            429 => Self::RateLimit,
            500..=599 => Self::Internal,
            _ => Self::Unknown,
        }
    }

    /// Generic message used when neither the service nor the transport
    /// provides one.
    #[must_use]
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::Validation => "the request was invalid",
            Self::Authentication => "no valid authentication credentials",
            Self::Authorization => "permission denied",
            Self::Conflict => "the resource already exists",
            Self::NotFound => "not found",
            Self::RateLimit => "too many requests",
            Self::Internal => "the service encountered an internal error",
            Self::Network => "the service could not be reached",
            Self::Unknown | Self::Other(_) => "unknown error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let kind = match s {
            "VALIDATION_ERROR" => Self::Validation,
            "AUTHENTICATION_ERROR" => Self::Authentication,
            "AUTHORIZATION_ERROR" => Self::Authorization,
            "CONFLICT_ERROR" => Self::Conflict,
            "NOT_FOUND_ERROR" => Self::NotFound,
            "RATE_LIMIT_ERROR" => Self::RateLimit,
            "INTERNAL_ERROR" => Self::Internal,
            "NETWORK_ERROR" => Self::Network,
            "UNKNOWN_ERROR" => Self::Unknown,
            other => Self::Other(other.to_owned()),
        };
        Ok(kind)
    }
}

impl Error {
    /// Creates a new error with specified kind and message.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::new(ErrorKind::NotFound, "group not found");
    /// assert_eq!(err.kind, ErrorKind::NotFound);
    /// ```
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            field_errors: Vec::new(),
            details: None,
            retry_after: None,
        }
    }

    /// Creates an error for input the service rejected.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Creates an error for missing or rejected credentials.
    ///
    /// Used for the synthetic failure raised when a 401 arrives and no
    /// refresh token is available.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    /// Creates an error for authenticated requests that are not allowed.
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, message)
    }

    /// Creates an error for resources that already exist.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Creates an error for resources that do not exist.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Creates an error for throttled requests.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimit, message)
    }

    /// Creates an error for unexpected failures, on either side.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Creates an error for requests that did not get a response, including
    /// timeouts.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    /// Creates an error that fits no other category.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_field_errors(mut self, field_errors: Vec<FieldError>) -> Self {
        self.field_errors = field_errors;
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Looks up a string entry of the service-provided `details`.
    #[must_use]
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details
            .as_ref()
            .and_then(|details| details.get(key))
            .and_then(serde_json::Value::as_str)
    }

    /// Returns the status code as a number, if any.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        self.status.map(|status| status.as_u16())
    }
}

/// Converts `reqwest` errors into appropriate error kinds.
///
/// Maps transport errors:
/// * Timeouts, connection and request failures -> `Network`
/// * Response body decoding failures -> `Unknown`
/// * Builder and redirect policy failures -> `Internal`
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let error = if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
            Self::network(e.to_string())
        } else if e.is_decode() {
            Self::unknown(e.to_string())
        } else {
            Self::internal(e.to_string())
        };

        match e.status() {
            Some(status) => error.with_status(status),
            None => error,
        }
    }
}

/// Converts JSON errors to `Unknown`.
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::unknown(e.to_string())
    }
}

/// Converts URL parsing errors to `Internal`.
///
/// URLs are composed from configuration and fixed endpoint paths, so a
/// failure indicates a misconfiguration rather than bad user input.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts invalid header values to `Validation`.
impl From<http::header::InvalidHeaderValue> for Error {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Self::validation(e.to_string())
    }
}

/// Converts I/O errors of durable token storage to `Internal`.
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts TOML parsing errors to `Internal`.
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts TOML serialization errors to `Internal`.
impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts mutex poisoning errors to `Internal`.
impl<T> From<std::sync::PoisonError<std::sync::MutexGuard<'_, T>>> for Error {
    fn from(e: std::sync::PoisonError<std::sync::MutexGuard<'_, T>>) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts timeout errors to `Network`.
impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Self::network(e.to_string())
    }
}
