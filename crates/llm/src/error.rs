//! Transport Error Types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Failure of a call to the knowledge-base backend or the analysis service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportError {
    /// Authentication failed (missing or expired token, bad API key)
    AuthenticationFailed { message: String },
    /// Rate limit exceeded; `retry_after` is the suggested delay in seconds
    RateLimited {
        message: String,
        retry_after: Option<u64>,
    },
    /// Resource not found
    NotFound { message: String },
    /// Invalid request (bad parameters)
    InvalidRequest { message: String },
    /// Server error from the backend
    ServerError {
        message: String,
        status: Option<u16>,
    },
    /// Network/connection error
    NetworkError { message: String },
    /// No response, or no data on an open stream, within the bound
    Timeout { message: String },
    /// Response parsing error
    ParseError { message: String },
    /// A stream that was open ended with an error record or a broken body
    StreamFailed { message: String },
    /// Other error
    Other { message: String },
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::AuthenticationFailed { message } => {
                write!(f, "Authentication failed: {}", message)
            }
            TransportError::RateLimited { message, .. } => write!(f, "Rate limited: {}", message),
            TransportError::NotFound { message } => write!(f, "Not found: {}", message),
            TransportError::InvalidRequest { message } => {
                write!(f, "Invalid request: {}", message)
            }
            TransportError::ServerError { message, status } => {
                if let Some(s) = status {
                    write!(f, "Server error ({}): {}", s, message)
                } else {
                    write!(f, "Server error: {}", message)
                }
            }
            TransportError::NetworkError { message } => write!(f, "Network error: {}", message),
            TransportError::Timeout { message } => write!(f, "Timeout: {}", message),
            TransportError::ParseError { message } => write!(f, "Parse error: {}", message),
            TransportError::StreamFailed { message } => write!(f, "Stream failed: {}", message),
            TransportError::Other { message } => write!(f, "Error: {}", message),
        }
    }
}

impl std::error::Error for TransportError {}

impl TransportError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
        }
    }

    /// Suggested wait before retrying, when the service gave one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TransportError::RateLimited {
                retry_after: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    /// Whether re-issuing the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::RateLimited { .. }
                | TransportError::NetworkError { .. }
                | TransportError::Timeout { .. }
        )
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout {
                message: err.to_string(),
            }
        } else if err.is_decode() {
            TransportError::parse(err.to_string())
        } else {
            TransportError::network(err.to_string())
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Map a non-success HTTP status and its body to a typed error.
///
/// The backend reports errors as `{"error": ..., "retry_after": N}`; the
/// `Retry-After` header is used when the body carries no delay.
pub fn parse_http_error(status: u16, body: &str, retry_after_header: Option<u64>) -> TransportError {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("error").or_else(|| v.get("message")))
        .map(|e| match e {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| body.to_string());

    match status {
        401 | 403 => TransportError::AuthenticationFailed { message },
        404 => TransportError::NotFound { message },
        429 => TransportError::RateLimited {
            retry_after: parsed
                .as_ref()
                .and_then(|v| v.get("retry_after"))
                .and_then(serde_json::Value::as_u64)
                .or(retry_after_header),
            message,
        },
        400 => TransportError::InvalidRequest { message },
        500..=599 => TransportError::ServerError {
            message,
            status: Some(status),
        },
        _ => TransportError::Other {
            message: format!("HTTP {}: {}", status, message),
        },
    }
}
