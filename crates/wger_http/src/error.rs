//! Error taxonomy for outbound wger calls.
//!
//! Every transport failure is normalized into one of [`ApiError::Http`],
//! [`ApiError::Network`] or [`ApiError::Timeout`] before the retry policy and
//! circuit breaker look at it.

use crate::circuit_breaker::CircuitState;
use chrono::{DateTime, Utc};

/// OS-level connection error codes treated as "no response received".
pub const NETWORK_ERROR_CODES: &[&str] = &[
    "ECONNRESET",
    "ECONNREFUSED",
    "ENOTFOUND",
    "ENETUNREACH",
    "EHOSTUNREACH",
    "EAI_AGAIN",
    "EPIPE",
];

/// Error codes that mean the request ran out of time.
pub const TIMEOUT_ERROR_CODES: &[&str] = &["ETIMEDOUT", "ECONNABORTED", "ESOCKETTIMEDOUT"];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    /// Upstream answered with a non-2xx status.
    #[error("HTTP {status} {status_text}")]
    Http {
        status: u16,
        status_text: String,
        body: Option<ResponseBody>,
    },

    /// No response was received.
    #[error("network error ({}): {message}", .code.as_deref().unwrap_or("unknown"))]
    Network {
        code: Option<String>,
        message: String,
    },

    #[error("request timed out after {timeout_ms}ms: {message}")]
    Timeout { timeout_ms: u64, message: String },

    /// Rejected locally; no network attempt was made.
    #[error("circuit breaker is {state}, next attempt allowed at {next_attempt_at}")]
    CircuitOpen {
        state: CircuitState,
        next_attempt_at: DateTime<Utc>,
    },

    /// The caller cancelled the operation.
    #[error("request aborted")]
    Aborted,

    /// The request could not be built (bad path, header or body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Network { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Matches connection-level failure signatures.
    pub fn is_network_failure(&self) -> bool {
        match self {
            ApiError::Network { code, message } => {
                looks_like_network_failure(code.as_deref(), message)
            }
            _ => false,
        }
    }

    /// Matches timeout signatures.
    pub fn is_timeout(&self) -> bool {
        match self {
            ApiError::Timeout { .. } => true,
            ApiError::Network { code, message } => looks_like_timeout(code.as_deref(), message),
            _ => false,
        }
    }
}

/// Parsed body of an error response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(serde_json::Value),
    Text(String),
}

impl ResponseBody {
    /// JSON when the bytes parse as JSON, text otherwise, `None` when empty.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        match serde_json::from_slice(bytes) {
            Ok(value) => Some(ResponseBody::Json(value)),
            Err(_) => Some(ResponseBody::Text(String::from_utf8_lossy(bytes).into_owned())),
        }
    }
}

/// Raw failure reported by a [`Transport`](crate::transport::Transport)
/// before normalization.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub code: Option<String>,
    pub message: String,
}

impl TransportError {
    pub fn new(code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    /// Fold into the [`ApiError`] taxonomy. Timeout signatures become
    /// [`ApiError::Timeout`], everything else [`ApiError::Network`].
    pub fn normalize(self, timeout_ms: u64) -> ApiError {
        if looks_like_timeout(self.code.as_deref(), &self.message) {
            ApiError::Timeout {
                timeout_ms,
                message: self.message,
            }
        } else {
            ApiError::Network {
                code: self.code,
                message: self.message,
            }
        }
    }
}

fn looks_like_network_failure(code: Option<&str>, message: &str) -> bool {
    if code.is_some_and(|c| NETWORK_ERROR_CODES.contains(&c)) {
        return true;
    }
    message.contains("Network Error") || message.contains("No response received from server")
}

fn looks_like_timeout(code: Option<&str>, message: &str) -> bool {
    if code.is_some_and(|c| TIMEOUT_ERROR_CODES.contains(&c)) {
        return true;
    }
    let lower = message.to_ascii_lowercase();
    lower.contains("timeout") || lower.contains("timed out")
}
