//! Common error types for cmsbridge.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Top-level error type for cmsbridge operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No usable bearer token is configured.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Connection, TLS or body transfer failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote store answered with an error body.
    #[error("Remote error: {0}")]
    Remote(RemoteError),

    /// Required local input is missing.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Host storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict detected.
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-level error reported by the remote store.
///
/// Built from a decoded body whose `sys.type` is `"Error"`. The raw body is
/// kept so callers can inspect `details` when they need more than the id.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    /// Error identifier, e.g. `VersionMismatch` or `NotFound`.
    pub id: String,
    /// Human readable message, when the remote sent one.
    pub message: Option<String>,
    /// The complete decoded body.
    pub body: Value,
}

impl RemoteError {
    /// Extract a remote error from a decoded body.
    ///
    /// Returns `None` unless `sys.type == "Error"`.
    pub fn from_body(body: &Value) -> Option<Self> {
        let sys = body.get("sys")?;
        if sys.get("type").and_then(Value::as_str) != Some("Error") {
            return None;
        }

        Some(Self {
            id: sys
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string(),
            message: body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            body: body.clone(),
        })
    }

    /// The remote rejected a write made against a stale version.
    pub fn is_version_mismatch(&self) -> bool {
        self.id == "VersionMismatch"
    }

    /// The addressed resource does not exist remotely.
    pub fn is_not_found(&self) -> bool {
        self.id == "NotFound"
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.id, message),
            None => write!(f, "{}", self.id),
        }
    }
}
