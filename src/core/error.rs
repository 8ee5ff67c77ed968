//! Error types for butterfly-compare
//!
//! Failures are split along the lines the run policies care about: adapter
//! failures (`QueryError`), payloads that cannot be mapped onto the canonical
//! model (`NormalizationError`) and everything that stops a run before it
//! starts (`Error`).

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use strsim::jaro_winkler;
use thiserror::Error;

use crate::core::adapter::BackendId;
use crate::core::mode::Mode;

/// Minimum Jaro-Winkler similarity for a backend name suggestion
const SUGGESTION_THRESHOLD: f64 = 0.8;

/// Coarse classification of an adapter failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Connection,
    Auth,
    Backend,
    UnsupportedMode,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Connection => "connection_error",
            ErrorKind::Auth => "auth_error",
            ErrorKind::Backend => "backend_error",
            ErrorKind::UnsupportedMode => "unsupported_mode",
        };
        f.write_str(name)
    }
}

/// Failure of a single backend query
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryError {
    /// The bounded per-request timeout elapsed
    #[error("{backend}: request timed out after {timeout_ms} ms")]
    Timeout { backend: BackendId, timeout_ms: u64 },

    /// DNS failure, refused connection, reset stream
    #[error("{backend}: connection failed: {message}")]
    Connection { backend: BackendId, message: String },

    /// Credentials rejected by the backend
    #[error("{backend}: authentication rejected: {message}")]
    Auth { backend: BackendId, message: String },

    /// Non-2xx status or an explicit error body
    #[error("{backend}: backend error (HTTP {status}): {body}")]
    Backend {
        backend: BackendId,
        status: u16,
        body: String,
    },

    /// Rejected before any network call
    #[error("{backend}: mode '{mode}' is not supported")]
    UnsupportedMode { backend: BackendId, mode: Mode },
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Timeout { .. } => ErrorKind::Timeout,
            QueryError::Connection { .. } => ErrorKind::Connection,
            QueryError::Auth { .. } => ErrorKind::Auth,
            QueryError::Backend { .. } => ErrorKind::Backend,
            QueryError::UnsupportedMode { .. } => ErrorKind::UnsupportedMode,
        }
    }

    pub fn backend(&self) -> &BackendId {
        match self {
            QueryError::Timeout { backend, .. }
            | QueryError::Connection { backend, .. }
            | QueryError::Auth { backend, .. }
            | QueryError::Backend { backend, .. }
            | QueryError::UnsupportedMode { backend, .. } => backend,
        }
    }

    /// Connectivity failures and overloaded backends may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            QueryError::Timeout { .. } | QueryError::Connection { .. } => true,
            QueryError::Backend { status, .. } => *status == 429 || *status >= 500,
            QueryError::Auth { .. } | QueryError::UnsupportedMode { .. } => false,
        }
    }

    /// Map a transport error from reqwest onto the adapter taxonomy
    pub fn from_reqwest(backend: &BackendId, timeout: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            QueryError::Timeout {
                backend: backend.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }
        } else if let Some(status) = err.status() {
            QueryError::Backend {
                backend: backend.clone(),
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            QueryError::Connection {
                backend: backend.clone(),
                message: err.to_string(),
            }
        }
    }
}

/// A response body that could not be mapped onto the canonical trip model
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{backend}: cannot normalize response: {message}")]
pub struct NormalizationError {
    pub backend: BackendId,
    pub message: String,
}

impl NormalizationError {
    pub fn new(backend: &BackendId, message: impl Into<String>) -> Self {
        Self {
            backend: backend.clone(),
            message: message.into(),
        }
    }
}

/// Main error type for butterfly-compare operations
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Normalization(#[from] NormalizationError),

    /// Backend identifier not present in the configuration
    #[error("Backend '{}' not found{}", .name, suggestion_hint(.suggestion))]
    BackendNotFound {
        name: String,
        suggestion: Option<String>,
    },

    /// Invalid configuration or parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Malformed configuration or coordinate table
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(". Did you mean '{s}'?"),
        None => String::new(),
    }
}

impl Error {
    /// Build a `BackendNotFound` error carrying the closest known backend id
    pub fn backend_not_found(name: &str, known: &[BackendId]) -> Self {
        Error::BackendNotFound {
            name: name.to_string(),
            suggestion: suggest_backend(name, known),
        }
    }
}

/// Suggest the configured backend id closest to a misspelled one
pub fn suggest_backend(name: &str, known: &[BackendId]) -> Option<String> {
    let name_lower = name.to_lowercase();
    let mut best: Option<(f64, &BackendId)> = None;

    for candidate in known {
        let candidate_lower = candidate.as_str().to_lowercase();
        if candidate_lower == name_lower {
            return None;
        }
        let score = jaro_winkler(&name_lower, &candidate_lower);
        if score >= SUGGESTION_THRESHOLD && best.map_or(true, |(b, _)| score > b) {
            best = Some((score, candidate));
        }
    }

    best.map(|(_, id)| id.to_string())
}

/// Convenience result type for butterfly-compare operations
pub type Result<T> = std::result::Result<T, Error>;
