//! Error types for seoflow-core
//!
//! Two layers live here:
//! - [`Error`]: internal failures raised by stores, cache tiers and codecs.
//! - [`Failure`]: the stable, typed failure handed to external callers.
//!   Every boundary operation resolves to an artifact or exactly one `Failure`.

use serde::Serialize;
use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown session or key
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency check failed
    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict {
        /// Version the writer based its update on
        expected: u64,
        /// Version currently stored
        actual: u64,
    },

    /// Relational store failure
    #[error("database error: {0}")]
    Database(String),

    /// Cache tier failure (connection, command, decoding)
    #[error("cache error: {0}")]
    Cache(String),

    /// Artifact or context (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid settings, unknown backends)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Cache(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Kind of a caller-visible failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Unknown session
    NotFound,
    /// Required context fields are absent
    MissingPrecondition,
    /// Optimistic concurrency retries ran out
    ConcurrentModification,
    /// Upstream retries exhausted
    Exhausted,
    /// Upstream deemed unhealthy by its circuit breaker
    CircuitOpen,
    /// Deadline elapsed or work was cancelled
    Canceled,
    /// Upstream refused the request (validation / 4xx)
    Rejected,
    /// Store or cache infrastructure failure
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "NotFound"),
            Self::MissingPrecondition => write!(f, "MissingPrecondition"),
            Self::ConcurrentModification => write!(f, "ConcurrentModification"),
            Self::Exhausted => write!(f, "Exhausted"),
            Self::CircuitOpen => write!(f, "CircuitOpen"),
            Self::Canceled => write!(f, "Canceled"),
            Self::Rejected => write!(f, "Rejected"),
            Self::Internal => write!(f, "Internal"),
        }
    }
}

/// Typed failure returned to external collaborators.
///
/// `Clone` so that a singleflight leader can hand the identical failure to
/// every follower. `message` never carries raw upstream payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{kind}: {message}")]
pub struct Failure {
    /// Failure classification
    pub kind: FailureKind,
    /// Sanitized description
    pub message: String,
}

impl Failure {
    /// Create a failure of the given kind
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Unknown session
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, message)
    }

    /// Missing required context
    pub fn missing_precondition(message: impl Into<String>) -> Self {
        Self::new(FailureKind::MissingPrecondition, message)
    }

    /// Deadline elapsed or cancelled
    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Canceled, message)
    }

    /// Infrastructure failure
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }
}

impl From<Error> for Failure {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound(what) => Failure::not_found(format!("{} not found", what)),
            Error::VersionConflict { .. } => Failure::new(
                FailureKind::ConcurrentModification,
                "client context was modified concurrently",
            ),
            other => Failure::internal(other.to_string()),
        }
    }
}

/// Trait for user-friendly error messages
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get a suggestion for how to fix the error
    fn suggestion(&self) -> Option<String>;
}

impl UserFriendlyError for Failure {
    fn user_message(&self) -> String {
        match self.kind {
            FailureKind::NotFound => format!("Session not found: {}", self.message),
            FailureKind::MissingPrecondition => {
                format!("Client context is incomplete: {}", self.message)
            }
            FailureKind::ConcurrentModification => {
                "Client context changed while the request was running.".to_string()
            }
            FailureKind::Exhausted => {
                "The research service did not respond successfully after several attempts."
                    .to_string()
            }
            FailureKind::CircuitOpen => {
                "The research service is temporarily unavailable.".to_string()
            }
            FailureKind::Canceled => "The request timed out or was cancelled.".to_string(),
            FailureKind::Rejected => {
                format!("The research service rejected the request: {}", self.message)
            }
            FailureKind::Internal => format!("Internal error: {}", self.message),
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self.kind {
            FailureKind::NotFound => {
                Some("Start a new session and submit business info.".to_string())
            }
            FailureKind::MissingPrecondition => Some(
                "Submit the business info form and process it before generating keywords."
                    .to_string(),
            ),
            FailureKind::ConcurrentModification | FailureKind::Canceled => {
                Some("Retry the request.".to_string())
            }
            FailureKind::Exhausted | FailureKind::CircuitOpen => {
                Some("Wait a minute before retrying.".to_string())
            }
            FailureKind::Rejected => Some("Check the submitted business info.".to_string()),
            FailureKind::Internal => None,
        }
    }
}

/// Format a failure for display in the CLI
pub fn format_failure_for_cli(failure: &Failure) -> String {
    let mut output = failure.user_message();
    if let Some(suggestion) = failure.suggestion() {
        output.push_str("\n\n");
        output.push_str(&suggestion);
    }
    output.push('\n');
    output
}
