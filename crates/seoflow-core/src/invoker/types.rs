use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Error reported by an upstream research operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// The attempt did not finish within its timeout
    #[error("upstream timed out")]
    Timeout,

    /// 5xx-equivalent or throttling response
    #[error("upstream unavailable (status {status})")]
    Unavailable {
        /// HTTP-equivalent status
        status: u16,
    },

    /// Connection dropped before a response arrived
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// 4xx-equivalent response
    #[error("upstream rejected the request (status {status})")]
    Rejected {
        /// HTTP-equivalent status
        status: u16,
    },

    /// Response could not be understood
    #[error("invalid upstream response: {0}")]
    Invalid(String),
}

impl UpstreamError {
    /// Default transient-error classification
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Unavailable { .. } | Self::ConnectionReset(_)
        )
    }

    /// Classify an HTTP status code
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        if status >= 500 || status == 429 || status == 408 {
            Self::Unavailable { status }
        } else {
            Self::Rejected { status }
        }
    }
}

/// Outcome of one upstream attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// Attempt succeeded
    Success,
    /// Attempt exceeded its timeout
    Timeout,
    /// Transient error, eligible for retry
    RetryableError,
    /// Permanent error
    Error,
}

impl std::fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Timeout => write!(f, "timeout"),
            Self::RetryableError => write!(f, "retryable_error"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One upstream attempt, for observability only
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamCall {
    /// Target operation
    pub operation: String,
    /// Input payload
    pub payload: serde_json::Value,
    /// 1-based attempt number
    pub attempt: u32,
    /// Wall time spent in the attempt
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    /// Outcome
    pub outcome: CallOutcome,
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}
