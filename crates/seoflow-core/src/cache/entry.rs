use super::CacheFormat;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Upper bound applied to TTLs that do not fit a chrono duration
const MAX_TTL_DAYS: i64 = 3650;

/// A serialized artifact with its format tag and expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Fingerprint string
    pub key: String,
    /// Format the payload was produced with
    pub format: CacheFormat,
    /// Opaque serialized artifact
    pub payload: Vec<u8>,
    /// When the artifact was computed
    pub computed_at: DateTime<Utc>,
    /// Time to live from `computed_at`
    pub ttl: Duration,
}

impl CacheEntry {
    /// Create an entry computed now
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        format: CacheFormat,
        payload: Vec<u8>,
        ttl: Duration,
    ) -> Self {
        Self {
            key: key.into(),
            format,
            payload,
            computed_at: Utc::now(),
            ttl,
        }
    }

    /// Absolute expiry
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::days(MAX_TTL_DAYS));
        self.computed_at
            .checked_add_signed(ttl)
            .unwrap_or(self.computed_at)
    }

    /// Whether the entry is past its TTL
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at()
    }

    /// Time left before expiry
    #[must_use]
    pub fn remaining_ttl(&self) -> Duration {
        (self.expires_at() - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Decode the payload with the entry's own format
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        self.format.decode(&self.payload)
    }
}
