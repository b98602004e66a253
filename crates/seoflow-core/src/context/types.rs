//! Client context data model

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Well-known context field names
pub mod fields {
    /// Raw business info form as submitted
    pub const BUSINESS_INFO: &str = "business_info";
    /// Business info with URL summaries and priority-sorted products
    pub const BUSINESS_INFO_PROCESSED: &str = "business_info_processed";
    /// Markdown client brief rendered from the processed business info
    pub const CLIENT_CONTEXT: &str = "client_context";
    /// When the business info was last processed
    pub const PROCESSED_AT: &str = "processed_at";
    /// Keyword table ids generated for this client
    pub const KEYWORD_TABLES: &str = "keyword_tables";
    /// Generated keyword tables keyed by table id
    pub const KEYWORDS_OUTPUT: &str = "keywords_output";
}

/// A single versioned context value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextField {
    /// Stored value
    pub value: serde_json::Value,
    /// Context version at which this field was last written
    pub version: u64,
    /// Write timestamp
    pub updated_at: DateTime<Utc>,
}

/// Lifetime view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    /// Opaque session identifier
    pub session_id: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last access timestamp (drives idle expiry)
    pub last_accessed_at: DateTime<Utc>,
}

/// Per-session client context.
///
/// `version` starts at 0 for a freshly created session and increases by
/// exactly one per successful store write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientContext {
    /// Owning session
    pub session_id: String,
    /// Monotonic version
    pub version: u64,
    /// Named fields
    pub fields: BTreeMap<String, ContextField>,
    /// Session creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last access timestamp
    pub last_accessed_at: DateTime<Utc>,
}

impl ClientContext {
    /// Create an empty context at version 0
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            version: 0,
            fields: BTreeMap::new(),
            created_at: now,
            last_accessed_at: now,
        }
    }

    /// Session lifetime attributes
    #[must_use]
    pub fn session(&self) -> Session {
        Session {
            session_id: self.session_id.clone(),
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
        }
    }

    /// Raw field value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key).map(|f| &f.value)
    }

    /// Whether a field is present
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Deserialize a field into a typed value
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| Error::Serialization(format!("field '{}': {}", key, e))),
            None => Ok(None),
        }
    }

    /// Produce the next version of this context with `delta` applied
    #[must_use]
    pub fn apply(&self, delta: &ContextDelta) -> Self {
        let now = Utc::now();
        let version = self.version + 1;
        let mut fields = self.fields.clone();

        for key in &delta.remove {
            fields.remove(key);
        }
        for (key, value) in &delta.set {
            fields.insert(
                key.clone(),
                ContextField {
                    value: value.clone(),
                    version,
                    updated_at: now,
                },
            );
        }

        Self {
            session_id: self.session_id.clone(),
            version,
            fields,
            created_at: self.created_at,
            last_accessed_at: now,
        }
    }
}

/// A set of field updates applied atomically by one store write
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextDelta {
    /// Fields to insert or overwrite
    pub set: BTreeMap<String, serde_json::Value>,
    /// Fields to remove
    pub remove: BTreeSet<String>,
}

impl ContextDelta {
    /// Create an empty delta
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a raw value
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        let key = key.into();
        self.remove.remove(&key);
        self.set.insert(key, value);
        self
    }

    /// Set a serializable value
    pub fn set_serialized<T: Serialize>(self, key: impl Into<String>, value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)?;
        Ok(self.set(key, value))
    }

    /// Remove a field
    #[must_use]
    pub fn remove(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.set.remove(&key);
        self.remove.insert(key);
        self
    }

    /// Whether the delta carries no updates at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }

    /// Whether applying the delta would leave `context` unchanged
    #[must_use]
    pub fn is_noop_for(&self, context: &ClientContext) -> bool {
        self.set
            .iter()
            .all(|(key, value)| context.get(key) == Some(value))
            && self.remove.iter().all(|key| !context.has(key))
    }

    /// Keys touched by this delta
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.set
            .keys()
            .map(String::as_str)
            .chain(self.remove.iter().map(String::as_str))
    }
}
