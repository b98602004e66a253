//! Deterministic cache keys
//!
//! A fingerprint is `<scope>:<operation>:v<schema>:<sha256>` where the hash
//! covers the operation name, schema version, scope and the canonical JSON
//! of every named input. Object keys are sorted recursively before hashing,
//! so logically equal inputs always hash the same.

use crate::error::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// Bump when the shape of any cached artifact changes
pub const SCHEMA_VERSION: u32 = 1;

/// Visibility of a cached artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Shared by every session whose inputs coincide
    Global,
    /// Private to one session
    Session(String),
}

impl Scope {
    /// Key prefix covering every entry of this scope
    #[must_use]
    pub fn key_prefix(&self) -> String {
        match self {
            Scope::Global => "g:".to_string(),
            Scope::Session(id) => format!("s:{}:", escape_component(id)),
        }
    }
}

/// Percent-encode anything that could collide with key separators or
/// glob metacharacters.
fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        } else {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    out
}

/// Trim and case-fold free text so cosmetic differences share a key
#[must_use]
pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A deterministic cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    key: String,
    scope: Scope,
}

impl Fingerprint {
    /// Start building a fingerprint for `operation`
    #[must_use]
    pub fn builder(operation: impl Into<String>) -> FingerprintBuilder {
        FingerprintBuilder {
            operation: operation.into(),
            scope: Scope::Global,
            schema_version: SCHEMA_VERSION,
            inputs: Vec::new(),
        }
    }

    /// Key string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Scope the key was built with
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Builder for [`Fingerprint`]
#[derive(Debug, Clone)]
pub struct FingerprintBuilder {
    operation: String,
    scope: Scope,
    schema_version: u32,
    inputs: Vec<(String, serde_json::Value)>,
}

impl FingerprintBuilder {
    /// Set the scope
    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Override the schema version
    #[must_use]
    pub fn schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    /// Add a named input
    pub fn input<T: Serialize + ?Sized>(mut self, name: &str, value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)?;
        self.inputs.push((name.to_string(), value));
        Ok(self)
    }

    /// Compute the fingerprint
    #[must_use]
    pub fn build(mut self) -> Fingerprint {
        self.inputs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut canonical = String::new();
        canonical.push_str(&self.operation);
        canonical.push('\n');
        canonical.push_str(&self.schema_version.to_string());
        canonical.push('\n');
        canonical.push_str(&self.scope.key_prefix());
        for (name, value) in &self.inputs {
            canonical.push('\n');
            canonical.push_str(name);
            canonical.push('=');
            write_canonical(value, &mut canonical);
        }

        let digest = Sha256::digest(canonical.as_bytes());
        let key = format!(
            "{}{}:v{}:{:x}",
            self.scope.key_prefix(),
            escape_component(&self.operation),
            self.schema_version,
            digest
        );

        Fingerprint {
            key,
            scope: self.scope,
        }
    }
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
