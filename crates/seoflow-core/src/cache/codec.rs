//! Artifact serialization formats
//!
//! Every cache entry carries its format tag, so readers decode with the
//! producer's format regardless of what they would write themselves.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::str::FromStr;

/// Serialization format of a cached artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CacheFormat {
    /// Plain JSON
    #[default]
    #[serde(rename = "json")]
    Json,
    /// Gzip-compressed JSON (large keyword tables)
    #[serde(rename = "json+gzip")]
    JsonGzip,
}

impl CacheFormat {
    /// Format tag stored next to the payload
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::JsonGzip => "json+gzip",
        }
    }

    /// Serialize a value
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(value)?;
        match self {
            Self::Json => Ok(json),
            Self::JsonGzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(&json)
                    .map_err(|e| Error::Serialization(format!("gzip encode: {}", e)))?;
                encoder
                    .finish()
                    .map_err(|e| Error::Serialization(format!("gzip encode: {}", e)))
            }
        }
    }

    /// Deserialize a payload produced with this format
    pub fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T> {
        match self {
            Self::Json => Ok(serde_json::from_slice(payload)?),
            Self::JsonGzip => {
                let mut json = Vec::new();
                GzDecoder::new(payload)
                    .read_to_end(&mut json)
                    .map_err(|e| Error::Serialization(format!("gzip decode: {}", e)))?;
                Ok(serde_json::from_slice(&json)?)
            }
        }
    }
}

impl std::fmt::Display for CacheFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(Self::Json),
            "json+gzip" | "gzip" => Ok(Self::JsonGzip),
            other => Err(Error::Configuration(format!(
                "Unknown cache format: '{}'. Use 'json' or 'json+gzip'.",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_gzip_payload_is_not_plain_json() {
        let value = json!({"rows": vec!["gaming mouse"; 200]});
        let gz = CacheFormat::JsonGzip.encode(&value).unwrap();
        let plain = CacheFormat::Json.encode(&value).unwrap();

        assert!(gz.len() < plain.len());
        assert!(CacheFormat::Json.decode::<serde_json::Value>(&gz).is_err());
        assert_eq!(
            CacheFormat::JsonGzip.decode::<serde_json::Value>(&gz).unwrap(),
            value
        );
    }

    #[test]
    fn test_format_tags() {
        assert_eq!("json".parse::<CacheFormat>().unwrap(), CacheFormat::Json);
        assert_eq!(
            "json+gzip".parse::<CacheFormat>().unwrap(),
            CacheFormat::JsonGzip
        );
        assert!("msgpack".parse::<CacheFormat>().is_err());
        assert_eq!(CacheFormat::JsonGzip.to_string(), "json+gzip");
    }
}
