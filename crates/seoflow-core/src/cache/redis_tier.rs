use super::{CacheEntry, CacheFormat, DistributedTier};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Compare-and-delete so a process only ever releases its own lease
const RELEASE_LEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed distributed cache tier
///
/// Each entry is a hash (`format`, `computed_at`, `ttl_ms`, `payload`)
/// written atomically together with its `PEXPIRE`, so Redis drops it at the
/// same moment readers would consider it expired.
pub struct RedisTier {
    client: redis::Client,
    /// Key prefix isolating seoflow data from other Redis users
    prefix: String,
}

impl RedisTier {
    /// Create a new Redis tier
    ///
    /// # Errors
    ///
    /// Returns error if the Redis URL is invalid
    pub fn new(redis_url: &str) -> Result<Self> {
        Self::with_prefix(redis_url, "seoflow:")
    }

    /// Create with a custom key prefix
    pub fn with_prefix(redis_url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Configuration(format!("Invalid Redis URL: {}", e)))?;

        Ok(Self {
            client,
            prefix: prefix.to_string(),
        })
    }

    fn entry_key(&self, key: &str) -> String {
        format!("{}entry:{}", self.prefix, key)
    }

    fn lease_key(&self, key: &str) -> String {
        format!("{}lease:{}", self.prefix, key)
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::Cache(format!("Redis connection failed: {}", e)))
    }
}

fn field<'a>(fields: &'a HashMap<String, Vec<u8>>, name: &str) -> Result<&'a [u8]> {
    fields
        .get(name)
        .map(Vec::as_slice)
        .ok_or_else(|| Error::Cache(format!("cache entry missing field '{}'", name)))
}

fn field_str<'a>(fields: &'a HashMap<String, Vec<u8>>, name: &str) -> Result<&'a str> {
    std::str::from_utf8(field(fields, name)?)
        .map_err(|e| Error::Cache(format!("cache entry field '{}' is not UTF-8: {}", name, e)))
}

fn decode_entry(key: &str, fields: &HashMap<String, Vec<u8>>) -> Result<CacheEntry> {
    let format: CacheFormat = field_str(fields, "format")?.parse()?;
    let computed_at = DateTime::parse_from_rfc3339(field_str(fields, "computed_at")?)
        .map_err(|e| Error::Cache(format!("bad computed_at: {}", e)))?
        .with_timezone(&Utc);
    let ttl_ms: u64 = field_str(fields, "ttl_ms")?
        .parse()
        .map_err(|e| Error::Cache(format!("bad ttl_ms: {}", e)))?;

    Ok(CacheEntry {
        key: key.to_string(),
        format,
        payload: field(fields, "payload")?.to_vec(),
        computed_at,
        ttl: Duration::from_millis(ttl_ms),
    })
}

#[async_trait]
impl DistributedTier for RedisTier {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut conn = self.get_connection().await?;

        let fields: HashMap<String, Vec<u8>> = redis::cmd("HGETALL")
            .arg(self.entry_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Cache(format!("Redis HGETALL failed: {}", e)))?;

        if fields.is_empty() {
            return Ok(None);
        }

        let entry = decode_entry(key, &fields)?;
        if entry.is_expired() {
            return Ok(None);
        }
        debug!(key = %key, format = %entry.format, "Cache entry loaded from Redis");
        Ok(Some(entry))
    }

    async fn set(&self, entry: &CacheEntry) -> Result<()> {
        let ttl_ms = entry.remaining_ttl().as_millis() as u64;
        if ttl_ms == 0 {
            return Ok(());
        }

        let mut conn = self.get_connection().await?;
        let key = self.entry_key(&entry.key);

        redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(&key)
            .ignore()
            .cmd("HSET")
            .arg(&key)
            .arg("format")
            .arg(entry.format.as_str())
            .arg("computed_at")
            .arg(entry.computed_at.to_rfc3339())
            .arg("ttl_ms")
            .arg(entry.ttl.as_millis() as u64)
            .arg("payload")
            .arg(entry.payload.as_slice())
            .ignore()
            .cmd("PEXPIRE")
            .arg(&key)
            .arg(ttl_ms)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| Error::Cache(format!("Redis HSET failed: {}", e)))?;

        debug!(key = %entry.key, ttl_ms = ttl_ms, "Cache entry saved to Redis");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.get_connection().await?;

        let deleted: i64 = redis::cmd("DEL")
            .arg(self.entry_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Cache(format!("Redis DEL failed: {}", e)))?;

        Ok(deleted > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut conn = self.get_connection().await?;
        let pattern = format!("{}*", self.entry_key(prefix));

        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Cache(format!("Redis KEYS failed: {}", e)))?;

        if keys.is_empty() {
            return Ok(0);
        }

        let deleted: i64 = redis::cmd("DEL")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Cache(format!("Redis DEL failed: {}", e)))?;

        warn!(
            pattern = %pattern,
            deleted = deleted,
            "Deleted cache entries by prefix (KEYS scan)"
        );
        Ok(deleted as usize)
    }

    async fn acquire_lease(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.get_connection().await?;

        let reply: Option<String> = redis::cmd("SET")
            .arg(self.lease_key(key))
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Cache(format!("Redis SET NX failed: {}", e)))?;

        Ok(reply.is_some())
    }

    async fn release_lease(&self, key: &str, owner: &str) -> Result<bool> {
        let mut conn = self.get_connection().await?;

        let released: i64 = redis::cmd("EVAL")
            .arg(RELEASE_LEASE_SCRIPT)
            .arg(1)
            .arg(self.lease_key(key))
            .arg(owner)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Cache(format!("Redis lease release failed: {}", e)))?;

        Ok(released > 0)
    }

    async fn lease_held(&self, key: &str) -> Result<bool> {
        let mut conn = self.get_connection().await?;

        let exists: i64 = redis::cmd("EXISTS")
            .arg(self.lease_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Cache(format!("Redis EXISTS failed: {}", e)))?;

        Ok(exists > 0)
    }
}
