//! Cache Layer - two-tier artifact cache
//!
//! - In-process tier ([`LocalTier`]): checked first, populated on read-through
//! - Distributed tier ([`DistributedTier`]): source of truth shared by the
//!   process group (Redis in production, [`MemoryTier`] for development)
//!
//! Writes go to the distributed tier first. When that fails the local tier is
//! left untouched so processes never disagree about what is cached.

mod codec;
mod entry;
mod fingerprint;
mod local;
mod memory_tier;
mod redis_tier;

pub use codec::CacheFormat;
pub use entry::CacheEntry;
pub use fingerprint::{normalize_text, Fingerprint, FingerprintBuilder, Scope, SCHEMA_VERSION};
pub use local::{LocalTier, DEFAULT_LOCAL_MAX_ENTRIES};
pub use memory_tier::MemoryTier;
pub use redis_tier::RedisTier;

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shared key/value service backing the cache and the cross-process lease
#[async_trait]
pub trait DistributedTier: Send + Sync {
    /// Fresh entry for `key`, or `None`
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Store an entry with its TTL
    async fn set(&self, entry: &CacheEntry) -> Result<()>;

    /// Remove an entry
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every entry whose key starts with `prefix`
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;

    /// Try to become the only in-flight computation for `key` across the
    /// process group. Returns `false` when another owner holds the lease.
    async fn acquire_lease(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool>;

    /// Release a lease held by `owner`; a lease held by someone else is kept
    async fn release_lease(&self, key: &str, owner: &str) -> Result<bool>;

    /// Whether any unexpired lease exists for `key`
    async fn lease_held(&self, key: &str) -> Result<bool>;
}

/// Result of a cache lookup
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Fresh entry found
    Hit(CacheEntry),
    /// Absent or expired
    Miss,
}

impl CacheLookup {
    /// Entry on hit
    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            Self::Hit(entry) => Some(entry),
            Self::Miss => None,
        }
    }

    /// Whether this is a hit
    #[must_use]
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

/// Two-tier cache
pub struct TwoTierCache {
    local: LocalTier,
    remote: Arc<dyn DistributedTier>,
    format: CacheFormat,
    default_ttl: Duration,
}

impl TwoTierCache {
    /// Create a cache over the given distributed tier
    pub fn new(remote: Arc<dyn DistributedTier>) -> Self {
        Self {
            local: LocalTier::default(),
            remote,
            format: CacheFormat::default(),
            default_ttl: Duration::from_secs(default_ttl_secs()),
        }
    }

    /// Format used for new writes
    #[must_use]
    pub fn with_format(mut self, format: CacheFormat) -> Self {
        self.format = format;
        self
    }

    /// TTL applied by [`TwoTierCache::write_value`] when none is given
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Bound the in-process tier
    #[must_use]
    pub fn with_local_capacity(mut self, max_entries: usize) -> Self {
        self.local = LocalTier::new(max_entries);
        self
    }

    /// Distributed tier (used for leases)
    pub fn remote(&self) -> &Arc<dyn DistributedTier> {
        &self.remote
    }

    /// Format used for new writes
    #[must_use]
    pub fn format(&self) -> CacheFormat {
        self.format
    }

    /// Default TTL
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up `key`: local tier, then distributed tier with read-through.
    ///
    /// A distributed-tier failure degrades to `Miss`; the value is
    /// recomputable.
    pub async fn read(&self, key: &str) -> CacheLookup {
        if let Some(entry) = self.local.get(key) {
            debug!(key = %key, "Local cache hit");
            return CacheLookup::Hit(entry);
        }

        match self.remote.get(key).await {
            Ok(Some(entry)) if !entry.is_expired() => {
                debug!(key = %key, "Distributed cache hit");
                self.local.insert(entry.clone());
                CacheLookup::Hit(entry)
            }
            Ok(_) => CacheLookup::Miss,
            Err(e) => {
                warn!(key = %key, error = %e, "Distributed cache read failed, treating as miss");
                CacheLookup::Miss
            }
        }
    }

    /// Look up and decode `key`. Undecodable entries are treated as a miss.
    pub async fn read_value<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.read(key).await.into_entry()?;
        match entry.decode() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    key = %key,
                    format = %entry.format,
                    error = %e,
                    "Cached artifact could not be decoded"
                );
                None
            }
        }
    }

    /// Store an already-serialized entry
    ///
    /// # Errors
    ///
    /// Returns the distributed-tier error; the local tier is not updated then.
    pub async fn write(&self, entry: CacheEntry) -> Result<()> {
        self.remote.set(&entry).await?;
        debug!(key = %entry.key, ttl_secs = entry.ttl.as_secs(), "Cache entry written");
        self.local.insert(entry);
        Ok(())
    }

    /// Serialize `value` with the configured format and store it
    pub async fn write_value<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let payload = self.format.encode(value)?;
        let entry = CacheEntry::new(key, self.format, payload, ttl.unwrap_or(self.default_ttl));
        self.write(entry).await
    }

    /// Remove `key` from both tiers
    ///
    /// The distributed copy goes first so a concurrent read cannot
    /// repopulate the local tier from it.
    pub async fn invalidate(&self, key: &str) -> Result<()> {
        self.remote.delete(key).await?;
        self.local.remove(key);
        debug!(key = %key, "Cache entry invalidated");
        Ok(())
    }

    /// Remove every entry of `scope` from both tiers
    pub async fn invalidate_scope(&self, scope: &Scope) -> Result<usize> {
        let prefix = scope.key_prefix();
        let remote = self.remote.delete_prefix(&prefix).await?;
        let local = self.local.remove_prefix(&prefix);
        info!(prefix = %prefix, local = local, remote = remote, "Cache scope invalidated");
        Ok(local.max(remote))
    }

    /// Drop expired in-process entries
    pub fn sweep_local(&self) -> usize {
        self.local.sweep_expired()
    }

    /// Number of resident in-process entries
    #[must_use]
    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "seoflow:".to_string()
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_lease_ttl_secs() -> u64 {
    120
}

fn default_lease_poll_interval_ms() -> u64 {
    200
}

fn default_local_max_entries() -> usize {
    DEFAULT_LOCAL_MAX_ENTRIES
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Distributed tier backend: "redis" or "memory"
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Redis URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Prefix for every Redis key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// TTL for entries written without an explicit one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Format for new writes
    #[serde(default)]
    pub format: CacheFormat,
    /// Cross-process in-flight lease TTL
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    /// How often a process waiting on a foreign lease re-checks the cache
    #[serde(default = "default_lease_poll_interval_ms")]
    pub lease_poll_interval_ms: u64,
    /// In-process tier capacity
    #[serde(default = "default_local_max_entries")]
    pub local_max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            default_ttl_secs: default_ttl_secs(),
            format: CacheFormat::default(),
            lease_ttl_secs: default_lease_ttl_secs(),
            lease_poll_interval_ms: default_lease_poll_interval_ms(),
            local_max_entries: default_local_max_entries(),
        }
    }
}

impl CacheConfig {
    /// Lease TTL as a duration
    #[must_use]
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs.max(1))
    }

    /// Lease poll interval as a duration
    #[must_use]
    pub fn lease_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lease_poll_interval_ms.max(10))
    }
}

/// Distributed tier selected by configuration
pub enum CacheBackend {
    /// Redis
    Redis(RedisTier),
    /// In-process stand-in
    Memory(MemoryTier),
}

impl CacheBackend {
    /// Create the backend named by `config.backend`
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        match config.backend.to_lowercase().as_str() {
            "redis" => {
                info!(url = %config.redis_url, "Using Redis distributed cache tier");
                Ok(Self::Redis(RedisTier::with_prefix(
                    &config.redis_url,
                    &config.key_prefix,
                )?))
            }
            "memory" => {
                info!("Using in-memory distributed cache tier");
                Ok(Self::Memory(MemoryTier::new()))
            }
            other => Err(Error::Configuration(format!(
                "Unknown cache backend: '{}'. Use 'redis' or 'memory'.",
                other
            ))),
        }
    }

    /// Build the two-tier cache around this backend
    pub fn into_cache(self, config: &CacheConfig) -> TwoTierCache {
        let remote: Arc<dyn DistributedTier> = match self {
            Self::Redis(tier) => Arc::new(tier),
            Self::Memory(tier) => Arc::new(tier),
        };
        TwoTierCache::new(remote)
            .with_format(config.format)
            .with_default_ttl(Duration::from_secs(config.default_ttl_secs))
            .with_local_capacity(config.local_max_entries)
    }
}
