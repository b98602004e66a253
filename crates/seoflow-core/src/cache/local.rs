use super::CacheEntry;
use dashmap::DashMap;
use tracing::debug;

/// Default capacity of the in-process tier
pub const DEFAULT_LOCAL_MAX_ENTRIES: usize = 10_000;

/// In-process cache tier.
///
/// Expired entries are dropped lazily on read; `sweep_expired` exists for
/// memory hygiene only.
pub struct LocalTier {
    entries: DashMap<String, CacheEntry>,
    max_entries: usize,
}

impl LocalTier {
    /// Create a tier bounded to `max_entries`
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Fresh entry for `key`, dropping it if expired
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.get(key).map(|e| e.value().clone())?;
        if entry.is_expired() {
            self.entries.remove(key);
            return None;
        }
        Some(entry)
    }

    /// Insert or replace an entry
    pub fn insert(&self, entry: CacheEntry) {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&entry.key) {
            self.sweep_expired();
            if self.entries.len() >= self.max_entries {
                self.evict_soonest_expiring();
            }
        }
        self.entries.insert(entry.key.clone(), entry);
    }

    /// Remove an entry
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every entry whose key starts with `prefix`
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut removed = 0;
        self.entries.retain(|key, _| {
            let keep = !key.starts_with(prefix);
            removed += usize::from(!keep);
            keep
        });
        removed
    }

    /// Drop expired entries, returning how many were removed
    pub fn sweep_expired(&self) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired();
            removed += usize::from(!keep);
            keep
        });
        if removed > 0 {
            debug!(removed = removed, "Swept expired local cache entries");
        }
        removed
    }

    /// Number of resident entries (expired ones included until swept)
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tier holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_soonest_expiring(&self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|e| e.value().expires_at())
            .map(|e| e.key().clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}

impl Default for LocalTier {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_MAX_ENTRIES)
    }
}
