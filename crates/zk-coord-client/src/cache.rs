//! Concurrent cache of per-path store snapshots.
//!
//! Entries are immutable snapshots of `(stat, data, children)` replaced
//! wholesale, never field-merged in place. Removing a path also evicts
//! its parent, whose child listing is now stale. The sharded
//! implementation avoids a single global lock; an optional capacity bound
//! evicts least-recently-used entries per shard.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use zk_coord_store::paths;
use zk_coord_store::types::Stat;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Immutable snapshot of one path.
#[derive(Debug, Clone)]
pub struct PathCacheEntry {
    pub stat: Stat,
    pub data: Option<Arc<[u8]>>,
    pub children: Option<Arc<[String]>>,
    pub last_updated_millis: u64,
}

impl PathCacheEntry {
    fn new(stat: Stat, data: Option<Vec<u8>>, children: Option<Vec<String>>) -> Self {
        Self {
            stat,
            data: data.map(Arc::from),
            children: children.map(Arc::from),
            last_updated_millis: now_millis(),
        }
    }

    fn is_stale(&self, ttl_millis: u64) -> bool {
        ttl_millis > 0 && now_millis().saturating_sub(self.last_updated_millis) > ttl_millis
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Cache of `(stat, data, children)` snapshots per path.
pub trait PathCache: Send + Sync {
    /// Returns the cached entry, counting a hit or miss.
    fn get(&self, path: &str) -> Option<PathCacheEntry>;

    /// Like `get`, but treats entries older than `ttl_millis` as misses
    /// (the entry stays stored). `ttl_millis` of 0 disables the check.
    fn get_fresh(&self, path: &str, ttl_millis: u64) -> Option<PathCacheEntry>;

    /// Unconditionally inserts/replaces the entry, returning the new one.
    fn put(
        &self,
        path: &str,
        stat: Stat,
        data: Option<Vec<u8>>,
        children: Option<Vec<String>>,
    ) -> PathCacheEntry;

    /// Rebuilds an existing entry with new data; no-op when absent.
    fn update_data(&self, path: &str, data: Vec<u8>) -> Option<PathCacheEntry>;

    /// Rebuilds an existing entry with a new child list; no-op when absent.
    fn update_children(&self, path: &str, children: Vec<String>) -> Option<PathCacheEntry>;

    /// Rebuilds an existing entry with a new stat; no-op when absent.
    fn update_stat(&self, path: &str, stat: Stat) -> Option<PathCacheEntry>;

    /// Evicts the path and its logical parent; returns what was removed
    /// at `path` itself.
    fn remove(&self, path: &str) -> Option<PathCacheEntry>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stats(&self) -> CacheStats;
}

struct Shard {
    entries: HashMap<String, (PathCacheEntry, u64)>,
}

/// Sharded, optionally capacity-bounded [`PathCache`].
pub struct ShardedPathCache {
    shards: Box<[Mutex<Shard>]>,
    shard_mask: usize,
    /// Per-shard entry bound; `None` means unbounded.
    shard_capacity: Option<usize>,
    access_clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ShardedPathCache {
    /// `capacity` bounds the total entry count (approximately, split
    /// across shards); `shard_count` is rounded up to a power of two.
    pub fn new(capacity: Option<usize>, shard_count: usize) -> Self {
        let shard_count = shard_count.max(1).next_power_of_two();
        let shards = (0..shard_count)
            .map(|_| {
                Mutex::new(Shard {
                    entries: HashMap::new(),
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let shard_capacity = capacity.map(|c| c.div_ceil(shard_count).max(1));
        Self {
            shards,
            shard_mask: shard_count - 1,
            shard_capacity,
            access_clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn shard_for(&self, path: &str) -> &Mutex<Shard> {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & self.shard_mask]
    }

    fn lock_shard(&self, path: &str) -> std::sync::MutexGuard<'_, Shard> {
        self.shard_for(path)
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stamp(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::Relaxed)
    }

    fn lookup(&self, path: &str, ttl_millis: u64) -> Option<PathCacheEntry> {
        let stamp = self.stamp();
        let mut shard = self.lock_shard(path);
        match shard.entries.get_mut(path) {
            Some((entry, access)) if !entry.is_stale(ttl_millis) => {
                *access = stamp;
                let entry = entry.clone();
                drop(shard);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            _ => {
                drop(shard);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn replace_with<F>(&self, path: &str, rebuild: F) -> Option<PathCacheEntry>
    where
        F: FnOnce(&PathCacheEntry) -> PathCacheEntry,
    {
        let stamp = self.stamp();
        let mut shard = self.lock_shard(path);
        let (existing, _) = shard.entries.get(path)?;
        let rebuilt = rebuild(existing);
        shard
            .entries
            .insert(path.to_string(), (rebuilt.clone(), stamp));
        Some(rebuilt)
    }

    fn evict_lru(shard: &mut Shard) {
        let victim = shard
            .entries
            .iter()
            .min_by_key(|(_, (_, access))| *access)
            .map(|(path, _)| path.clone());
        if let Some(path) = victim {
            shard.entries.remove(&path);
        }
    }
}

impl PathCache for ShardedPathCache {
    fn get(&self, path: &str) -> Option<PathCacheEntry> {
        self.lookup(path, 0)
    }

    fn get_fresh(&self, path: &str, ttl_millis: u64) -> Option<PathCacheEntry> {
        self.lookup(path, ttl_millis)
    }

    fn put(
        &self,
        path: &str,
        stat: Stat,
        data: Option<Vec<u8>>,
        children: Option<Vec<String>>,
    ) -> PathCacheEntry {
        let entry = PathCacheEntry::new(stat, data, children);
        let stamp = self.stamp();
        let mut shard = self.lock_shard(path);
        shard
            .entries
            .insert(path.to_string(), (entry.clone(), stamp));
        if let Some(capacity) = self.shard_capacity {
            while shard.entries.len() > capacity {
                Self::evict_lru(&mut shard);
            }
        }
        entry
    }

    fn update_data(&self, path: &str, data: Vec<u8>) -> Option<PathCacheEntry> {
        self.replace_with(path, |existing| {
            PathCacheEntry::new(
                existing.stat,
                Some(data),
                existing.children.as_ref().map(|c| c.to_vec()),
            )
        })
    }

    fn update_children(&self, path: &str, children: Vec<String>) -> Option<PathCacheEntry> {
        self.replace_with(path, |existing| {
            PathCacheEntry::new(
                existing.stat,
                existing.data.as_ref().map(|d| d.to_vec()),
                Some(children),
            )
        })
    }

    fn update_stat(&self, path: &str, stat: Stat) -> Option<PathCacheEntry> {
        self.replace_with(path, |existing| {
            PathCacheEntry::new(
                stat,
                existing.data.as_ref().map(|d| d.to_vec()),
                existing.children.as_ref().map(|c| c.to_vec()),
            )
        })
    }

    fn remove(&self, path: &str) -> Option<PathCacheEntry> {
        let removed = self
            .lock_shard(path)
            .entries
            .remove(path)
            .map(|(entry, _)| entry);
        if let Some(parent) = paths::parent_of(path) {
            self.lock_shard(parent).entries.remove(parent);
        }
        removed
    }

    fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .entries
                    .len()
            })
            .sum()
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// A [`PathCache`] that stores nothing: every `get` is a miss, every
/// mutation a no-op. For tests and cache-disabled deployments.
#[derive(Default)]
pub struct NullPathCache {
    misses: AtomicU64,
}

impl NullPathCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PathCache for NullPathCache {
    fn get(&self, _path: &str) -> Option<PathCacheEntry> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn get_fresh(&self, _path: &str, _ttl_millis: u64) -> Option<PathCacheEntry> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn put(
        &self,
        _path: &str,
        stat: Stat,
        data: Option<Vec<u8>>,
        children: Option<Vec<String>>,
    ) -> PathCacheEntry {
        PathCacheEntry::new(stat, data, children)
    }

    fn update_data(&self, _path: &str, _data: Vec<u8>) -> Option<PathCacheEntry> {
        None
    }

    fn update_children(&self, _path: &str, _children: Vec<String>) -> Option<PathCacheEntry> {
        None
    }

    fn update_stat(&self, _path: &str, _stat: Stat) -> Option<PathCacheEntry> {
        None
    }

    fn remove(&self, _path: &str) -> Option<PathCacheEntry> {
        None
    }

    fn len(&self) -> usize {
        0
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: 0,
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat_with_version(version: i32) -> Stat {
        Stat {
            version,
            ..Stat::default()
        }
    }

    #[test]
    fn round_trips_exactly_what_was_put() {
        let cache = ShardedPathCache::new(None, 4);
        cache.put(
            "/a/b",
            stat_with_version(3),
            Some(b"data".to_vec()),
            Some(vec!["c1".to_string(), "c2".to_string()]),
        );
        let entry = cache.get("/a/b").unwrap();
        assert_eq!(entry.stat.version, 3);
        assert_eq!(entry.data.as_deref(), Some(b"data".as_slice()));
        assert_eq!(
            entry.children.as_deref(),
            Some(["c1".to_string(), "c2".to_string()].as_slice())
        );
    }

    #[test]
    fn ttl_turns_old_entries_into_misses_without_evicting() {
        let cache = ShardedPathCache::new(None, 4);
        cache.put("/a", Stat::default(), None, None);
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert!(cache.get_fresh("/a", 10).is_none());
        // Still stored: an untimed get finds it.
        assert!(cache.get("/a").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_also_evicts_the_parent() {
        let cache = ShardedPathCache::new(None, 4);
        cache.put("/a", Stat::default(), None, Some(vec!["b".to_string()]));
        cache.put("/a/b", Stat::default(), Some(b"x".to_vec()), None);

        let removed = cache.remove("/a/b").unwrap();
        assert_eq!(removed.data.as_deref(), Some(b"x".as_slice()));
        assert!(cache.get("/a").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn updates_replace_a_single_field_and_miss_when_absent() {
        let cache = ShardedPathCache::new(None, 4);
        assert!(cache.update_data("/nope", b"x".to_vec()).is_none());

        cache.put(
            "/a",
            stat_with_version(1),
            Some(b"old".to_vec()),
            Some(vec!["c".to_string()]),
        );
        let updated = cache.update_data("/a", b"new".to_vec()).unwrap();
        assert_eq!(updated.data.as_deref(), Some(b"new".as_slice()));
        assert_eq!(updated.children.as_deref(), Some(["c".to_string()].as_slice()));
        assert_eq!(updated.stat.version, 1);

        let updated = cache.update_stat("/a", stat_with_version(2)).unwrap();
        assert_eq!(updated.stat.version, 2);
        assert_eq!(updated.data.as_deref(), Some(b"new".as_slice()));
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        // One shard so eviction order is observable.
        let cache = ShardedPathCache::new(Some(2), 1);
        cache.put("/a", Stat::default(), None, None);
        cache.put("/b", Stat::default(), None, None);
        cache.get("/a"); // /b is now the LRU entry
        cache.put("/c", Stat::default(), None, None);

        assert!(cache.get("/a").is_some());
        assert!(cache.get("/b").is_none());
        assert!(cache.get("/c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn counts_hits_and_misses() {
        let cache = ShardedPathCache::new(None, 4);
        cache.get("/nope");
        cache.put("/a", Stat::default(), None, None);
        cache.get("/a");
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn null_cache_always_misses() {
        let cache = NullPathCache::new();
        cache.put("/a", Stat::default(), Some(b"x".to_vec()), None);
        assert!(cache.get("/a").is_none());
        assert!(cache.update_data("/a", b"y".to_vec()).is_none());
        assert_eq!(cache.len(), 0);
        // Only lookups count; update_data is not a read.
        assert_eq!(cache.stats().misses, 1);
    }
}
