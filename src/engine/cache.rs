use std::collections::HashMap;
use std::time::Duration;

use moka::sync::Cache;

use crate::engine::Entry;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Entry { table: String, key: String },
    Table(String),
}

#[derive(Debug, Clone)]
enum Cached {
    Entry(Option<Entry>),
    Table(Option<HashMap<String, Entry>>),
}

/// Bounded, time-limited memoization of `get` and `get_all` results.
///
/// A hit is served without reloading or purging, so it may be stale for up
/// to the configured TTL: entries written by another process, or entries
/// that expired after being cached, are not reflected until the cached
/// result ages out. Local writes invalidate the keys they touch.
///
/// The TTL is therefore also the longest time an expired entry can still be
/// returned after its `expired` timestamp.
pub struct ReadCache {
    inner: Option<Cache<CacheKey, Cached>>,
}

impl ReadCache {
    /// Creates a cache holding at most `capacity` results for `ttl` each.
    /// A capacity of 0 disables caching.
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let inner = (capacity > 0).then(|| {
            Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build()
        });
        Self { inner }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Outer `None` is a miss; inner `None` is a cached absent entry.
    pub fn get_entry(&self, table: &str, key: &str) -> Option<Option<Entry>> {
        match self.inner.as_ref()?.get(&entry_key(table, key))? {
            Cached::Entry(entry) => Some(entry),
            Cached::Table(_) => None,
        }
    }

    pub fn put_entry(&self, table: &str, key: &str, entry: Option<Entry>) {
        if let Some(cache) = &self.inner {
            cache.insert(entry_key(table, key), Cached::Entry(entry));
        }
    }

    pub fn get_table(&self, table: &str) -> Option<Option<HashMap<String, Entry>>> {
        match self.inner.as_ref()?.get(&CacheKey::Table(table.to_string()))? {
            Cached::Table(entries) => Some(entries),
            Cached::Entry(_) => None,
        }
    }

    pub fn put_table(&self, table: &str, entries: Option<HashMap<String, Entry>>) {
        if let Some(cache) = &self.inner {
            cache.insert(CacheKey::Table(table.to_string()), Cached::Table(entries));
        }
    }

    /// Drops the cached results a write to `table`/`key` makes stale.
    pub fn invalidate(&self, table: &str, key: &str) {
        if let Some(cache) = &self.inner {
            cache.invalidate(&entry_key(table, key));
            cache.invalidate(&CacheKey::Table(table.to_string()));
        }
    }

    /// Drops every cached result. Used for clears, which touch every key
    /// of a table.
    pub fn invalidate_all(&self) {
        if let Some(cache) = &self.inner {
            cache.invalidate_all();
        }
    }
}

fn entry_key(table: &str, key: &str) -> CacheKey {
    CacheKey::Entry {
        table: table.to_string(),
        key: key.to_string(),
    }
}
