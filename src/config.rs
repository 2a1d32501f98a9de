use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;

/// Default backing file name.
pub const DEFAULT_PATH: &str = "storage.json";

/// When the engine re-reads the backing file before an operation.
///
/// Re-reading lets other processes (or a restarted one) observe each other's
/// writes, at the cost of a blocking file read. A reload is never performed
/// while the in-memory image holds unflushed writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadPolicy {
    /// Reload before every operation.
    Always,
    /// Reload at most once per interval. External edits may be missed for that long.
    Interval(Duration),
    /// Only load once at open. External edits are never observed.
    Never,
}

impl ReloadPolicy {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "always" => Some(ReloadPolicy::Always),
            "never" => Some(ReloadPolicy::Never),
            ms => ms
                .parse::<u64>()
                .ok()
                .map(|ms| ReloadPolicy::Interval(Duration::from_millis(ms))),
        }
    }
}

/// Configuration for a [`Store`](crate::Store).
///
/// ```rust
/// use ephemeral_store::{ReloadPolicy, StoreConfig};
/// use std::time::Duration;
///
/// let config = StoreConfig::default()
///     .with_path("/tmp/tokens.json")
///     .with_reload_policy(ReloadPolicy::Interval(Duration::from_millis(250)));
/// assert_eq!(config.cache_capacity, 100);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Backing file holding the serialized image.
    pub path: PathBuf,
    /// Tick of the background flusher (default: 1 second).
    pub flush_interval: Duration,
    /// When to re-read the backing file (default: [`ReloadPolicy::Always`]).
    pub reload_policy: ReloadPolicy,
    /// Maximum number of memoized reads (default: 100, 0 disables the cache).
    pub cache_capacity: u64,
    /// How long a memoized read may be served (default: 30 seconds).
    ///
    /// Keep this below the shortest entry TTL (1 minute), or a cached entry
    /// can outlive its own expiry by up to this long.
    pub cache_ttl: Duration,
    /// Flush inside every write instead of waiting for the flusher (default: false).
    pub sync_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_PATH),
            flush_interval: Duration::from_secs(1),
            reload_policy: ReloadPolicy::Always,
            cache_capacity: 100,
            cache_ttl: Duration::from_secs(30),
            sync_writes: false,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from `EPHEMERAL_STORE_*` environment variables,
    /// falling back to the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = env::var("EPHEMERAL_STORE_PATH") {
            if !path.is_empty() {
                config.path = PathBuf::from(path);
            }
        }
        if let Some(ms) = env_parse::<u64>("EPHEMERAL_STORE_FLUSH_MS") {
            config.flush_interval = Duration::from_millis(ms);
        }
        if let Ok(raw) = env::var("EPHEMERAL_STORE_RELOAD") {
            match ReloadPolicy::parse(&raw) {
                Some(policy) => config.reload_policy = policy,
                None => warn!("Ignoring invalid EPHEMERAL_STORE_RELOAD value {:?}", raw),
            }
        }
        if let Some(capacity) = env_parse::<u64>("EPHEMERAL_STORE_CACHE_CAPACITY") {
            config.cache_capacity = capacity;
        }
        if let Some(ms) = env_parse::<u64>("EPHEMERAL_STORE_CACHE_TTL_MS") {
            config.cache_ttl = Duration::from_millis(ms);
        }
        if let Some(sync) = env_parse::<bool>("EPHEMERAL_STORE_SYNC_WRITES") {
            config.sync_writes = sync;
        }

        config
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = path.as_ref().to_path_buf();
        self
    }

    /// Sets the flusher tick. Dirty images are written at most once per tick.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_reload_policy(mut self, policy: ReloadPolicy) -> Self {
        self.reload_policy = policy;
        self
    }

    /// Sets the read cache bounds. A capacity of 0 disables the cache.
    pub fn with_cache(mut self, capacity: u64, ttl: Duration) -> Self {
        self.cache_capacity = capacity;
        self.cache_ttl = ttl;
        self
    }

    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring invalid {} value {:?}", name, raw);
            None
        }
    }
}
