use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{ReloadPolicy, StoreConfig};
use crate::engine::{Entry, ExpiryPolicy, Persistence, ReadCache, StoreImage, Table};
use crate::{EntryReader, EntryWriter, EphemeralStore, Error, Result, TableAdmin, TableScope};

struct State {
    image: StoreImage,
    dirty: bool,
    last_reload: Instant,
}

struct Inner {
    state: Mutex<State>,
    persistence: Persistence,
    cache: ReadCache,
    config: StoreConfig,
    shutdown_tx: watch::Sender<bool>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

/// The store engine.
///
/// One `Store` is opened at startup and cloned into every consumer; clones
/// share the same image, lock, cache and flusher.
///
/// Each table-scoped operation runs under a single lock: reload the image
/// (per [`ReloadPolicy`]), create the table if missing, purge its expired
/// entries, then execute. Writes only mark the image dirty; a background
/// task writes the whole image to the backing file at most once per
/// `flush_interval`, retrying on the next tick if a write fails.
///
/// Dropping the last handle flushes synchronously on the dropping thread.
/// Prefer [`Store::shutdown`] from async code.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Opens the store described by `config`, loading or creating its backing file.
    ///
    /// Must be called from within a Tokio runtime, which hosts the flusher.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            Error::Internal("Store::open requires a Tokio runtime".to_string())
        })?;

        let persistence = Persistence::new(&config.path)?;
        let image = persistence.load()?;
        info!(
            "Opened store at {:?} with {} tables",
            persistence.path(),
            image.tables.len()
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                image,
                dirty: false,
                last_reload: Instant::now(),
            }),
            persistence,
            cache: ReadCache::new(config.cache_capacity, config.cache_ttl),
            shutdown_tx,
            flusher: Mutex::new(None),
            config,
        });

        let handle = runtime.spawn(flusher_task(
            Arc::downgrade(&inner),
            inner.config.flush_interval,
            shutdown_rx,
        ));
        *inner.flusher.lock().map_err(poisoned)? = Some(handle);

        Ok(Self { inner })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Whether the in-memory image holds writes not yet on disk.
    pub fn is_dirty(&self) -> bool {
        self.inner.lock().map(|s| s.dirty).unwrap_or(false)
    }

    /// Writes the image to the backing file now if it is dirty.
    pub fn flush(&self) -> Result<()> {
        self.inner.flush_if_dirty().map(|_| ())
    }

    /// Stops the flusher and writes any pending changes.
    ///
    /// Writes made after shutdown are flushed synchronously.
    pub async fn shutdown(&self) -> Result<()> {
        let _ = self.inner.shutdown_tx.send(true);
        let handle = self.inner.flusher.lock().map_err(poisoned)?.take();
        if let Some(handle) = handle {
            handle.await.map_err(|e| Error::Internal(e.to_string()))?;
        }
        self.flush()?;
        info!("Store at {:?} shut down", self.inner.persistence.path());
        Ok(())
    }

    async fn blocking<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Inner) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
    }
}

/// Flushes the image on every tick while it is dirty. A failed flush
/// leaves it dirty, so the next tick retries. Exits on shutdown or once
/// every `Store` handle is gone.
async fn flusher_task(
    inner: Weak<Inner>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            res = shutdown_rx.changed() => {
                if res.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
        }

        let Some(inner) = inner.upgrade() else { break };
        match tokio::task::spawn_blocking(move || inner.flush_if_dirty()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!("Background flush failed, retrying next tick: {}", e),
            Err(e) => error!("Background flush task failed: {}", e),
        }
    }
    debug!("Flusher stopped");
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::Internal("store lock poisoned".to_string())
}

impl Inner {
    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(poisoned)
    }

    /// Returns whether anything was written.
    fn flush_if_dirty(&self) -> Result<bool> {
        let mut state = self.lock()?;
        if !state.dirty {
            return Ok(false);
        }
        self.persistence.save(&state.image)?;
        state.dirty = false;
        Ok(true)
    }

    fn reload_if_due(&self, state: &mut State) -> Result<()> {
        // Unflushed writes would be lost by a reload.
        if state.dirty {
            return Ok(());
        }
        let due = match self.config.reload_policy {
            ReloadPolicy::Always => true,
            ReloadPolicy::Interval(every) => state.last_reload.elapsed() >= every,
            ReloadPolicy::Never => false,
        };
        if due {
            state.image = self.persistence.load()?;
            state.last_reload = Instant::now();
        }
        Ok(())
    }

    fn mark_dirty(&self, state: &mut State) -> Result<()> {
        state.dirty = true;
        // Without a running flusher nothing else would persist the write.
        if self.config.sync_writes || *self.shutdown_tx.borrow() {
            self.persistence.save(&state.image)?;
            state.dirty = false;
        }
        Ok(())
    }

    /// Runs `op` against `table` after reloading, creating and purging it,
    /// all under one lock. `op` reports whether it mutated the table.
    fn with_table<R>(
        &self,
        table: &str,
        op: impl FnOnce(&mut Table, DateTime<Utc>) -> (R, bool),
    ) -> Result<R> {
        let mut state = self.lock()?;
        self.reload_if_due(&mut state)?;

        let now = Utc::now();
        let (target, created) = state.image.table_mut(table);
        let purged = target.purge(now);
        if purged > 0 {
            debug!("Purged {} expired entries from {:?}", purged, table);
        }
        let (out, mutated) = op(target, now);

        if created || purged > 0 || mutated {
            self.mark_dirty(&mut state)?;
        }
        Ok(out)
    }

    fn create_table(&self, name: &str) -> Result<Option<Table>> {
        let mut state = self.lock()?;
        self.reload_if_due(&mut state)?;
        let (table, created) = state.image.table_mut(name);
        if !created {
            return Ok(None);
        }
        let table = table.clone();
        self.mark_dirty(&mut state)?;
        Ok(Some(table))
    }

    fn table_names(&self) -> Result<Vec<String>> {
        let mut state = self.lock()?;
        self.reload_if_due(&mut state)?;
        Ok(state.image.table_names())
    }

    fn get(&self, key: &str, table: &str) -> Result<Option<Entry>> {
        if let Some(hit) = self.cache.get_entry(table, key) {
            return Ok(hit);
        }
        self.with_table(table, |t, _| {
            let entry = t.items.get(key).cloned();
            self.cache.put_entry(table, key, entry.clone());
            (entry, false)
        })
    }

    fn get_all(&self, table: &str) -> Result<Option<HashMap<String, Entry>>> {
        if let Some(hit) = self.cache.get_table(table) {
            return Ok(hit);
        }
        self.with_table(table, |t, _| {
            let entries = (!t.is_empty()).then(|| t.items.clone());
            self.cache.put_table(table, entries.clone());
            (entries, false)
        })
    }

    fn get_by_predicate(&self, field: &str, value: &Value, table: &str) -> Result<Entry> {
        self.with_table(table, |t, _| (t.find(field, value).cloned(), false))?
            .ok_or(Error::NotFound)
    }

    fn set(&self, key: &str, value: Value, table: &str, policy: ExpiryPolicy) -> Result<Entry> {
        self.with_table(table, |t, now| {
            let entry = Entry::new(key, value, policy, now);
            t.items.insert(key.to_string(), entry.clone());
            self.cache.invalidate(table, key);
            (entry, true)
        })
    }

    fn update(&self, key: &str, value: Value, table: &str, policy: ExpiryPolicy) -> Result<Entry> {
        self.with_table(table, |t, now| {
            let entry = match t.items.get(key) {
                Some(existing) => existing.renewed(value, policy, now),
                None => Entry::new(key, value, policy, now),
            };
            t.items.insert(key.to_string(), entry.clone());
            self.cache.invalidate(table, key);
            (entry, true)
        })
    }

    fn delete(&self, key: &str, table: &str) -> Result<()> {
        self.with_table(table, |t, _| {
            let removed = t.items.remove(key).is_some();
            self.cache.invalidate(table, key);
            ((), removed)
        })
    }

    fn clear(&self, table: Option<&str>) -> Result<()> {
        match table {
            Some(name) => self.with_table(name, |t, _| {
                t.items.clear();
                ((), true)
            })?,
            None => {
                let mut state = self.lock()?;
                self.reload_if_due(&mut state)?;
                state.image.clear(None);
                self.mark_dirty(&mut state)?;
            }
        }
        self.cache.invalidate_all();
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Err(e) = self.flush_if_dirty() {
            error!("Final flush of {:?} failed: {}", self.persistence.path(), e);
        }
    }
}

#[async_trait]
impl EntryReader for Store {
    async fn get(&self, key: &str, table: &str) -> Result<Option<Entry>> {
        let (key, table) = (key.to_string(), table.to_string());
        self.blocking(move |inner| inner.get(&key, &table)).await
    }

    async fn get_all(&self, table: &str) -> Result<Option<HashMap<String, Entry>>> {
        let table = table.to_string();
        self.blocking(move |inner| inner.get_all(&table)).await
    }

    async fn get_by_predicate(&self, field: &str, value: &Value, table: &str) -> Result<Entry> {
        let (field, value, table) = (field.to_string(), value.clone(), table.to_string());
        self.blocking(move |inner| inner.get_by_predicate(&field, &value, &table))
            .await
    }
}

#[async_trait]
impl EntryWriter for Store {
    async fn set(&self, key: &str, value: Value, table: &str, policy: ExpiryPolicy) -> Result<Entry> {
        let (key, table) = (key.to_string(), table.to_string());
        self.blocking(move |inner| inner.set(&key, value, &table, policy))
            .await
    }

    async fn update(&self, key: &str, value: Value, table: &str, policy: ExpiryPolicy) -> Result<Entry> {
        let (key, table) = (key.to_string(), table.to_string());
        self.blocking(move |inner| inner.update(&key, value, &table, policy))
            .await
    }

    async fn delete(&self, key: &str, table: &str) -> Result<()> {
        let (key, table) = (key.to_string(), table.to_string());
        self.blocking(move |inner| inner.delete(&key, &table)).await
    }

    async fn clear(&self, table: Option<&str>) -> Result<()> {
        let table = table.map(str::to_string);
        self.blocking(move |inner| inner.clear(table.as_deref())).await
    }
}

#[async_trait]
impl TableAdmin for Store {
    async fn create_table(&self, name: &str) -> Result<Option<Table>> {
        let name = name.to_string();
        self.blocking(move |inner| inner.create_table(&name)).await
    }

    async fn table_names(&self) -> Result<Vec<String>> {
        self.blocking(|inner| inner.table_names()).await
    }
}

impl EphemeralStore for Store {
    fn table(&self, name: &str) -> Box<dyn TableScope + '_> {
        Box::new(StoreTableScope {
            store: self,
            name: name.to_string(),
        })
    }
}

pub struct StoreTableScope<'a> {
    store: &'a Store,
    name: String,
}

#[async_trait]
impl<'a> TableScope for StoreTableScope<'a> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Entry>> {
        self.store.get(key, &self.name).await
    }

    async fn get_all(&self) -> Result<Option<HashMap<String, Entry>>> {
        self.store.get_all(&self.name).await
    }

    async fn get_by_predicate(&self, field: &str, value: &Value) -> Result<Entry> {
        self.store.get_by_predicate(field, value, &self.name).await
    }

    async fn set(&self, key: &str, value: Value, policy: ExpiryPolicy) -> Result<Entry> {
        self.store.set(key, value, &self.name, policy).await
    }

    async fn update(&self, key: &str, value: Value, policy: ExpiryPolicy) -> Result<Entry> {
        self.store.update(key, value, &self.name, policy).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(key, &self.name).await
    }

    async fn clear(&self) -> Result<()> {
        self.store.clear(Some(&self.name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn open(dir: &TempDir, config: StoreConfig) -> Store {
        Store::open(config.with_path(dir.path().join("storage.json"))).unwrap()
    }

    fn write_expired(dir: &TempDir, table: &str, key: &str) {
        let created = Utc::now() - ChronoDuration::hours(1);
        let mut image = StoreImage::new();
        let (t, _) = image.table_mut(table);
        t.items.insert(key.to_string(), Entry::new(key, json!("stale"), ExpiryPolicy::Default, created));
        Persistence::new(dir.path().join("storage.json")).unwrap().save(&image).unwrap();
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let dir = tempdir().unwrap();
        let store = open(&dir, StoreConfig::default());

        let written = store.set("u1", json!({"a": 1}), "t", ExpiryPolicy::Default).await.unwrap();
        let got = store.get("u1", "t").await.unwrap().unwrap();

        assert_eq!(got.value, json!({"a": 1}));
        assert_eq!(got.created, got.updated);
        assert_eq!(got.id, written.id);
        assert_eq!(got.expired - got.created, ChronoDuration::minutes(15));
    }

    #[tokio::test]
    async fn test_policy_ttls() {
        let dir = tempdir().unwrap();
        let store = open(&dir, StoreConfig::default());

        let long = store.set("a", json!(1), "t", ExpiryPolicy::LongLived).await.unwrap();
        let short = store.set("b", json!(1), "t", ExpiryPolicy::ShortLived).await.unwrap();
        assert_eq!(long.expired - long.created, ChronoDuration::days(30));
        assert_eq!(short.expired - short.created, ChronoDuration::minutes(1));
    }

    #[tokio::test]
    async fn test_update_existing_and_absent() {
        let dir = tempdir().unwrap();
        let store = open(&dir, StoreConfig::default());

        let original = store.set("k", json!("v1"), "t", ExpiryPolicy::Default).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let updated = store.update("k", json!("v2"), "t", ExpiryPolicy::ShortLived).await.unwrap();

        assert_eq!(updated.created, original.created);
        assert!(updated.updated > original.updated);
        assert_ne!(updated.expired, original.expired);
        assert_ne!(updated.id, original.id);
        assert_eq!(updated.expired - updated.updated, ChronoDuration::minutes(1));

        let fresh = store.update("new", json!("v"), "t", ExpiryPolicy::Default).await.unwrap();
        assert_eq!(fresh.created, fresh.updated);
        assert_eq!(store.get("new", "t").await.unwrap().unwrap().value, json!("v"));
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = tempdir().unwrap();
        let store = open(&dir, StoreConfig::default());

        store.set("k", json!(1), "t", ExpiryPolicy::Default).await.unwrap();
        assert!(store.get("k", "t").await.unwrap().is_some());
        store.delete("k", "t").await.unwrap();
        assert!(store.get("k", "t").await.unwrap().is_none());

        store.delete("k", "never-populated").await.unwrap();
        assert!(store.table_names().await.unwrap().contains(&"never-populated".to_string()));
    }

    #[tokio::test]
    async fn test_missing_table_reads_as_absent() {
        let dir = tempdir().unwrap();
        let store = open(&dir, StoreConfig::default());

        assert!(store.get("k", "nope").await.unwrap().is_none());
        assert!(store.get_all("nope").await.unwrap().is_none());
        assert!(matches!(
            store.get_by_predicate("email", &json!("x"), "nope").await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_create_table_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = open(&dir, StoreConfig::default());

        let created = store.create_table("ban-token").await.unwrap().unwrap();
        assert_eq!(created.name, "ban-token");
        assert!(created.is_empty());
        assert!(store.create_table("ban-token").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_one_and_all() {
        let dir = tempdir().unwrap();
        let store = open(&dir, StoreConfig::default());

        store.set("k", json!(1), "a", ExpiryPolicy::Default).await.unwrap();
        store.set("k", json!(1), "b", ExpiryPolicy::Default).await.unwrap();

        store.clear(Some("a")).await.unwrap();
        assert!(store.get_all("a").await.unwrap().is_none());
        assert_eq!(store.get_all("b").await.unwrap().unwrap().len(), 1);

        store.clear(None).await.unwrap();
        assert!(store.get_all("b").await.unwrap().is_none());
        assert_eq!(store.table_names().await.unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_expired_entries_are_purged_on_access() {
        let dir = tempdir().unwrap();
        write_expired(&dir, "t", "old");
        let store = open(&dir, StoreConfig::default());

        assert!(store.get_all("t").await.unwrap().is_none());
        store.flush().unwrap();

        let on_disk = Persistence::new(dir.path().join("storage.json")).unwrap().read().unwrap();
        assert!(on_disk.tables["t"].is_empty());
    }

    #[tokio::test]
    async fn test_purge_is_table_scoped() {
        let dir = tempdir().unwrap();
        write_expired(&dir, "stale", "old");
        let store = open(&dir, StoreConfig::default().with_reload_policy(ReloadPolicy::Never));

        store.get("x", "other").await.unwrap();
        let state = store.inner.lock().unwrap();
        assert_eq!(state.image.tables["stale"].items.len(), 1);
    }

    #[tokio::test]
    async fn test_background_flush_writes_file() {
        let dir = tempdir().unwrap();
        let store = open(&dir, StoreConfig::default().with_flush_interval(Duration::from_millis(20)));

        store.set("k", json!("v"), "t", ExpiryPolicy::Default).await.unwrap();

        for _ in 0..100 {
            if !store.is_dirty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!store.is_dirty());

        let on_disk = Persistence::new(dir.path().join("storage.json")).unwrap().read().unwrap();
        assert_eq!(on_disk.tables["t"].items["k"].value, json!("v"));
    }

    #[tokio::test]
    async fn test_sync_writes_flush_immediately() {
        let dir = tempdir().unwrap();
        let store = open(&dir, StoreConfig::default().with_sync_writes(true));

        store.set("k", json!("v"), "t", ExpiryPolicy::Default).await.unwrap();
        assert!(!store.is_dirty());
        let on_disk = Persistence::new(dir.path().join("storage.json")).unwrap().read().unwrap();
        assert!(on_disk.tables["t"].items.contains_key("k"));
    }

    #[tokio::test]
    async fn test_reload_observes_external_writes() {
        let dir = tempdir().unwrap();
        let store = open(&dir, StoreConfig::default().with_cache(0, Duration::from_secs(60)));
        assert!(store.get("k", "t").await.unwrap().is_none());
        store.flush().unwrap();

        let mut image = StoreImage::new();
        let (t, _) = image.table_mut("t");
        t.items.insert("k".into(), Entry::new("k", json!("external"), ExpiryPolicy::Default, Utc::now()));
        Persistence::new(dir.path().join("storage.json")).unwrap().save(&image).unwrap();

        assert_eq!(store.get("k", "t").await.unwrap().unwrap().value, json!("external"));
    }

    #[tokio::test]
    async fn test_never_reload_ignores_external_writes() {
        let dir = tempdir().unwrap();
        let store = open(
            &dir,
            StoreConfig::default()
                .with_reload_policy(ReloadPolicy::Never)
                .with_cache(0, Duration::from_secs(60)),
        );

        let mut image = StoreImage::new();
        let (t, _) = image.table_mut("t");
        t.items.insert("k".into(), Entry::new("k", json!("external"), ExpiryPolicy::Default, Utc::now()));
        Persistence::new(dir.path().join("storage.json")).unwrap().save(&image).unwrap();

        assert!(store.get("k", "t").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cache_serves_stale_reads_within_ttl() {
        let dir = tempdir().unwrap();
        let store = open(&dir, StoreConfig::default());
        store.set("k", json!("mine"), "t", ExpiryPolicy::Default).await.unwrap();
        store.flush().unwrap();
        assert_eq!(store.get("k", "t").await.unwrap().unwrap().value, json!("mine"));

        fs::write(dir.path().join("storage.json"), br#"{"tables":{}}"#).unwrap();

        // Served from the cache, not the file.
        assert_eq!(store.get("k", "t").await.unwrap().unwrap().value, json!("mine"));
    }

    #[tokio::test]
    async fn test_cache_expires_after_ttl() {
        let dir = tempdir().unwrap();
        let store = open(&dir, StoreConfig::default().with_cache(100, Duration::from_millis(50)));
        store.set("k", json!("mine"), "t", ExpiryPolicy::Default).await.unwrap();
        store.flush().unwrap();
        assert!(store.get("k", "t").await.unwrap().is_some());

        fs::write(dir.path().join("storage.json"), br#"{"tables":{}}"#).unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(store.get("k", "t").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_writes_invalidate_cache() {
        let dir = tempdir().unwrap();
        let store = open(&dir, StoreConfig::default());

        assert!(store.get("k", "t").await.unwrap().is_none());
        assert!(store.get_all("t").await.unwrap().is_none());

        store.set("k", json!(1), "t", ExpiryPolicy::Default).await.unwrap();
        assert!(store.get("k", "t").await.unwrap().is_some());
        assert_eq!(store.get_all("t").await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_flushes() {
        let dir = tempdir().unwrap();
        let store = open(&dir, StoreConfig::default().with_flush_interval(Duration::from_secs(3600)));
        store.set("k", json!(1), "t", ExpiryPolicy::Default).await.unwrap();
        store.shutdown().await.unwrap();

        let on_disk = Persistence::new(dir.path().join("storage.json")).unwrap().read().unwrap();
        assert!(on_disk.tables["t"].items.contains_key("k"));
    }

    #[tokio::test]
    async fn test_writes_after_shutdown_are_persisted() {
        let dir = tempdir().unwrap();
        let store = open(&dir, StoreConfig::default());
        store.shutdown().await.unwrap();

        store.set("late", json!(1), "t", ExpiryPolicy::Default).await.unwrap();
        assert!(!store.is_dirty());
        let on_disk = Persistence::new(dir.path().join("storage.json")).unwrap().read().unwrap();
        assert!(on_disk.tables["t"].items.contains_key("late"));
    }

    #[tokio::test]
    async fn test_drop_flushes_pending_writes() {
        let dir = tempdir().unwrap();
        let store = open(&dir, StoreConfig::default().with_flush_interval(Duration::from_secs(3600)));
        store.set("k", json!(1), "t", ExpiryPolicy::Default).await.unwrap();
        assert!(store.is_dirty());

        drop(store);

        let on_disk = Persistence::new(dir.path().join("storage.json")).unwrap().read().unwrap();
        assert!(on_disk.tables["t"].items.contains_key("k"));
    }

    #[tokio::test]
    async fn test_failed_flush_is_retried_on_next_tick() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let path = data_dir.join("storage.json");
        let store = Store::open(
            StoreConfig::default()
                .with_path(&path)
                .with_flush_interval(Duration::from_millis(20))
                .with_reload_policy(ReloadPolicy::Never),
        )
        .unwrap();

        fs::remove_dir_all(&data_dir).unwrap();
        store.set("k", json!("v"), "t", ExpiryPolicy::Default).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.is_dirty());

        fs::create_dir_all(&data_dir).unwrap();
        for _ in 0..100 {
            if !store.is_dirty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!store.is_dirty());

        let on_disk = Persistence::new(&path).unwrap().read().unwrap();
        assert_eq!(on_disk.tables["t"].items["k"].value, json!("v"));
    }

    #[tokio::test]
    async fn test_interval_reload_picks_up_external_writes_later() {
        let dir = tempdir().unwrap();
        let store = open(
            &dir,
            StoreConfig::default()
                .with_reload_policy(ReloadPolicy::Interval(Duration::from_millis(300)))
                .with_cache(0, Duration::ZERO),
        );
        assert!(store.get("k", "t").await.unwrap().is_none());
        store.flush().unwrap();

        let mut image = StoreImage::new();
        let (t, _) = image.table_mut("t");
        t.items.insert("k".into(), Entry::new("k", json!("external"), ExpiryPolicy::Default, Utc::now()));
        Persistence::new(dir.path().join("storage.json")).unwrap().save(&image).unwrap();

        // Still inside the interval: the working copy is not reloaded.
        assert!(store.get("k", "t").await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(store.get("k", "t").await.unwrap().unwrap().value, json!("external"));
    }

    #[tokio::test]
    async fn test_table_scope() {
        let dir = tempdir().unwrap();
        let store = open(&dir, StoreConfig::default());
        let bans = store.table("ban-token");
        assert_eq!(bans.name(), "ban-token");

        bans.set("user-1", json!(["jti-a"]), ExpiryPolicy::LongLived).await.unwrap();
        bans.update("user-1", json!(["jti-a", "jti-b"]), ExpiryPolicy::LongLived).await.unwrap();
        assert_eq!(bans.get("user-1").await.unwrap().unwrap().value, json!(["jti-a", "jti-b"]));
        assert_eq!(bans.get_all().await.unwrap().unwrap().len(), 1);

        bans.delete("user-1").await.unwrap();
        assert!(bans.get("user-1").await.unwrap().is_none());
        bans.clear().await.unwrap();
    }

    #[test]
    fn test_open_without_runtime_fails() {
        let dir = tempdir().unwrap();
        let res = Store::open(StoreConfig::default().with_path(dir.path().join("storage.json")));
        assert!(matches!(res, Err(Error::Internal(_))));
    }
}
