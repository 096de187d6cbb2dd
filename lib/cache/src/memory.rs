//! Process-local cache provider.
//!
//! Entries live in a single map behind a lock, so every provider operation is
//! one atomic read-modify-write. Expired entries are dropped when they are
//! touched, on flush, and by a sweep of the whole map every
//! [`DEFAULT_SWEEP_EVERY`] operations.

use crate::error::CacheError;
use crate::key::Key;
use crate::provider::{CacheLookup, CacheProvider, SetOutcome};
use crate::sentinel::{
    self, CommitDecision, Marker, Sentinel, SentinelKind, can_write_sentinel, commit_decision,
};
use async_trait::async_trait;
use rootcause::Report;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Default lifetime of a sentinel that is never committed or released.
pub const DEFAULT_SENTINEL_TTL: Duration = Duration::from_secs(70);

/// Default lifetime of a tombstone.
pub const DEFAULT_TOMBSTONE_TTL: Duration = Duration::from_secs(5);

/// Default number of operations between sweeps of expired entries.
pub const DEFAULT_SWEEP_EVERY: u64 = 1024;

#[derive(Debug, Clone)]
enum Stored {
    Text(String),
    Keys(Vec<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Stored,
    expires_at: Instant,
}

impl Entry {
    fn text(value: impl Into<String>, ttl: Duration) -> Self {
        Self {
            value: Stored::Text(value.into()),
            expires_at: Instant::now() + ttl,
        }
    }
}

type Entries = HashMap<String, Entry>;

/// An in-memory [`CacheProvider`].
#[derive(Debug, Clone)]
pub struct InMemoryProvider {
    name: String,
    sentinel_ttl: Duration,
    tombstone_ttl: Duration,
    sweep_every: u64,
    operations: Arc<AtomicU64>,
    entries: Arc<RwLock<Entries>>,
}

impl InMemoryProvider {
    /// Creates an empty provider with default sentinel and tombstone TTLs.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sentinel_ttl: DEFAULT_SENTINEL_TTL,
            tombstone_ttl: DEFAULT_TOMBSTONE_TTL,
            sweep_every: DEFAULT_SWEEP_EVERY,
            operations: Arc::new(AtomicU64::new(0)),
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Sets how long an abandoned sentinel survives.
    #[must_use]
    pub fn with_sentinel_ttl(mut self, ttl: Duration) -> Self {
        self.sentinel_ttl = ttl;
        self
    }

    /// Sets how long tombstones survive. Zero disables tombstones.
    #[must_use]
    pub fn with_tombstone_ttl(mut self, ttl: Duration) -> Self {
        self.tombstone_ttl = ttl;
        self
    }

    /// Sweeps expired entries out of the map every `operations` calls.
    /// Zero leaves expired entries until they are touched or flushed.
    #[must_use]
    pub fn with_sweep_every(mut self, operations: u64) -> Self {
        self.sweep_every = operations;
        self
    }

    /// Number of live entries.
    pub fn len(&self) -> Result<usize, Report<CacheError>> {
        let entries = self.lock()?;
        let now = Instant::now();
        Ok(entries.values().filter(|e| e.expires_at > now).count())
    }

    /// Returns true if no live entries remain.
    pub fn is_empty(&self) -> Result<bool, Report<CacheError>> {
        Ok(self.len()? == 0)
    }

    /// Returns the raw string stored at `key`, markers included.
    pub fn raw_value(&self, key: &Key) -> Result<Option<String>, Report<CacheError>> {
        let mut entries = self.lock()?;
        Ok(current(&mut entries, key.as_str()).map(str::to_string))
    }

    /// Returns the dependency list stored at `key`.
    pub fn dependency_list(&self, key: &Key) -> Result<Vec<String>, Report<CacheError>> {
        let mut entries = self.lock()?;
        expire(&mut entries, key.as_str());
        Ok(match entries.get(key.as_str()).map(|e| &e.value) {
            Some(Stored::Keys(keys)) => keys.clone(),
            _ => Vec::new(),
        })
    }

    fn lock(&self) -> Result<RwLockWriteGuard<'_, Entries>, Report<CacheError>> {
        let mut entries = self.entries.write().map_err(|e| -> Report<CacheError> {
            CacheError::ProviderUnavailable {
                details: e.to_string(),
            }
            .into()
        })?;
        let operations = self.operations.fetch_add(1, Ordering::Relaxed) + 1;
        if self.sweep_every > 0 && operations % self.sweep_every == 0 {
            sweep(&mut entries);
        }
        Ok(entries)
    }

    fn tombstones_enabled(&self) -> bool {
        !self.tombstone_ttl.is_zero()
    }

    fn tombstone(&self, entries: &mut Entries, key: &str) {
        entries.insert(
            key.to_string(),
            Entry::text(sentinel::new_tombstone(), self.tombstone_ttl),
        );
    }
}

fn sweep(entries: &mut Entries) {
    let now = Instant::now();
    let before = entries.len();
    entries.retain(|_, e| e.expires_at > now);
    let removed = before - entries.len();
    if removed > 0 {
        trace!(removed, remaining = entries.len(), "swept expired entries");
    }
}

fn expire(entries: &mut Entries, key: &str) {
    if entries
        .get(key)
        .is_some_and(|e| e.expires_at <= Instant::now())
    {
        entries.remove(key);
    }
}

/// Live string content of `key`. Dependency lists read as an empty plain value.
fn current<'a>(entries: &'a mut Entries, key: &str) -> Option<&'a str> {
    expire(entries, key);
    entries.get(key).map(|e| match &e.value {
        Stored::Text(s) => s.as_str(),
        Stored::Keys(_) => "",
    })
}

fn live_keys(keys: &[Key]) -> impl Iterator<Item = &str> {
    keys.iter().filter(|k| !k.is_none()).map(Key::as_str)
}

#[async_trait]
impl CacheProvider for InMemoryProvider {
    async fn get_value(
        &self,
        key: &Key,
        lock_on_miss: bool,
    ) -> Result<CacheLookup, Report<CacheError>> {
        if key.is_none() {
            return Ok(CacheLookup::Miss(None));
        }
        let mut entries = self.lock()?;
        expire(&mut entries, key.as_str());

        match entries.get(key.as_str()).map(|e| &e.value) {
            Some(Stored::Text(value)) if sentinel::is_marker(value) => {
                trace!(cache = %self.name, %key, "key locked");
                Ok(CacheLookup::Locked)
            }
            Some(Stored::Text(value)) => {
                trace!(cache = %self.name, %key, "hit");
                Ok(CacheLookup::Hit(value.clone()))
            }
            Some(Stored::Keys(_)) => Err(CacheError::InvalidKey {
                key: key.to_string(),
                details: "key holds a dependency list".to_string(),
            }
            .into()),
            None if lock_on_miss => {
                let sentinel = Sentinel::generate(SentinelKind::Read);
                entries.insert(
                    key.to_string(),
                    Entry::text(sentinel.as_str(), self.sentinel_ttl),
                );
                trace!(cache = %self.name, %key, "miss, read lock taken");
                Ok(CacheLookup::Miss(Some(sentinel)))
            }
            None => Ok(CacheLookup::Miss(None)),
        }
    }

    async fn set_value(
        &self,
        lock_key: &Key,
        keys_to_set: &[Key],
        value: &str,
        sentinel: &Sentinel,
        ttl: Duration,
    ) -> Result<SetOutcome, Report<CacheError>> {
        if lock_key.is_none() || ttl.is_zero() {
            return Ok(SetOutcome::Skipped);
        }
        let mut entries = self.lock()?;
        let decision = commit_decision(current(&mut entries, lock_key.as_str()), value, sentinel);

        match decision {
            CommitDecision::Store => {
                for key in live_keys(keys_to_set) {
                    // Keys other than the lock key are committed one by one and
                    // never over a delete in progress.
                    if key != lock_key.as_str() {
                        let blocked = matches!(
                            current(&mut entries, key).map(sentinel::classify),
                            Some(Some(
                                Marker::Sentinel(SentinelKind::Delete)
                                    | Marker::Conflict
                                    | Marker::Tombstone
                            ))
                        );
                        if blocked {
                            trace!(cache = %self.name, %key, "key blocked, not set");
                            continue;
                        }
                    }
                    entries.insert(key.to_string(), Entry::text(value, ttl));
                }
                trace!(cache = %self.name, %lock_key, "set");
                Ok(SetOutcome::Stored)
            }
            CommitDecision::Clear => {
                for key in live_keys(keys_to_set) {
                    if current(&mut entries, key).is_some_and(|v| !sentinel::is_marker(v)) {
                        entries.remove(key);
                    }
                }
                debug!(cache = %self.name, %lock_key, "cleared on value mismatch");
                Ok(SetOutcome::Cleared)
            }
            CommitDecision::Conflict => {
                let marker = Sentinel::conflict();
                entries.insert(
                    lock_key.to_string(),
                    Entry::text(marker.as_str(), self.sentinel_ttl),
                );
                for key in live_keys(keys_to_set) {
                    entries.insert(
                        key.to_string(),
                        Entry::text(marker.as_str(), self.sentinel_ttl),
                    );
                }
                debug!(cache = %self.name, %lock_key, "write collision, keys marked conflicted");
                Ok(SetOutcome::Conflicted)
            }
            CommitDecision::Skip => {
                trace!(cache = %self.name, %lock_key, "sentinel superseded, not set");
                Ok(SetOutcome::Skipped)
            }
        }
    }

    async fn delete_value(
        &self,
        keys: &[Key],
        set_tombstone: bool,
        force: bool,
    ) -> Result<(), Report<CacheError>> {
        let set_tombstone = set_tombstone && self.tombstones_enabled();
        let mut entries = self.lock()?;
        for key in live_keys(keys) {
            match current(&mut entries, key).map(sentinel::is_marker) {
                None if !(force && set_tombstone) => continue,
                Some(true) if !force => continue,
                _ => {}
            }
            if set_tombstone {
                self.tombstone(&mut entries, key);
            } else {
                entries.remove(key);
            }
        }
        Ok(())
    }

    async fn write_sentinel(
        &self,
        kind: SentinelKind,
        keys: &[Key],
    ) -> Result<Option<Sentinel>, Report<CacheError>> {
        let keys: Vec<&str> = live_keys(keys).collect();
        let Some((first, rest)) = keys.split_first() else {
            return Ok(None);
        };
        let mut entries = self.lock()?;

        if !can_write_sentinel(current(&mut entries, first), kind) {
            debug!(cache = %self.name, key = %first, %kind, "lock not taken");
            return Ok(None);
        }

        let sentinel = Sentinel::generate(kind);
        let mut to_claim = vec![*first];
        for key in rest {
            match current(&mut entries, key).map(sentinel::classify) {
                Some(Some(Marker::Tombstone)) if kind != SentinelKind::Delete => {
                    // Keep the tombstone alive for the whole operation.
                    if kind != SentinelKind::Read {
                        if let Some(entry) = entries.get_mut(*key) {
                            entry.expires_at = Instant::now() + self.tombstone_ttl;
                        }
                    }
                }
                Some(Some(Marker::Sentinel(SentinelKind::Delete)))
                    if kind != SentinelKind::Delete => {}
                _ => to_claim.push(*key),
            }
        }
        for key in to_claim {
            entries.insert(
                key.to_string(),
                Entry::text(sentinel.as_str(), self.sentinel_ttl),
            );
        }
        trace!(cache = %self.name, %kind, keys = ?keys, "lock taken");
        Ok(Some(sentinel))
    }

    async fn release_sentinel(
        &self,
        keys: &[Key],
        sentinel: &Sentinel,
    ) -> Result<(), Report<CacheError>> {
        let mut entries = self.lock()?;
        for key in live_keys(keys) {
            if current(&mut entries, key) == Some(sentinel.as_str()) {
                entries.remove(key);
            }
        }
        Ok(())
    }

    async fn add_dependency(
        &self,
        dependency_keys: &[Key],
        dependents: &[Key],
        ttl: Duration,
    ) -> Result<(), Report<CacheError>> {
        let dependents: Vec<String> = live_keys(dependents).map(str::to_string).collect();
        let mut entries = self.lock()?;

        // Check every list before touching any of them.
        for key in live_keys(dependency_keys) {
            expire(&mut entries, key);
            if let Some(Stored::Text(_)) = entries.get(key).map(|e| &e.value) {
                return Err(CacheError::DependencyTombstoned {
                    key: key.to_string(),
                }
                .into());
            }
        }

        for key in live_keys(dependency_keys) {
            let mut list = match entries.remove(key).map(|e| e.value) {
                Some(Stored::Keys(existing)) => existing
                    .into_iter()
                    .filter(|k| current(&mut entries, k).is_some())
                    .collect(),
                _ => Vec::new(),
            };
            for dependent in &dependents {
                if !list.contains(dependent) {
                    list.push(dependent.clone());
                }
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: Stored::Keys(list),
                    expires_at: Instant::now() + ttl,
                },
            );
        }
        Ok(())
    }

    async fn clear_dependencies(
        &self,
        key: &Key,
        set_tombstone: bool,
    ) -> Result<(), Report<CacheError>> {
        if key.is_none() {
            return Ok(());
        }
        let set_tombstone = set_tombstone && self.tombstones_enabled();
        let mut entries = self.lock()?;
        expire(&mut entries, key.as_str());

        let mut already_tombstoned = false;
        match entries.get(key.as_str()).map(|e| e.value.clone()) {
            Some(Stored::Keys(dependents)) => {
                for dependent in dependents {
                    if set_tombstone {
                        self.tombstone(&mut entries, &dependent);
                    } else {
                        entries.remove(&dependent);
                    }
                }
            }
            Some(Stored::Text(value)) => already_tombstoned = sentinel::is_tombstone(&value),
            None => {}
        }

        if set_tombstone {
            self.tombstone(&mut entries, key.as_str());
        } else if !already_tombstoned {
            entries.remove(key.as_str());
        }
        debug!(cache = %self.name, %key, set_tombstone, "dependencies cleared");
        Ok(())
    }

    async fn flush(&self, prefix: &str, flush_tombstones: bool) -> Result<(), Report<CacheError>> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        entries.retain(|k, e| {
            if e.expires_at <= now {
                return false;
            }
            if !k.starts_with(prefix) {
                return true;
            }
            match &e.value {
                Stored::Text(v) => !flush_tombstones && sentinel::is_tombstone(v),
                Stored::Keys(_) => false,
            }
        });
        debug!(cache = %self.name, prefix, flush_tombstones, "flushed");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> InMemoryProvider {
        InMemoryProvider::new("test")
    }

    fn k(s: &str) -> Key {
        Key::new(s)
    }

    #[tokio::test]
    async fn read_lock_on_miss_then_commit() {
        let p = provider();
        let CacheLookup::Miss(Some(s)) = p.get_value(&k("a"), true).await.unwrap() else {
            panic!("expected miss with lock");
        };
        assert_eq!(p.get_value(&k("a"), true).await.unwrap(), CacheLookup::Locked);

        let outcome = p
            .set_value(&k("a"), &[k("a"), k("b")], "v", &s, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(outcome, SetOutcome::Stored);
        assert_eq!(
            p.get_value(&k("b"), false).await.unwrap(),
            CacheLookup::Hit("v".to_string())
        );
    }

    fn stored_entries(p: &InMemoryProvider) -> usize {
        p.entries.read().unwrap().len()
    }

    #[tokio::test]
    async fn expired_entries_are_swept_without_being_touched() {
        for (sweep_every, left) in [(8, 0), (0, 3)] {
            let p = provider()
                .with_sentinel_ttl(Duration::from_millis(5))
                .with_sweep_every(sweep_every);
            for key in ["a", "b", "c"] {
                p.write_sentinel(SentinelKind::Create, &[k(key)])
                    .await
                    .unwrap()
                    .unwrap();
            }
            std::thread::sleep(Duration::from_millis(20));
            assert_eq!(stored_entries(&p), 3);

            for _ in 0..8 {
                assert_eq!(p.get_value(&k("z"), false).await.unwrap(), CacheLookup::Miss(None));
            }
            assert_eq!(stored_entries(&p), left);
        }
    }

    #[tokio::test]
    async fn superseded_commit_is_skipped() {
        let p = provider();
        let CacheLookup::Miss(Some(read)) = p.get_value(&k("a"), true).await.unwrap() else {
            panic!("expected miss with lock");
        };
        let update = p
            .write_sentinel(SentinelKind::Update, &[k("a")])
            .await
            .unwrap()
            .expect("update supersedes read");

        let outcome = p
            .set_value(&k("a"), &[k("a")], "stale", &read, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(outcome, SetOutcome::Skipped);

        let outcome = p
            .set_value(&k("a"), &[k("a")], "fresh", &update, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(outcome, SetOutcome::Stored);
        assert_eq!(p.raw_value(&k("a")).unwrap().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn racing_writers_leave_conflict_marker() {
        let p = provider();
        let first = p
            .write_sentinel(SentinelKind::Create, &[k("a")])
            .await
            .unwrap()
            .unwrap();
        let second = p
            .write_sentinel(SentinelKind::Create, &[k("a")])
            .await
            .unwrap()
            .unwrap();

        let outcome = p
            .set_value(&k("a"), &[k("a")], "one", &first, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(outcome, SetOutcome::Conflicted);

        let outcome = p
            .set_value(&k("a"), &[k("a")], "two", &second, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(outcome, SetOutcome::Skipped);
        assert_eq!(p.get_value(&k("a"), false).await.unwrap(), CacheLookup::Locked);
    }

    #[tokio::test]
    async fn delete_lock_blocks_writers() {
        let p = provider();
        p.write_sentinel(SentinelKind::Delete, &[k("a")])
            .await
            .unwrap()
            .unwrap();
        assert!(
            p.write_sentinel(SentinelKind::Update, &[k("a")])
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            p.write_sentinel(SentinelKind::Delete, &[k("a")])
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn release_only_clears_own_sentinel() {
        let p = provider();
        let s = p
            .write_sentinel(SentinelKind::Update, &[k("a"), k("b")])
            .await
            .unwrap()
            .unwrap();
        let other = Sentinel::generate(SentinelKind::Update);
        p.release_sentinel(&[k("a")], &other).await.unwrap();
        assert_eq!(p.get_value(&k("a"), false).await.unwrap(), CacheLookup::Locked);

        p.release_sentinel(&[k("a"), k("b")], &s).await.unwrap();
        assert_eq!(p.get_value(&k("a"), false).await.unwrap(), CacheLookup::Miss(None));
        assert_eq!(p.get_value(&k("b"), false).await.unwrap(), CacheLookup::Miss(None));
    }

    #[tokio::test]
    async fn clear_dependencies_tombstones_dependents() {
        let p = provider();
        let s = p
            .write_sentinel(SentinelKind::Create, &[k("item")])
            .await
            .unwrap()
            .unwrap();
        p.set_value(&k("item"), &[k("item")], "v", &s, Duration::from_secs(60))
            .await
            .unwrap();
        p.add_dependency(&[k("dep")], &[k("item")], Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(p.dependency_list(&k("dep")).unwrap(), vec!["item".to_string()]);

        p.clear_dependencies(&k("dep"), true).await.unwrap();
        let item = p.raw_value(&k("item")).unwrap().unwrap();
        assert!(sentinel::is_tombstone(&item));

        let err = p
            .add_dependency(&[k("dep")], &[k("other")], Duration::from_secs(60))
            .await
            .expect_err("tombstoned dependency list");
        assert!(err.to_string().contains("tombstoned"));
    }

    #[tokio::test]
    async fn tombstones_self_heal() {
        let p = provider().with_tombstone_ttl(Duration::from_millis(20));
        p.delete_value(&[k("a")], true, true).await.unwrap();
        assert_eq!(p.get_value(&k("a"), false).await.unwrap(), CacheLookup::Locked);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(p.get_value(&k("a"), false).await.unwrap(), CacheLookup::Miss(None));
    }

    #[tokio::test]
    async fn flush_respects_prefix_and_tombstones() {
        let p = provider();
        let s = p
            .write_sentinel(SentinelKind::Create, &[k("t1_a"), k("t2_a")])
            .await
            .unwrap()
            .unwrap();
        p.set_value(&k("t1_a"), &[k("t1_a"), k("t2_a")], "v", &s, Duration::from_secs(60))
            .await
            .unwrap();
        p.delete_value(&[k("t1_b")], true, true).await.unwrap();

        p.flush("t1", false).await.unwrap();
        assert_eq!(p.raw_value(&k("t1_a")).unwrap(), None);
        assert!(p.raw_value(&k("t1_b")).unwrap().is_some());
        assert_eq!(p.raw_value(&k("t2_a")).unwrap().as_deref(), Some("v"));

        p.flush("t1", true).await.unwrap();
        assert_eq!(p.raw_value(&k("t1_b")).unwrap(), None);
    }

    #[tokio::test]
    async fn items_do_not_land_over_a_delete() {
        let p = provider();
        let CacheLookup::Miss(Some(col)) = p.get_value(&k("col"), true).await.unwrap() else {
            panic!("expected miss with lock");
        };
        p.write_sentinel(SentinelKind::Delete, &[k("item")])
            .await
            .unwrap()
            .unwrap();
        p.set_value(&k("col"), &[k("item")], "v", &col, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(p.get_value(&k("item"), false).await.unwrap(), CacheLookup::Locked);
    }
}
