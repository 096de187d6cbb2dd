//! The cache consistency engine.
//!
//! [`CacheManager`] combines a provider, a key naming scheme and a TTL policy
//! into the lock / fetch / commit protocol used by API clients:
//!
//! 1. read the key, taking a read sentinel on a miss, or take a write sentinel
//!    before a mutation;
//! 2. perform the network call;
//! 3. commit the result under the sentinel, which lands only if nobody
//!    superseded it, then release whatever the sentinel still holds.
//!
//! Lock acquisition and reads report provider failures so callers can log
//! them and fall back to the network. Commits and releases never fail: a
//! commit that cannot land leaves the cache consistent, only colder.

use crate::error::CacheError;
use crate::item::CacheItem;
use crate::key::{Key, KeyNameProvider, SKIP_CACHE_TTL, TtlProvider};
use crate::provider::{CacheLookup, CacheProvider, SetOutcome};
use crate::sentinel::{Sentinel, SentinelKind};
use rootcause::Report;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Collections depending on more entities than this are not cached.
pub const MAX_COLLECTION_DEPENDENCIES: usize = 100;

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum Cached<T> {
    /// Cached data was found.
    Hit(T),
    /// Nothing usable was cached. Carries the read sentinel if one was taken.
    Miss(Option<Sentinel>),
}

impl<T> Cached<T> {
    /// Returns the cached value, if any.
    #[must_use]
    pub fn hit(self) -> Option<T> {
        match self {
            Self::Hit(value) => Some(value),
            Self::Miss(_) => None,
        }
    }

    /// Returns the read sentinel taken on a miss, if any.
    #[must_use]
    pub fn sentinel(&self) -> Option<&Sentinel> {
        match self {
            Self::Miss(sentinel) => sentinel.as_ref(),
            Self::Hit(_) => None,
        }
    }
}

/// Runs the cache protocol over a provider.
#[derive(Clone)]
pub struct CacheManager {
    provider: Arc<dyn CacheProvider>,
    names: Arc<dyn KeyNameProvider>,
    ttls: Arc<dyn TtlProvider>,
}

impl CacheManager {
    /// Creates a manager from its three collaborators.
    #[must_use]
    pub fn new(
        provider: Arc<dyn CacheProvider>,
        names: Arc<dyn KeyNameProvider>,
        ttls: Arc<dyn TtlProvider>,
    ) -> Self {
        Self {
            provider,
            names,
            ttls,
        }
    }

    /// The key naming scheme.
    #[must_use]
    pub fn names(&self) -> &dyn KeyNameProvider {
        self.names.as_ref()
    }

    /// The TTL policy.
    #[must_use]
    pub fn ttls(&self) -> &dyn TtlProvider {
        self.ttls.as_ref()
    }

    /// The underlying provider.
    #[must_use]
    pub fn provider(&self) -> &dyn CacheProvider {
        self.provider.as_ref()
    }

    fn item_lock_keys<T: CacheItem>(&self, kind: SentinelKind, item: &T) -> Vec<Key> {
        let names = self.names();
        let mut keys = vec![item.primary_key(names)];
        if kind == SentinelKind::Read {
            return keys;
        }
        keys.push(item.global_collection_key(names));
        keys.extend(item.secondary_keys(names));
        if kind == SentinelKind::Delete {
            keys.push(item.per_item_collection_key(names));
        }
        keys.retain(|k| !k.is_none());
        keys
    }

    /// Locks the keys an operation of `kind` on `item` affects.
    ///
    /// A delete lock also invalidates everything registered in the item's
    /// dependency list before the network call, so nothing derived from the
    /// item can be served once the server applies the delete.
    pub async fn take_item_lock<T: CacheItem>(
        &self,
        kind: SentinelKind,
        item: &T,
    ) -> Result<Option<Sentinel>, Report<CacheError>> {
        let keys = self.item_lock_keys(kind, item);
        self.take_lock(kind, item, &keys).await
    }

    /// Locks the per-item collection of `item` plus `additional` collection keys.
    pub async fn take_per_item_collection_lock<T: CacheItem>(
        &self,
        kind: SentinelKind,
        additional: &[Key],
        item: &T,
    ) -> Result<Option<Sentinel>, Report<CacheError>> {
        let collection = item.per_item_collection_key(self.names());
        if !matches!(kind, SentinelKind::Read | SentinelKind::Delete) {
            return Err(CacheError::UnsupportedLock {
                kind: kind.to_string(),
                key: collection.to_string(),
            }
            .into());
        }
        let mut keys = vec![collection];
        keys.extend_from_slice(additional);
        self.take_lock(kind, item, &keys).await
    }

    async fn take_lock<T: CacheItem>(
        &self,
        kind: SentinelKind,
        item: &T,
        keys: &[Key],
    ) -> Result<Option<Sentinel>, Report<CacheError>> {
        let sentinel = self.provider.write_sentinel(kind, keys).await?;

        if kind == SentinelKind::Delete {
            let names = self.names();
            let pages = item.global_collection_pages_key(names);
            if !pages.is_none() {
                if let Err(e) = self.provider.clear_dependencies(&pages, false).await {
                    warn!(error = %e, key = %pages, "failed to clear cached collection pages");
                }
            }
            let dependencies = item.dependencies_key(names);
            if !dependencies.is_none() {
                self.provider.clear_dependencies(&dependencies, true).await?;
            }
        }
        debug!(%kind, locked = sentinel.is_some(), "took item lock");
        Ok(sentinel)
    }

    /// Releases the lock taken by [`Self::take_item_lock`].
    pub async fn release_item_lock<T: CacheItem>(
        &self,
        kind: SentinelKind,
        item: &T,
        sentinel: Option<&Sentinel>,
    ) {
        let keys = self.item_lock_keys(kind, item);
        self.release_lock(&keys, sentinel).await;
    }

    /// Releases the lock taken by [`Self::take_per_item_collection_lock`].
    pub async fn release_per_item_collection_lock<T: CacheItem>(
        &self,
        additional: &[Key],
        item: &T,
        sentinel: Option<&Sentinel>,
    ) {
        let mut keys = vec![item.per_item_collection_key(self.names())];
        keys.extend_from_slice(additional);
        self.release_lock(&keys, sentinel).await;
    }

    /// Empties each of `keys` still holding `sentinel`.
    pub async fn release_lock(&self, keys: &[Key], sentinel: Option<&Sentinel>) {
        let Some(sentinel) = sentinel else {
            return;
        };
        if let Err(e) = self.provider.release_sentinel(keys, sentinel).await {
            warn!(error = %e, keys = ?keys, "failed to release cache lock");
        }
    }

    /// Reads one item, taking a read sentinel on a miss if `lock_on_miss`.
    pub async fn get_item<T: CacheItem>(
        &self,
        key: &Key,
        lock_on_miss: bool,
    ) -> Result<Cached<T>, Report<CacheError>> {
        let Some(cached) = self.get_raw::<T>(key, lock_on_miss, T::ttl(self.ttls())).await? else {
            return Ok(Cached::Miss(None));
        };
        match cached {
            Cached::Hit(item) if !item.is_valid() => {
                self.discard(key).await;
                Ok(Cached::Miss(None))
            }
            other => Ok(other),
        }
    }

    /// Reads a cached collection, taking a read sentinel on a miss if `lock_on_miss`.
    pub async fn get_items<T: CacheItem>(
        &self,
        key: &Key,
        lock_on_miss: bool,
    ) -> Result<Cached<Vec<T>>, Report<CacheError>> {
        let Some(cached) = self
            .get_raw::<Vec<T>>(key, lock_on_miss, T::ttl(self.ttls()))
            .await?
        else {
            return Ok(Cached::Miss(None));
        };
        match cached {
            Cached::Hit(items) if !items.iter().all(T::is_valid) => {
                self.discard(key).await;
                Ok(Cached::Miss(None))
            }
            other => Ok(other),
        }
    }

    async fn get_raw<V: DeserializeOwned>(
        &self,
        key: &Key,
        lock_on_miss: bool,
        ttl: std::time::Duration,
    ) -> Result<Option<Cached<V>>, Report<CacheError>> {
        if ttl == SKIP_CACHE_TTL || key.is_none() {
            return Ok(None);
        }
        match self.provider.get_value(key, lock_on_miss).await? {
            CacheLookup::Hit(raw) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    debug!(%key, "cache hit");
                    Ok(Some(Cached::Hit(value)))
                }
                Err(e) => {
                    warn!(error = %e, %key, "failed to decode cached value");
                    self.discard(key).await;
                    Ok(None)
                }
            },
            CacheLookup::Locked => {
                debug!(%key, "cache key locked");
                Ok(None)
            }
            CacheLookup::Miss(sentinel) => {
                debug!(%key, locked = sentinel.is_some(), "cache miss");
                Ok(Some(Cached::Miss(sentinel)))
            }
        }
    }

    async fn discard(&self, key: &Key) {
        if let Err(e) = self.provider.delete_value(std::slice::from_ref(key), false, true).await {
            warn!(error = %e, %key, "failed to discard unusable cache value");
        }
    }

    /// Commits `item` under its primary and secondary keys, guarded by the
    /// sentinel on its primary key.
    ///
    /// With `clear_collection`, collections the item may appear in are
    /// invalidated: its global collection, `additional` collection keys, its
    /// modified markers and everything in its dependency list. Clearing
    /// happens even when `sentinel` is `None`.
    pub async fn save_item<T: CacheItem>(
        &self,
        item: &T,
        sentinel: Option<&Sentinel>,
        clear_collection: bool,
        additional: &[Key],
    ) {
        let lock_key = item.primary_key(self.names());
        self.save_item_worker(item, &lock_key, sentinel, clear_collection, additional)
            .await;
    }

    /// Commits each item of a fetched collection under its own keys, guarded by
    /// the sentinel on the kind's global collection key.
    pub async fn save_items_from_collection<T: CacheItem>(
        &self,
        items: &[T],
        sentinel: Option<&Sentinel>,
    ) {
        for item in items {
            let lock_key = item.global_collection_key(self.names());
            self.save_item_worker(item, &lock_key, sentinel, false, &[])
                .await;
        }
    }

    async fn save_item_worker<T: CacheItem>(
        &self,
        item: &T,
        lock_key: &Key,
        sentinel: Option<&Sentinel>,
        clear_collection: bool,
        additional: &[Key],
    ) {
        let ttl = T::ttl(self.ttls());
        if ttl == SKIP_CACHE_TTL {
            return;
        }
        let names = self.names();

        let secondary = item.secondary_keys(names);
        let mut key_names = secondary.clone();
        key_names.push(item.primary_key(names));

        // Without a sentinel nothing is stored, but collections are still cleared.
        let mut stored = match (sentinel, encode(item, lock_key)) {
            (Some(sentinel), Some(value)) => match self
                .provider
                .set_value(lock_key, &key_names, &value, sentinel, ttl)
                .await
            {
                Ok(outcome) => outcome == SetOutcome::Stored,
                Err(e) => {
                    warn!(error = %e, key = %lock_key, "failed to save item to cache");
                    false
                }
            },
            _ => false,
        };

        let mut clear_on_error = false;
        if clear_collection {
            let mut collections = Vec::new();
            let global = item.global_collection_key(names);
            let modified_collection = item.is_modified_collection_key(names);
            if !global.is_none() && modified_collection.is_none() {
                collections.push(global);
            }
            collections.extend(additional.iter().cloned());
            if let Err(e) = self.provider.delete_value(&collections, false, true).await {
                warn!(error = %e, keys = ?collections, "failed to clear collection keys");
                clear_on_error = true;
                stored = false;
            }

            let markers = [item.is_modified_key(names), modified_collection];
            if let Err(e) = self.provider.delete_value(&markers, true, true).await {
                warn!(error = %e, keys = ?markers, "failed to tombstone modified keys");
            }

            let dependencies = item.dependencies_key(names);
            if !dependencies.is_none() {
                if let Err(e) = self.provider.clear_dependencies(&dependencies, false).await {
                    warn!(error = %e, key = %dependencies, "failed to clear dependencies");
                    clear_on_error = true;
                    stored = false;
                }
            }
            let pages = item.global_collection_pages_key(names);
            if !pages.is_none() {
                if let Err(e) = self.provider.clear_dependencies(&pages, false).await {
                    warn!(error = %e, key = %pages, "failed to clear cached collection pages");
                }
            }
        }

        let upstream = item.dependency_keys(names);
        if stored && !upstream.is_empty() {
            if let Err(e) = self.provider.add_dependency(&upstream, &key_names, ttl).await {
                warn!(error = %e, keys = ?upstream, "failed to register item dependencies");
                clear_on_error = true;
                stored = false;
            }
        }

        let own = item.dependencies_key(names);
        if stored && !own.is_none() && !secondary.is_empty() {
            // Fails if the item was deleted after it was stored above.
            if let Err(e) = self.provider.add_dependency(&[own], &secondary, ttl).await {
                debug!(error = %e, "failed to register secondary keys as dependents");
                clear_on_error = true;
            }
        }

        if clear_on_error {
            if let Err(e) = self.provider.delete_value(&key_names, true, true).await {
                warn!(error = %e, keys = ?key_names, "failed to drop item after dependency failure");
            }
        }
    }

    /// Commits a collection of `items` related to `owner` under
    /// `collection_key`, guarded by the sentinel on `lock_key`.
    ///
    /// The collection key is first registered in the dependency list of every
    /// item and of the owner, so changing any of them drops the collection. It
    /// is stored only if all of those registrations succeed.
    pub async fn save_collection<T: CacheItem, C: CacheItem>(
        &self,
        owner: &T,
        items: &[C],
        lock_key: &Key,
        collection_key: &Key,
        sentinel: Option<&Sentinel>,
    ) {
        let ttl = C::ttl(self.ttls());
        if sentinel.is_none() || ttl == SKIP_CACHE_TTL || collection_key.is_none() {
            return;
        }
        let names = self.names();

        let mut seen = HashSet::new();
        let mut dependency_keys = Vec::new();
        for item in items {
            let keys = item.dependency_keys(names);
            for key in keys.into_iter().chain([item.dependencies_key(names)]) {
                if !key.is_none() && seen.insert(key.clone()) {
                    dependency_keys.push(key);
                }
            }
        }
        if dependency_keys.len() > MAX_COLLECTION_DEPENDENCIES {
            debug!(key = %collection_key, "collection has too many dependencies, not cached");
            return;
        }
        let own = owner.dependencies_key(names);
        if !own.is_none() && seen.insert(own.clone()) {
            dependency_keys.push(own);
        }

        if !dependency_keys.is_empty() {
            if let Err(e) = self
                .provider
                .add_dependency(&dependency_keys, std::slice::from_ref(collection_key), ttl)
                .await
            {
                warn!(error = %e, key = %collection_key, "collection not cached, dependency registration failed");
                return;
            }
        }
        self.commit_collection(items, lock_key, collection_key, sentinel, ttl)
            .await;
    }

    /// Commits the complete list of entities of a kind under its global
    /// collection key, guarded by the sentinel on that key.
    ///
    /// Global collections register no dependencies: every mutation of the kind
    /// clears them directly.
    pub async fn save_global_collection<C: CacheItem>(
        &self,
        items: &[C],
        collection_key: &Key,
        sentinel: Option<&Sentinel>,
    ) {
        let ttl = C::ttl(self.ttls());
        if ttl == SKIP_CACHE_TTL {
            return;
        }
        self.commit_collection(items, collection_key, collection_key, sentinel, ttl)
            .await;
    }

    async fn commit_collection<C: CacheItem>(
        &self,
        items: &[C],
        lock_key: &Key,
        collection_key: &Key,
        sentinel: Option<&Sentinel>,
        ttl: std::time::Duration,
    ) {
        let Some(sentinel) = sentinel else {
            return;
        };
        if lock_key.is_none() || collection_key.is_none() {
            return;
        }
        let Some(value) = encode(items, collection_key) else {
            return;
        };
        match self
            .provider
            .set_value(lock_key, std::slice::from_ref(collection_key), &value, sentinel, ttl)
            .await
        {
            Ok(SetOutcome::Stored) => debug!(key = %collection_key, "saved collection"),
            Ok(outcome) => debug!(key = %collection_key, ?outcome, "collection not saved"),
            Err(e) => warn!(error = %e, key = %collection_key, "failed to save collection"),
        }
    }

    /// Invalidates every key of `item` and its dependents without a lock.
    ///
    /// Used when a mutation went through but its lock could not be taken, so a
    /// surgical commit is impossible.
    pub async fn delete_item<T: CacheItem>(&self, item: &T) {
        let names = self.names();
        let mut keys = self.item_lock_keys(SentinelKind::Delete, item);
        keys.push(item.is_modified_key(names));
        keys.push(item.is_modified_collection_key(names));
        if let Err(e) = self.provider.delete_value(&keys, true, true).await {
            warn!(error = %e, keys = ?keys, "failed to delete item keys");
        }
        let dependencies = item.dependencies_key(names);
        if !dependencies.is_none() {
            if let Err(e) = self.provider.clear_dependencies(&dependencies, true).await {
                warn!(error = %e, key = %dependencies, "failed to clear dependencies");
            }
        }
    }

    /// Flushes every key owned by this manager's naming scheme.
    pub async fn flush(&self) -> Result<(), Report<CacheError>> {
        self.flush_prefix(self.names.prefix()).await
    }

    /// Flushes every key starting with `prefix`, keeping live tombstones.
    pub async fn flush_prefix(&self, prefix: &str) -> Result<(), Report<CacheError>> {
        self.provider.flush(prefix, false).await.inspect_err(|e| {
            warn!(error = %e, cache = self.provider.name(), prefix, "failed to flush cache");
        })
    }
}

fn encode<V: Serialize + ?Sized>(value: &V, key: &Key) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(encoded) => Some(encoded),
        Err(e) => {
            warn!(error = %e, %key, "failed to encode value for cache");
            None
        }
    }
}
