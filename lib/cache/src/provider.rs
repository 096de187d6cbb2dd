//! Cache provider contract.
//!
//! A provider is the key-value store behind the consistency engine. It may be
//! process-local or shared between processes; either way every operation must
//! be atomic per key, applying the rules from [`crate::sentinel`] inside the
//! same read-modify-write as the store update.

use crate::error::CacheError;
use crate::key::Key;
use crate::sentinel::{Sentinel, SentinelKind};
use async_trait::async_trait;
use rootcause::Report;
use std::time::Duration;

/// Result of reading one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// The key holds cached data.
    Hit(String),
    /// The key is held by a sentinel, conflict marker or tombstone.
    Locked,
    /// The key is empty. Carries the read sentinel if one was requested and taken.
    Miss(Option<Sentinel>),
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// The value was written to every requested key.
    Stored,
    /// The sentinel no longer owned the lock key; nothing was written.
    Skipped,
    /// The lock key was cleared because another writer cached a different value.
    Cleared,
    /// Racing writers were detected and the keys were marked as conflicted.
    Conflicted,
}

/// A pluggable key-value store supporting sentinel-guarded writes.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Reads `key`. On a miss with `lock_on_miss`, atomically claims the empty
    /// key with a read sentinel.
    async fn get_value(&self, key: &Key, lock_on_miss: bool)
    -> Result<CacheLookup, Report<CacheError>>;

    /// Writes `value` into `keys_to_set` if `sentinel` still owns `lock_key`.
    async fn set_value(
        &self,
        lock_key: &Key,
        keys_to_set: &[Key],
        value: &str,
        sentinel: &Sentinel,
        ttl: Duration,
    ) -> Result<SetOutcome, Report<CacheError>>;

    /// Removes `keys`. Without `force`, keys holding markers are left alone.
    /// With `set_tombstone`, each key is replaced by a tombstone instead.
    async fn delete_value(
        &self,
        keys: &[Key],
        set_tombstone: bool,
        force: bool,
    ) -> Result<(), Report<CacheError>>;

    /// Claims every key in `keys` with a fresh sentinel of `kind`.
    ///
    /// Returns `None` when any key may not be claimed; in that case no key is
    /// modified.
    async fn write_sentinel(
        &self,
        kind: SentinelKind,
        keys: &[Key],
    ) -> Result<Option<Sentinel>, Report<CacheError>>;

    /// Empties every key in `keys` that still holds `sentinel`.
    async fn release_sentinel(&self, keys: &[Key], sentinel: &Sentinel)
    -> Result<(), Report<CacheError>>;

    /// Appends `dependents` to the dependency list stored under each of
    /// `dependency_keys`. Fails without changes if any list is tombstoned.
    async fn add_dependency(
        &self,
        dependency_keys: &[Key],
        dependents: &[Key],
        ttl: Duration,
    ) -> Result<(), Report<CacheError>>;

    /// Invalidates every key listed under the dependency list at `key`, then
    /// the list itself. With `set_tombstone`, listed keys and the list become
    /// tombstones instead of being removed.
    async fn clear_dependencies(&self, key: &Key, set_tombstone: bool)
    -> Result<(), Report<CacheError>>;

    /// Removes every key starting with `prefix`. Tombstones survive unless
    /// `flush_tombstones` is set.
    async fn flush(&self, prefix: &str, flush_tombstones: bool) -> Result<(), Report<CacheError>>;

    /// Human-readable provider name, used in logs.
    fn name(&self) -> &str;
}
