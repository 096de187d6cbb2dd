//! The capability trait every cacheable entity implements.

use crate::key::{Key, KeyNameProvider, TtlProvider};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Declares the cache keys and TTL of an entity kind.
///
/// Every role returns [`Key::none`] when the kind has no use for it, which is
/// what the default implementations do.
pub trait CacheItem: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Key the entity is stored under by ID.
    fn primary_key(&self, names: &dyn KeyNameProvider) -> Key;

    /// Keys the entity is also stored under by natural identity.
    fn secondary_keys(&self, names: &dyn KeyNameProvider) -> Vec<Key>;

    /// Key holding the list of every entity of this kind.
    fn global_collection_key(&self, names: &dyn KeyNameProvider) -> Key;

    /// Key recording which pages of the global collection are cached.
    fn global_collection_pages_key(&self, _names: &dyn KeyNameProvider) -> Key {
        Key::none()
    }

    /// Key holding the collection of entities related to this one.
    fn per_item_collection_key(&self, _names: &dyn KeyNameProvider) -> Key {
        Key::none()
    }

    /// Key of the list of cache keys to invalidate when this entity changes.
    fn dependencies_key(&self, _names: &dyn KeyNameProvider) -> Key {
        Key::none()
    }

    /// Dependency lists of the upstream entities this one must register in.
    fn dependency_keys(&self, _names: &dyn KeyNameProvider) -> Vec<Key> {
        Vec::new()
    }

    /// Tombstone key marking this entity as recently modified.
    fn is_modified_key(&self, names: &dyn KeyNameProvider) -> Key;

    /// Tombstone key marking the global collection as recently modified.
    fn is_modified_collection_key(&self, _names: &dyn KeyNameProvider) -> Key {
        Key::none()
    }

    /// TTL for this kind.
    fn ttl(ttls: &dyn TtlProvider) -> Duration;

    /// Returns false if a cached copy is unusable and must be discarded.
    fn is_valid(&self) -> bool {
        true
    }
}
