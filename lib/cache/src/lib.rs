//! Cache consistency layer.
//!
//! Provides read-through caching, write-through invalidation and
//! collection caching over a pluggable key-value store. Concurrent writers
//! are arbitrated with sentinels stored in the cache itself, so the protocol
//! behaves the same whether the store is local to the process or shared.

pub mod error;
pub mod item;
pub mod key;
pub mod manager;
pub mod memory;
pub mod provider;
pub mod sentinel;

pub use error::CacheError;
pub use item::CacheItem;
pub use key::{Key, KeyNameId, KeyNameProvider, SKIP_CACHE_TTL, TtlId, TtlProvider};
pub use manager::{CacheManager, Cached, MAX_COLLECTION_DEPENDENCIES};
pub use memory::InMemoryProvider;
pub use provider::{CacheLookup, CacheProvider, SetOutcome};
pub use sentinel::{Sentinel, SentinelKind};
