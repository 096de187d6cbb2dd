//! Client for a graph authorization service.
//!
//! Objects are typed nodes, edges typed directed links between them, and
//! attributes on edge types compose along paths. [`AuthzClient`] wraps the
//! remote API with a cache that may be shared by many processes: reads go
//! through it, writes invalidate it under sentinel locks, and any cache failure
//! falls back to the API rather than serving stale data.

mod cache_items;
mod client;
pub mod config;
mod error;
pub mod keys;
pub mod models;
mod options;
pub mod pagination;
pub mod transport;
pub mod ttl;

pub use client::AuthzClient;
pub use config::{AuthzConfig, CacheSettings};
pub use error::AuthzError;
pub use keys::CacheNameProvider;
pub use models::{
    Attribute, AttributeMode, AttributePathNode, CheckAttributeResponse, Edge, EdgeType,
    GROUP_OBJECT_TYPE_ID, LOGIN_APP_OBJECT_TYPE_ID, Object, ObjectType, Organization, Region,
    USER_OBJECT_TYPE_ID,
};
pub use options::CallOptions;
pub use pagination::{ListResponse, Pagination};
pub use transport::{ApiRequest, ApiResponse, AuthzTransport, HttpTransport, Method};
pub use ttl::CacheTtlProvider;
