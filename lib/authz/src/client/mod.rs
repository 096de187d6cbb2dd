//! The authorization client.
//!
//! Every operation follows the same pattern around its network call: read
//! through the cache (taking a read lock on a miss) or take a write lock
//! before mutating, then commit the result under that lock and release it.
//! Cache failures are logged and the call falls back to the API.

mod attributes;
mod edge_types;
mod edges;
mod migration;
mod object_types;
mod objects;
mod organizations;

use crate::config::AuthzConfig;
use crate::error::AuthzError;
use crate::keys::CacheNameProvider;
use crate::models::{Edge, EdgeType, Object, ObjectType, Organization};
use crate::options::CallOptions;
use crate::pagination::{ListResponse, Pagination};
use crate::transport::{ApiRequest, ApiResponse, AuthzTransport, HttpTransport};
use crate::ttl::CacheTtlProvider;
use rootcause::Report;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};
use trellis_cache::{
    CacheItem, CacheManager, CacheProvider, Cached, InMemoryProvider, Key, Sentinel, SentinelKind,
};
use uuid::Uuid;

/// What the client needs to know about each top-level entity kind.
pub(crate) trait Entity: CacheItem + std::fmt::Debug {
    /// Collection endpoint, e.g. `/authz/objects`.
    const PATH: &'static str;
    /// Field wrapping the entity in create requests.
    const BODY_FIELD: &'static str;

    fn uuid(&self) -> Uuid;

    fn set_uuid(&mut self, id: Uuid);

    fn same_content(&self, other: &Self) -> bool;

    fn not_found(target: String) -> AuthzError;

    /// An entity carrying only its ID, for locking when nothing is cached.
    fn placeholder(id: Uuid) -> Self;
}

impl Entity for ObjectType {
    const PATH: &'static str = "/authz/objecttypes";
    const BODY_FIELD: &'static str = "object_type";

    fn uuid(&self) -> Uuid {
        self.id.as_uuid()
    }

    fn set_uuid(&mut self, id: Uuid) {
        self.id = id.into();
    }

    fn same_content(&self, other: &Self) -> bool {
        self.equals_ignoring_id(other)
    }

    fn not_found(target: String) -> AuthzError {
        AuthzError::ObjectTypeNotFound { target }
    }

    fn placeholder(id: Uuid) -> Self {
        Self::new(id.into(), String::new())
    }
}

impl Entity for EdgeType {
    const PATH: &'static str = "/authz/edgetypes";
    const BODY_FIELD: &'static str = "edge_type";

    fn uuid(&self) -> Uuid {
        self.id.as_uuid()
    }

    fn set_uuid(&mut self, id: Uuid) {
        self.id = id.into();
    }

    fn same_content(&self, other: &Self) -> bool {
        self.equals_ignoring_id(other)
    }

    fn not_found(target: String) -> AuthzError {
        AuthzError::EdgeTypeNotFound { target }
    }

    fn placeholder(id: Uuid) -> Self {
        Self {
            id: id.into(),
            type_name: String::new(),
            source_object_type_id: Default::default(),
            target_object_type_id: Default::default(),
            attributes: Vec::new(),
            organization_id: Default::default(),
        }
    }
}

impl Entity for Object {
    const PATH: &'static str = "/authz/objects";
    const BODY_FIELD: &'static str = "object";

    fn uuid(&self) -> Uuid {
        self.id.as_uuid()
    }

    fn set_uuid(&mut self, id: Uuid) {
        self.id = id.into();
    }

    fn same_content(&self, other: &Self) -> bool {
        self.equals_ignoring_id(other)
    }

    fn not_found(target: String) -> AuthzError {
        AuthzError::ObjectNotFound { target }
    }

    fn placeholder(id: Uuid) -> Self {
        Self {
            id: id.into(),
            alias: None,
            type_id: Default::default(),
            organization_id: Default::default(),
        }
    }
}

impl Entity for Edge {
    const PATH: &'static str = "/authz/edges";
    const BODY_FIELD: &'static str = "edge";

    fn uuid(&self) -> Uuid {
        self.id.as_uuid()
    }

    fn set_uuid(&mut self, id: Uuid) {
        self.id = id.into();
    }

    fn same_content(&self, other: &Self) -> bool {
        self.equals_ignoring_id(other)
    }

    fn not_found(target: String) -> AuthzError {
        AuthzError::EdgeNotFound { target }
    }

    fn placeholder(id: Uuid) -> Self {
        Self::new(id.into(), Default::default(), Default::default(), Default::default())
    }
}

impl Entity for Organization {
    const PATH: &'static str = "/authz/organizations";
    const BODY_FIELD: &'static str = "organization";

    fn uuid(&self) -> Uuid {
        self.id.as_uuid()
    }

    fn set_uuid(&mut self, id: Uuid) {
        self.id = id.into();
    }

    fn same_content(&self, other: &Self) -> bool {
        self.equals_ignoring_id(other)
    }

    fn not_found(target: String) -> AuthzError {
        AuthzError::OrganizationNotFound { target }
    }

    fn placeholder(id: Uuid) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            region: Default::default(),
        }
    }
}

/// Body of a 409 answering an idempotent create.
#[derive(Deserialize)]
struct ConflictBody {
    error: ConflictDetails,
}

#[derive(Deserialize)]
struct ConflictDetails {
    id: Uuid,
    #[serde(default)]
    identical: bool,
}

/// A write lock, possibly degraded.
struct WriteLock {
    sentinel: Option<Sentinel>,
    /// The lock was refused or the cache failed. The entity's keys must be
    /// invalidated once the mutation went through.
    degraded: bool,
}

/// Client for the authorization API with a consistent local cache.
#[derive(Clone)]
pub struct AuthzClient {
    transport: Arc<dyn AuthzTransport>,
    cache: CacheManager,
    names: Arc<CacheNameProvider>,
    defaults: CallOptions,
}

impl AuthzClient {
    /// Creates a client talking HTTP to `config.base_url`, caching in process memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: &AuthzConfig) -> Result<Self, Report<AuthzError>> {
        config.validate()?;
        let transport = Arc::new(HttpTransport::new(config)?);
        let provider = Arc::new(
            InMemoryProvider::new(Uuid::new_v4().to_string())
                .with_sentinel_ttl(config.cache.sentinel_ttl())
                .with_tombstone_ttl(config.cache.tombstone_ttl())
                .with_sweep_every(config.cache.sweep_every),
        );
        Self::from_parts(config, transport, provider)
    }

    /// Creates a client over an explicit transport and cache provider.
    ///
    /// Clients sharing a provider coordinate through it, whether they live in
    /// one process or several.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn from_parts(
        config: &AuthzConfig,
        transport: Arc<dyn AuthzTransport>,
        provider: Arc<dyn CacheProvider>,
    ) -> Result<Self, Report<AuthzError>> {
        config.validate()?;
        let names = Arc::new(match config.tenant_id {
            Some(tenant_id) => CacheNameProvider::for_tenant(tenant_id),
            None => CacheNameProvider::for_url(&config.base_url),
        });
        let ttls = Arc::new(CacheTtlProvider::from_settings(&config.cache));
        let cache = CacheManager::new(provider, names.clone(), ttls);
        let defaults = CallOptions {
            bypass_cache: config.bypass_cache,
            organization_id: config.organization_id,
            ..CallOptions::default()
        };
        Ok(Self {
            transport,
            cache,
            names,
            defaults,
        })
    }

    /// The cache engine backing this client.
    #[must_use]
    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    fn options(&self, options: CallOptions) -> CallOptions {
        options.merged_with(&self.defaults)
    }

    // ---- transport ----

    async fn call(
        &self,
        request: ApiRequest,
        not_found: impl FnOnce() -> AuthzError,
    ) -> Result<ApiResponse, Report<AuthzError>> {
        let response = self.transport.send(request).await?;
        if response.is_success() {
            return Ok(response);
        }
        Err(status_error(response, not_found).into())
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        not_found: impl FnOnce() -> AuthzError,
    ) -> Result<T, Report<AuthzError>> {
        self.call(request, not_found).await?.json()
    }

    /// Posts a create. With `if_not_exists`, a 409 reporting an identical
    /// entity resolves to that entity's ID.
    async fn post_create<E: Entity>(
        &self,
        input: &E,
        id_given: bool,
        if_not_exists: bool,
    ) -> Result<E, Report<AuthzError>> {
        let mut body = serde_json::Map::new();
        body.insert(
            E::BODY_FIELD.to_string(),
            serde_json::to_value(input).map_err(|e| AuthzError::validation(e.to_string()))?,
        );
        let request = ApiRequest::post(E::PATH, serde_json::Value::Object(body));
        let response = self.transport.send(request).await?;
        if response.is_success() {
            return response.json();
        }
        if if_not_exists && response.status == 409 {
            if let Ok(conflict) = serde_json::from_str::<ConflictBody>(&response.body) {
                if conflict.error.identical {
                    let existing = conflict.error.id;
                    if id_given && existing != input.uuid() {
                        return Err(AuthzError::Conflict {
                            details: format!(
                                "{} already exists with a different id: {}",
                                E::BODY_FIELD,
                                existing
                            ),
                        }
                        .into());
                    }
                    debug!(id = %existing, "identical entity already exists");
                    let mut item = input.clone();
                    item.set_uuid(existing);
                    return Ok(item);
                }
            }
        }
        let id = input.uuid();
        Err(status_error(response, || E::not_found(id.to_string())).into())
    }

    async fn fetch_page<T: DeserializeOwned>(
        &self,
        path: &str,
        pagination: &Pagination,
        extra: &[(String, String)],
        not_found: impl FnOnce() -> AuthzError,
    ) -> Result<ListResponse<T>, Report<AuthzError>> {
        pagination.validate()?;
        let request = ApiRequest::get(path)
            .with_query(pagination.query())
            .with_query(extra.iter().cloned());
        self.fetch(request, not_found).await
    }

    // ---- cache protocol ----

    async fn read_lock<T: CacheItem>(&self, key: &Key) -> Result<T, Option<Sentinel>> {
        match self.cache.get_item::<T>(key, true).await {
            Ok(Cached::Hit(item)) => Ok(item),
            Ok(Cached::Miss(sentinel)) => Err(sentinel),
            Err(e) => {
                warn!(error = %e, %key, "cache read failed, using the API");
                Err(None)
            }
        }
    }

    async fn read_items_lock<T: CacheItem>(&self, key: &Key) -> Result<Vec<T>, Option<Sentinel>> {
        match self.cache.get_items::<T>(key, true).await {
            Ok(Cached::Hit(items)) => Ok(items),
            Ok(Cached::Miss(sentinel)) => Err(sentinel),
            Err(e) => {
                warn!(error = %e, %key, "cache read failed, using the API");
                Err(None)
            }
        }
    }

    async fn peek<T: CacheItem>(&self, key: &Key) -> Option<T> {
        match self.cache.get_item::<T>(key, false).await {
            Ok(cached) => cached.hit(),
            Err(e) => {
                warn!(error = %e, %key, "cache read failed");
                None
            }
        }
    }

    async fn peek_items<T: CacheItem>(&self, key: &Key) -> Option<Vec<T>> {
        match self.cache.get_items::<T>(key, false).await {
            Ok(cached) => cached.hit(),
            Err(e) => {
                warn!(error = %e, %key, "cache read failed");
                None
            }
        }
    }

    /// Takes a read lock on a collection key that never holds a value itself.
    async fn collection_read_lock(&self, key: &Key) -> Option<Sentinel> {
        match self
            .cache
            .provider()
            .write_sentinel(SentinelKind::Read, std::slice::from_ref(key))
            .await
        {
            Ok(sentinel) => sentinel,
            Err(e) => {
                warn!(error = %e, %key, "failed to take collection lock");
                None
            }
        }
    }

    async fn write_lock<T: CacheItem>(&self, kind: SentinelKind, item: &T) -> WriteLock {
        match self.cache.take_item_lock(kind, item).await {
            Ok(Some(sentinel)) => WriteLock {
                sentinel: Some(sentinel),
                degraded: false,
            },
            Ok(None) => {
                debug!(%kind, "cache lock refused, keys will be invalidated after the call");
                WriteLock {
                    sentinel: None,
                    degraded: true,
                }
            }
            Err(e) => {
                warn!(error = %e, %kind, "failed to take cache lock, proceeding without it");
                WriteLock {
                    sentinel: None,
                    degraded: true,
                }
            }
        }
    }

    /// Reads one entity by key through the cache.
    async fn get_through_cache<E: Entity>(
        &self,
        key: Key,
        options: &CallOptions,
        request: ApiRequest,
        target: String,
    ) -> Result<E, Report<AuthzError>> {
        if options.bypass_cache {
            return self.fetch(request, || E::not_found(target)).await;
        }
        let sentinel = match self.read_lock::<E>(&key).await {
            Ok(item) => return Ok(item),
            Err(sentinel) => sentinel,
        };
        let result: Result<E, _> = self.fetch(request, || E::not_found(target)).await;
        if let Ok(item) = &result {
            self.cache.save_item(item, sentinel.as_ref(), false, &[]).await;
        }
        self.cache
            .release_lock(std::slice::from_ref(&key), sentinel.as_ref())
            .await;
        result
    }

    /// Creates an entity, short-circuiting when an identical one is cached.
    async fn create_through_cache<E: Entity>(
        &self,
        input: E,
        id_given: bool,
        options: &CallOptions,
        additional: &[Key],
    ) -> Result<E, Report<AuthzError>> {
        if !options.bypass_cache {
            let mut candidates = input.secondary_keys(self.cache.names());
            if id_given {
                candidates.push(input.primary_key(self.cache.names()));
            }
            for key in &candidates {
                if let Some(existing) = self.peek::<E>(key).await {
                    if existing.same_content(&input) && (!id_given || existing.uuid() == input.uuid()) {
                        debug!(%key, "identical entity cached, skipping create");
                        return Ok(existing);
                    }
                }
            }
        }

        let lock = self.write_lock(SentinelKind::Create, &input).await;
        let result = self
            .post_create(&input, id_given, options.if_not_exists)
            .await;
        if let Ok(created) = &result {
            if lock.degraded {
                self.cache.delete_item(created).await;
                self.cache.save_item(created, None, true, additional).await;
            } else {
                self.cache
                    .save_item(created, lock.sentinel.as_ref(), true, additional)
                    .await;
            }
        }
        self.cache
            .release_item_lock(SentinelKind::Create, &input, lock.sentinel.as_ref())
            .await;
        result
    }

    /// Applies a mutation under an update lock on `current`, then commits its result.
    async fn update_through_cache<E: Entity>(
        &self,
        current: &E,
        request: ApiRequest,
    ) -> Result<E, Report<AuthzError>> {
        let lock = self.write_lock(SentinelKind::Update, current).await;
        let id = current.uuid();
        let result: Result<E, _> = self.fetch(request, || E::not_found(id.to_string())).await;
        if let Ok(updated) = &result {
            if lock.degraded {
                self.cache.delete_item(current).await;
                self.cache.delete_item(updated).await;
            } else {
                self.cache
                    .save_item(updated, lock.sentinel.as_ref(), true, &[])
                    .await;
            }
        }
        self.cache
            .release_item_lock(SentinelKind::Update, current, lock.sentinel.as_ref())
            .await;
        result
    }

    /// Deletes an entity under a delete lock, which also invalidates
    /// everything registered as depending on it.
    async fn delete_through_cache<E: Entity>(&self, id: Uuid) -> Result<(), Report<AuthzError>> {
        let primary = E::placeholder(id).primary_key(self.cache.names());
        let item = self
            .peek::<E>(&primary)
            .await
            .unwrap_or_else(|| E::placeholder(id));

        let lock = self.write_lock(SentinelKind::Delete, &item).await;
        let request = ApiRequest::delete(format!("{}/{}", E::PATH, id));
        let result = self.call(request, || E::not_found(id.to_string())).await;
        if result.is_ok() && lock.degraded {
            self.cache.delete_item(&item).await;
        }
        self.cache
            .release_item_lock(SentinelKind::Delete, &item, lock.sentinel.as_ref())
            .await;
        result.map(|_| ())
    }

    /// Deletes an entity whose removal affects too much to invalidate
    /// precisely, then flushes the whole cache.
    async fn delete_and_flush<E: Entity>(&self, id: Uuid) -> Result<(), Report<AuthzError>> {
        let request = ApiRequest::delete(format!("{}/{}", E::PATH, id));
        self.call(request, || E::not_found(id.to_string())).await?;
        self.flush_cache().await
    }

    /// Lists every entity of a kind, caching the list when it fits in one page.
    async fn list_all_through_cache<E: Entity>(
        &self,
        options: &CallOptions,
        extra: &[(String, String)],
    ) -> Result<Vec<E>, Report<AuthzError>> {
        let use_cache = !options.bypass_cache && extra.is_empty();
        let collection = E::placeholder(Uuid::nil()).global_collection_key(self.cache.names());
        let sentinel = if use_cache {
            match self.read_items_lock::<E>(&collection).await {
                Ok(items) => return Ok(items),
                Err(sentinel) => sentinel,
            }
        } else {
            None
        };

        let result = self
            .fetch_all_pages::<E>(E::PATH, extra, sentinel.as_ref(), || {
                E::not_found(E::PATH.to_string())
            })
            .await;
        if let Ok((items, pages)) = &result {
            if *pages == 1 {
                self.cache
                    .save_global_collection(items, &collection, sentinel.as_ref())
                    .await;
            } else {
                debug!(key = %collection, pages, "multi-page collection not cached");
            }
        }
        self.cache
            .release_lock(std::slice::from_ref(&collection), sentinel.as_ref())
            .await;
        result.map(|(items, _)| items)
    }

    /// Follows `next` cursors to the end, saving each page's items under `sentinel`.
    ///
    /// A page that announces a successor without a cursor fails the listing.
    async fn fetch_all_pages<E: Entity>(
        &self,
        path: &str,
        extra: &[(String, String)],
        sentinel: Option<&Sentinel>,
        not_found: impl Fn() -> AuthzError,
    ) -> Result<(Vec<E>, usize), Report<AuthzError>> {
        let mut items = Vec::new();
        let mut pages = 0;
        let mut page = Pagination::default();
        loop {
            let response: ListResponse<E> = self
                .fetch_page(path, &page, extra, &not_found)
                .await?;
            pages += 1;
            response.check_next_cursor()?;
            self.cache
                .save_items_from_collection(&response.data, sentinel)
                .await;
            let next = response.next_page(&page);
            items.extend(response.data);
            match next {
                Some(next) => page = next,
                None => break,
            }
        }
        Ok((items, pages))
    }

    // ---- flush ----

    /// Drops every cached entry of this client.
    pub async fn flush_cache(&self) -> Result<(), Report<AuthzError>> {
        self.cache.flush().await.map_err(flush_error)
    }

    /// Drops cached edges along with everything derived from them.
    ///
    /// Pair collections and attribute paths are keyed under their source
    /// object, so this clears the whole tenant prefix.
    pub async fn flush_cache_edges(&self) -> Result<(), Report<AuthzError>> {
        self.flush_cache().await
    }

    /// Drops cached object types and edge types.
    pub async fn flush_cache_object_and_edge_types(&self) -> Result<(), Report<AuthzError>> {
        for prefix in self.names.type_prefixes() {
            self.cache.flush_prefix(&prefix).await.map_err(flush_error)?;
        }
        Ok(())
    }
}

fn organization_filter(options: &CallOptions) -> Vec<(String, String)> {
    options
        .organization_id
        .map(|org| vec![("organization_id".to_string(), org.to_string())])
        .unwrap_or_default()
}

fn flush_error(e: Report<trellis_cache::CacheError>) -> Report<AuthzError> {
    AuthzError::CacheFlushFailed {
        details: e.to_string(),
    }
    .into()
}

fn status_error(response: ApiResponse, not_found: impl FnOnce() -> AuthzError) -> AuthzError {
    match response.status {
        404 => not_found(),
        409 => AuthzError::Conflict {
            details: response.body,
        },
        400 => AuthzError::Validation {
            details: response.body,
        },
        status => AuthzError::RequestFailed {
            status,
            details: response.body,
        },
    }
}
