use super::{AuthzClient, Entity, organization_filter};
use crate::error::AuthzError;
use crate::keys::{EDGE_COLLECTION_KEY, EDGE_FULL_KEY, EDGE_KEY, EDGES_OBJ_TO_OBJ, OBJECT_EDGES_KEY};
use crate::models::{Edge, Object};
use crate::options::CallOptions;
use crate::pagination::ListResponse;
use crate::transport::ApiRequest;
use rootcause::Report;
use tracing::{debug, instrument, warn};
use trellis_cache::{Key, KeyNameProvider, SentinelKind};
use trellis_core::{EdgeId, EdgeTypeId, ObjectId};

impl AuthzClient {
    fn pair_key(&self, source: ObjectId, target: ObjectId) -> Key {
        self.names
            .key_name(EDGES_OBJ_TO_OBJ, &[&source.to_string(), &target.to_string()])
    }

    fn object_edges_key(&self, object_id: ObjectId) -> Key {
        self.names
            .key_name_with_string(OBJECT_EDGES_KEY, &object_id.to_string())
    }

    /// Creates an edge from `source_object_id` to `target_object_id`.
    ///
    /// Cached edge collections of both endpoints are invalidated.
    #[instrument(skip(self, options))]
    pub async fn create_edge(
        &self,
        id: Option<EdgeId>,
        source_object_id: ObjectId,
        target_object_id: ObjectId,
        edge_type_id: EdgeTypeId,
        options: CallOptions,
    ) -> Result<Edge, Report<AuthzError>> {
        let options = self.options(options);
        let input = Edge::new(
            id.unwrap_or_else(EdgeId::new),
            source_object_id,
            target_object_id,
            edge_type_id,
        );
        input.validate()?;
        let additional = [
            self.pair_key(source_object_id, target_object_id),
            self.object_edges_key(source_object_id),
            self.pair_key(target_object_id, source_object_id),
            self.object_edges_key(target_object_id),
        ];
        self.create_through_cache(input, id.is_some(), &options, &additional)
            .await
    }

    /// Fetches an edge by ID.
    #[instrument(skip(self, options), fields(id = %id))]
    pub async fn get_edge(&self, id: EdgeId, options: CallOptions) -> Result<Edge, Report<AuthzError>> {
        let options = self.options(options);
        let key = self.names.key_name_with_string(EDGE_KEY, &id.to_string());
        let request = ApiRequest::get(format!("{}/{}", Edge::PATH, id));
        self.get_through_cache(key, &options, request, id.to_string())
            .await
    }

    /// Finds the edge of a given type between two objects.
    #[instrument(skip(self, options))]
    pub async fn find_edge(
        &self,
        source_object_id: ObjectId,
        target_object_id: ObjectId,
        edge_type_id: EdgeTypeId,
        options: CallOptions,
    ) -> Result<Edge, Report<AuthzError>> {
        let options = self.options(options);
        let wanted = Edge::new(EdgeId::nil(), source_object_id, target_object_id, edge_type_id);
        wanted.validate()?;

        if !options.bypass_cache {
            if let Some(edge) = self.find_cached_edge(&wanted).await {
                return Ok(edge);
            }
        }

        let collection = self.names.key_name_static(EDGE_COLLECTION_KEY);
        let sentinel = if options.bypass_cache {
            None
        } else {
            self.collection_read_lock(&collection).await
        };
        let target = format!(
            "{} -> {} ({})",
            source_object_id, target_object_id, edge_type_id
        );
        let request = ApiRequest::get(Edge::PATH).with_query([
            ("source_object_id", source_object_id.to_string()),
            ("target_object_id", target_object_id.to_string()),
            ("edge_type_id", edge_type_id.to_string()),
        ]);
        let result: Result<ListResponse<Edge>, _> = self
            .fetch(request, || AuthzError::EdgeNotFound {
                target: target.clone(),
            })
            .await;
        let result = result.and_then(|page| match page.data.len() {
            0 => Err(AuthzError::EdgeNotFound { target }.into()),
            1 => Ok(page.data),
            n => Err(AuthzError::InvalidResponse {
                details: format!("expected one edge for {}, got {}", target, n),
            }
            .into()),
        });
        if let Ok(edges) = &result {
            self.cache
                .save_items_from_collection(edges, sentinel.as_ref())
                .await;
        }
        self.cache
            .release_lock(std::slice::from_ref(&collection), sentinel.as_ref())
            .await;
        result.map(|mut edges| edges.remove(0))
    }

    async fn find_cached_edge(&self, wanted: &Edge) -> Option<Edge> {
        let triple = self.names.key_name(
            EDGE_FULL_KEY,
            &[
                &wanted.source_object_id.to_string(),
                &wanted.target_object_id.to_string(),
                &wanted.edge_type_id.to_string(),
            ],
        );
        if let Some(edge) = self.peek::<Edge>(&triple).await {
            return Some(edge);
        }
        let pair = self.pair_key(wanted.source_object_id, wanted.target_object_id);
        if let Some(edges) = self.peek_items::<Edge>(&pair).await {
            if let Some(edge) = edges.into_iter().find(|e| e.equals_ignoring_id(wanted)) {
                return Some(edge);
            }
        }
        let object_edges = self.object_edges_key(wanted.source_object_id);
        self.peek_items::<Edge>(&object_edges)
            .await?
            .into_iter()
            .find(|e| e.equals_ignoring_id(wanted))
    }

    /// Fetches one page of all edges, bypassing the cache.
    #[instrument(skip(self, options))]
    pub async fn list_edges(&self, options: CallOptions) -> Result<ListResponse<Edge>, Report<AuthzError>> {
        let options = self.options(options);
        let pagination = options.pagination.clone().unwrap_or_default();
        self.fetch_page(Edge::PATH, &pagination, &organization_filter(&options), || {
            AuthzError::EdgeNotFound {
                target: Edge::PATH.to_string(),
            }
        })
        .await
    }

    /// Fetches one page of the edges starting or ending at an object.
    ///
    /// The object's edge collection is cached when the first unfiltered page
    /// holds every edge.
    #[instrument(skip(self, options), fields(object_id = %object_id))]
    pub async fn list_edges_on_object(
        &self,
        object_id: ObjectId,
        options: CallOptions,
    ) -> Result<ListResponse<Edge>, Report<AuthzError>> {
        let options = self.options(options);
        let pagination = options.pagination.clone().unwrap_or_default();
        pagination.validate()?;

        let cacheable =
            !options.bypass_cache && pagination.is_first_page() && pagination.filter.is_none();
        let collection = self.object_edges_key(object_id);
        let sentinel = if cacheable {
            match self.read_items_lock::<Edge>(&collection).await {
                Ok(edges) if edges.len() <= pagination.limit() as usize => {
                    return Ok(ListResponse::single_page(edges));
                }
                Ok(edges) => {
                    debug!(cached = edges.len(), limit = pagination.limit(), "cached edges exceed page size");
                    None
                }
                Err(sentinel) => sentinel,
            }
        } else {
            None
        };

        let path = format!("{}/{}/edges", Object::PATH, object_id);
        let result: Result<ListResponse<Edge>, _> = self
            .fetch_page(&path, &pagination, &[], || AuthzError::ObjectNotFound {
                target: object_id.to_string(),
            })
            .await;
        if let Ok(page) = &result {
            if page.is_complete() {
                let owner = Object::placeholder(object_id.as_uuid());
                self.cache
                    .save_collection(&owner, &page.data, &collection, &collection, sentinel.as_ref())
                    .await;
            }
        }
        self.cache
            .release_lock(std::slice::from_ref(&collection), sentinel.as_ref())
            .await;
        result
    }

    /// Lists every edge from `source_object_id` to `target_object_id`.
    #[instrument(skip(self, options))]
    pub async fn list_edges_between_objects(
        &self,
        source_object_id: ObjectId,
        target_object_id: ObjectId,
        options: CallOptions,
    ) -> Result<Vec<Edge>, Report<AuthzError>> {
        let options = self.options(options);
        let pair = self.pair_key(source_object_id, target_object_id);
        let sentinel = if options.bypass_cache {
            None
        } else {
            let object_edges = self.object_edges_key(source_object_id);
            if let Some(edges) = self.peek_items::<Edge>(&object_edges).await {
                return Ok(edges
                    .into_iter()
                    .filter(|e| {
                        e.source_object_id == source_object_id
                            && e.target_object_id == target_object_id
                    })
                    .collect());
            }
            match self.read_items_lock::<Edge>(&pair).await {
                Ok(edges) => return Ok(edges),
                Err(sentinel) => sentinel,
            }
        };

        let path = format!("{}/{}/edges", Object::PATH, source_object_id);
        let extra = [("target_object_id".to_string(), target_object_id.to_string())];
        let result = self
            .fetch_all_pages::<Edge>(&path, &extra, None, || AuthzError::ObjectNotFound {
                target: source_object_id.to_string(),
            })
            .await;
        match &result {
            Ok((edges, 1)) => {
                let owner = Object::placeholder(source_object_id.as_uuid());
                self.cache
                    .save_collection(&owner, edges, &pair, &pair, sentinel.as_ref())
                    .await;
            }
            Ok((_, pages)) => debug!(key = %pair, pages, "multi-page edge list not cached"),
            Err(_) => {}
        }
        self.cache
            .release_lock(std::slice::from_ref(&pair), sentinel.as_ref())
            .await;
        result.map(|(edges, _)| edges)
    }

    /// Deletes an edge.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn delete_edge(&self, id: EdgeId) -> Result<(), Report<AuthzError>> {
        self.delete_through_cache::<Edge>(id.as_uuid()).await
    }

    /// Deletes every edge starting or ending at an object.
    ///
    /// Everything cached about the object's edges, on either endpoint, is
    /// invalidated before the request is sent.
    #[instrument(skip(self), fields(object_id = %object_id))]
    pub async fn delete_edges_by_object(&self, object_id: ObjectId) -> Result<(), Report<AuthzError>> {
        let object = Object::placeholder(object_id.as_uuid());
        let (sentinel, degraded) = match self
            .cache
            .take_per_item_collection_lock(SentinelKind::Delete, &[], &object)
            .await
        {
            Ok(sentinel) => (sentinel, false),
            Err(e) => {
                warn!(error = %e, "failed to take cache lock, proceeding without it");
                (None, true)
            }
        };

        let request = ApiRequest::delete(format!("{}/{}/edges", Object::PATH, object_id));
        let result = self
            .call(request, || AuthzError::ObjectNotFound {
                target: object_id.to_string(),
            })
            .await;
        if result.is_ok() && degraded {
            self.cache.delete_item(&object).await;
        }
        self.cache
            .release_per_item_collection_lock(&[], &object, sentinel.as_ref())
            .await;
        result.map(|_| ())
    }
}
