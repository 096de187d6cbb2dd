use super::{AuthzClient, Entity, organization_filter};
use crate::error::AuthzError;
use crate::keys::{EDGE_TYPE_KEY, EDGE_TYPE_NAME_KEY};
use crate::models::{Attribute, EdgeType, same_attributes, validate_attributes};
use crate::options::CallOptions;
use crate::pagination::ListResponse;
use crate::transport::ApiRequest;
use rootcause::Report;
use serde_json::json;
use tracing::{debug, instrument};
use trellis_cache::KeyNameProvider;
use trellis_core::{EdgeTypeId, ObjectTypeId};

impl AuthzClient {
    /// Creates an edge type between two object types.
    #[instrument(skip(self, attributes, options))]
    pub async fn create_edge_type(
        &self,
        id: Option<EdgeTypeId>,
        source_object_type_id: ObjectTypeId,
        target_object_type_id: ObjectTypeId,
        type_name: &str,
        attributes: Vec<Attribute>,
        options: CallOptions,
    ) -> Result<EdgeType, Report<AuthzError>> {
        let options = self.options(options);
        let input = EdgeType {
            id: id.unwrap_or_else(EdgeTypeId::new),
            type_name: type_name.to_string(),
            source_object_type_id,
            target_object_type_id,
            attributes,
            organization_id: options.organization_or_nil(),
        };
        input.validate()?;
        self.create_through_cache(input, id.is_some(), &options, &[])
            .await
    }

    /// Fetches an edge type by ID.
    #[instrument(skip(self, options), fields(id = %id))]
    pub async fn get_edge_type(
        &self,
        id: EdgeTypeId,
        options: CallOptions,
    ) -> Result<EdgeType, Report<AuthzError>> {
        let options = self.options(options);
        let key = self.names.key_name_with_string(EDGE_TYPE_KEY, &id.to_string());
        let request = ApiRequest::get(format!("{}/{}", EdgeType::PATH, id));
        self.get_through_cache(key, &options, request, id.to_string())
            .await
    }

    /// Resolves an edge type name to its ID.
    #[instrument(skip(self, options))]
    pub async fn find_edge_type_id(
        &self,
        type_name: &str,
        options: CallOptions,
    ) -> Result<EdgeTypeId, Report<AuthzError>> {
        let options = self.options(options);
        if !options.bypass_cache {
            let key = self.names.key_name_with_string(EDGE_TYPE_NAME_KEY, type_name);
            if let Some(cached) = self.peek::<EdgeType>(&key).await {
                return Ok(cached.id);
            }
        }
        self.list_edge_types(options)
            .await?
            .into_iter()
            .find(|t| t.type_name == type_name)
            .map(|t| t.id)
            .ok_or_else(|| {
                AuthzError::EdgeTypeNotFound {
                    target: type_name.to_string(),
                }
                .into()
            })
    }

    /// Lists every edge type, following all pages.
    ///
    /// Lists scoped to an organization are never cached.
    #[instrument(skip(self, options))]
    pub async fn list_edge_types(
        &self,
        options: CallOptions,
    ) -> Result<Vec<EdgeType>, Report<AuthzError>> {
        let options = self.options(options);
        let extra = organization_filter(&options);
        self.list_all_through_cache(&options, &extra).await
    }

    /// Fetches one page of edge types, bypassing the cache.
    #[instrument(skip(self, options))]
    pub async fn list_edge_types_paginated(
        &self,
        options: CallOptions,
    ) -> Result<ListResponse<EdgeType>, Report<AuthzError>> {
        let options = self.options(options);
        let extra = organization_filter(&options);
        let pagination = options.pagination.unwrap_or_default();
        self.fetch_page(EdgeType::PATH, &pagination, &extra, || {
            AuthzError::EdgeTypeNotFound {
                target: EdgeType::PATH.to_string(),
            }
        })
        .await
    }

    /// Renames an edge type and replaces its attributes.
    ///
    /// Attribute changes alter the result of attribute checks anywhere in the
    /// graph, so the cache is flushed after the update.
    #[instrument(skip(self, attributes, options), fields(id = %id))]
    pub async fn update_edge_type(
        &self,
        id: EdgeTypeId,
        type_name: &str,
        attributes: Vec<Attribute>,
        options: CallOptions,
    ) -> Result<EdgeType, Report<AuthzError>> {
        let options = self.options(options);
        if type_name.is_empty() {
            return Err(AuthzError::validation("edge type name cannot be empty").into());
        }
        validate_attributes(&attributes)?;

        let key = self.names.key_name_with_string(EDGE_TYPE_KEY, &id.to_string());
        let cached = if options.bypass_cache {
            None
        } else {
            self.peek::<EdgeType>(&key).await
        };
        if let Some(cached) = &cached {
            if cached.type_name == type_name && same_attributes(&cached.attributes, &attributes) {
                debug!("edge type unchanged, skipping update");
                return Ok(cached.clone());
            }
        }

        let current = cached.unwrap_or_else(|| EdgeType::placeholder(id.as_uuid()));
        let request = ApiRequest::put(
            format!("{}/{}", EdgeType::PATH, id),
            json!({ "type_name": type_name, "attributes": attributes }),
        );
        let updated = self.update_through_cache(&current, request).await?;
        self.flush_cache().await?;
        Ok(updated)
    }

    /// Deletes an edge type and every edge of that type, then flushes the cache.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn delete_edge_type(&self, id: EdgeTypeId) -> Result<(), Report<AuthzError>> {
        self.delete_and_flush::<EdgeType>(id.as_uuid()).await
    }
}
