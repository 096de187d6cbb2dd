use super::{AuthzClient, Entity};
use crate::error::AuthzError;
use crate::keys::{OBJECT_TYPE_KEY, OBJECT_TYPE_NAME_KEY};
use crate::models::ObjectType;
use crate::options::CallOptions;
use crate::pagination::ListResponse;
use crate::transport::ApiRequest;
use rootcause::Report;
use tracing::instrument;
use trellis_cache::KeyNameProvider;
use trellis_core::ObjectTypeId;

impl AuthzClient {
    /// Creates an object type. A new ID is generated when `id` is `None`.
    #[instrument(skip(self, options))]
    pub async fn create_object_type(
        &self,
        id: Option<ObjectTypeId>,
        type_name: &str,
        options: CallOptions,
    ) -> Result<ObjectType, Report<AuthzError>> {
        let options = self.options(options);
        let input = ObjectType::new(id.unwrap_or_else(ObjectTypeId::new), type_name);
        input.validate()?;
        self.create_through_cache(input, id.is_some(), &options, &[])
            .await
    }

    /// Fetches an object type by ID.
    #[instrument(skip(self, options), fields(id = %id))]
    pub async fn get_object_type(
        &self,
        id: ObjectTypeId,
        options: CallOptions,
    ) -> Result<ObjectType, Report<AuthzError>> {
        let options = self.options(options);
        let key = self.names.key_name_with_string(OBJECT_TYPE_KEY, &id.to_string());
        let request = ApiRequest::get(format!("{}/{}", ObjectType::PATH, id));
        self.get_through_cache(key, &options, request, id.to_string())
            .await
    }

    /// Resolves an object type name to its ID.
    #[instrument(skip(self, options))]
    pub async fn find_object_type_id(
        &self,
        type_name: &str,
        options: CallOptions,
    ) -> Result<ObjectTypeId, Report<AuthzError>> {
        let options = self.options(options);
        if !options.bypass_cache {
            let key = self.names.key_name_with_string(OBJECT_TYPE_NAME_KEY, type_name);
            if let Some(cached) = self.peek::<ObjectType>(&key).await {
                return Ok(cached.id);
            }
        }
        self.list_object_types(options)
            .await?
            .into_iter()
            .find(|t| t.type_name == type_name)
            .map(|t| t.id)
            .ok_or_else(|| {
                AuthzError::ObjectTypeNotFound {
                    target: type_name.to_string(),
                }
                .into()
            })
    }

    /// Lists every object type, following all pages.
    #[instrument(skip(self, options))]
    pub async fn list_object_types(
        &self,
        options: CallOptions,
    ) -> Result<Vec<ObjectType>, Report<AuthzError>> {
        let options = self.options(options);
        self.list_all_through_cache(&options, &[]).await
    }

    /// Fetches one page of object types, bypassing the cache.
    #[instrument(skip(self, options))]
    pub async fn list_object_types_paginated(
        &self,
        options: CallOptions,
    ) -> Result<ListResponse<ObjectType>, Report<AuthzError>> {
        let options = self.options(options);
        let pagination = options.pagination.unwrap_or_default();
        self.fetch_page(ObjectType::PATH, &pagination, &[], || {
            AuthzError::ObjectTypeNotFound {
                target: ObjectType::PATH.to_string(),
            }
        })
        .await
    }

    /// Deletes an object type and flushes the cache, since any cached object
    /// or edge may have referenced it.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn delete_object_type(&self, id: ObjectTypeId) -> Result<(), Report<AuthzError>> {
        self.delete_and_flush::<ObjectType>(id.as_uuid()).await
    }
}
