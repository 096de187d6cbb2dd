use super::{AuthzClient, Entity, organization_filter};
use crate::error::AuthzError;
use crate::keys::{OBJECT_ALIAS_KEY, OBJECT_COLLECTION_KEY, OBJECT_KEY};
use crate::models::{Object, USER_OBJECT_TYPE_ID};
use crate::options::CallOptions;
use crate::pagination::ListResponse;
use crate::transport::ApiRequest;
use rootcause::Report;
use serde_json::json;
use tracing::{debug, instrument};
use trellis_cache::KeyNameProvider;
use trellis_core::{ObjectId, ObjectTypeId};

impl AuthzClient {
    /// Creates an object, scoped to the organization in `options` if any.
    ///
    /// Objects without an alias are anonymous; any number of them may share a
    /// type and organization.
    #[instrument(skip(self, options))]
    pub async fn create_object(
        &self,
        id: Option<ObjectId>,
        type_id: ObjectTypeId,
        alias: Option<&str>,
        options: CallOptions,
    ) -> Result<Object, Report<AuthzError>> {
        let options = self.options(options);
        let input = Object {
            id: id.unwrap_or_else(ObjectId::new),
            alias: alias.map(str::to_string),
            type_id,
            organization_id: options.organization_or_nil(),
        };
        input.validate()?;
        self.create_through_cache(input, id.is_some(), &options, &[])
            .await
    }

    /// Fetches an object by ID.
    #[instrument(skip(self, options), fields(id = %id))]
    pub async fn get_object(
        &self,
        id: ObjectId,
        options: CallOptions,
    ) -> Result<Object, Report<AuthzError>> {
        let options = self.options(options);
        let key = self.names.key_name_with_string(OBJECT_KEY, &id.to_string());
        let request = ApiRequest::get(format!("{}/{}", Object::PATH, id));
        self.get_through_cache(key, &options, request, id.to_string())
            .await
    }

    /// Looks up an object by type and alias within the organization in `options`.
    ///
    /// User objects cannot be looked up by alias.
    #[instrument(skip(self, options))]
    pub async fn get_object_for_name(
        &self,
        type_id: ObjectTypeId,
        name: &str,
        options: CallOptions,
    ) -> Result<Object, Report<AuthzError>> {
        let options = self.options(options);
        if type_id == USER_OBJECT_TYPE_ID {
            return Err(AuthzError::validation("user objects must be looked up by ID").into());
        }
        if name.is_empty() {
            return Err(AuthzError::validation("object alias cannot be empty").into());
        }

        let organization_id = options.organization_or_nil();
        if !options.bypass_cache {
            let key = self.names.key_name(
                OBJECT_ALIAS_KEY,
                &[&type_id.to_string(), name, &organization_id.to_string()],
            );
            if let Some(cached) = self.peek::<Object>(&key).await {
                return Ok(cached);
            }
        }

        let found = self
            .list_objects_from_query(type_id, name, options)
            .await?
            .data
            .into_iter()
            .find(|o| o.type_id == type_id && o.alias.as_deref() == Some(name));
        found.ok_or_else(|| {
            AuthzError::ObjectNotFound {
                target: name.to_string(),
            }
            .into()
        })
    }

    /// Fetches one page of objects. Each object is cached individually.
    #[instrument(skip(self, options))]
    pub async fn list_objects(
        &self,
        options: CallOptions,
    ) -> Result<ListResponse<Object>, Report<AuthzError>> {
        let options = self.options(options);
        self.list_object_page(&options, Vec::new()).await
    }

    /// Fetches one page of objects of a type matching an alias.
    #[instrument(skip(self, options))]
    pub async fn list_objects_from_query(
        &self,
        type_id: ObjectTypeId,
        name: &str,
        options: CallOptions,
    ) -> Result<ListResponse<Object>, Report<AuthzError>> {
        let options = self.options(options);
        let query = vec![
            ("type_id".to_string(), type_id.to_string()),
            ("name".to_string(), name.to_string()),
        ];
        self.list_object_page(&options, query).await
    }

    async fn list_object_page(
        &self,
        options: &CallOptions,
        mut query: Vec<(String, String)>,
    ) -> Result<ListResponse<Object>, Report<AuthzError>> {
        let pagination = options.pagination.clone().unwrap_or_default();
        pagination.validate()?;
        query.extend(organization_filter(options));

        let collection = self.names.key_name_static(OBJECT_COLLECTION_KEY);
        let sentinel = if options.bypass_cache {
            None
        } else {
            self.collection_read_lock(&collection).await
        };
        let result: Result<ListResponse<Object>, _> = self
            .fetch_page(Object::PATH, &pagination, &query, || AuthzError::ObjectNotFound {
                target: Object::PATH.to_string(),
            })
            .await;
        if let Ok(page) = &result {
            self.cache
                .save_items_from_collection(&page.data, sentinel.as_ref())
                .await;
        }
        self.cache
            .release_lock(std::slice::from_ref(&collection), sentinel.as_ref())
            .await;
        result
    }

    /// Sets or clears an object's alias.
    #[instrument(skip(self, options), fields(id = %id))]
    pub async fn update_object(
        &self,
        id: ObjectId,
        alias: Option<&str>,
        options: CallOptions,
    ) -> Result<Object, Report<AuthzError>> {
        let options = self.options(options);
        if alias == Some("") {
            return Err(AuthzError::validation("object alias cannot be empty").into());
        }

        let key = self.names.key_name_with_string(OBJECT_KEY, &id.to_string());
        let cached = if options.bypass_cache {
            None
        } else {
            self.peek::<Object>(&key).await
        };
        if let Some(cached) = &cached {
            if cached.alias.as_deref() == alias {
                debug!("object unchanged, skipping update");
                return Ok(cached.clone());
            }
        }

        let current = cached.unwrap_or_else(|| Object::placeholder(id.as_uuid()));
        let request = ApiRequest::put(
            format!("{}/{}", Object::PATH, id),
            json!({ "id": id, "alias": alias, "source": options.source }),
        );
        self.update_through_cache(&current, request).await
    }

    /// Deletes an object. Every cached collection and path it appears in is
    /// invalidated before the request is sent.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn delete_object(&self, id: ObjectId) -> Result<(), Report<AuthzError>> {
        self.delete_through_cache::<Object>(id.as_uuid()).await
    }
}
