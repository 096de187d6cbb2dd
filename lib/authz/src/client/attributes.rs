use super::{AuthzClient, Entity};
use crate::error::AuthzError;
use crate::keys::ATTRIBUTE_PATH_KEY;
use crate::models::{AttributePathNode, CheckAttributeResponse, Object};
use crate::options::CallOptions;
use crate::transport::ApiRequest;
use rootcause::Report;
use serde::Deserialize;
use tracing::{debug, instrument};
use trellis_cache::KeyNameProvider;
use trellis_core::{ObjectId, ObjectTypeId};

#[derive(Deserialize)]
struct ReachableObjects {
    data: Vec<ObjectId>,
}

impl AuthzClient {
    /// Checks whether `source_object_id` has `attribute` on `target_object_id`.
    ///
    /// Positive results are cached with the path proving them and dropped when
    /// any object or edge on that path changes. Negative results are never
    /// cached: nothing would invalidate them when a later edge opens a path.
    #[instrument(skip(self, options))]
    pub async fn check_attribute(
        &self,
        source_object_id: ObjectId,
        target_object_id: ObjectId,
        attribute: &str,
        options: CallOptions,
    ) -> Result<CheckAttributeResponse, Report<AuthzError>> {
        let options = self.options(options);
        if attribute.is_empty() {
            return Err(AuthzError::validation("attribute name cannot be empty").into());
        }
        if source_object_id.is_nil() || target_object_id.is_nil() {
            return Err(AuthzError::validation("source and target objects are required").into());
        }

        let key = self.names.key_name(
            ATTRIBUTE_PATH_KEY,
            &[
                &source_object_id.to_string(),
                &target_object_id.to_string(),
                attribute,
            ],
        );
        let sentinel = if options.bypass_cache {
            None
        } else {
            match self.read_items_lock::<AttributePathNode>(&key).await {
                Ok(path) => {
                    debug!(hops = path.len(), "attribute path cached");
                    return Ok(CheckAttributeResponse {
                        has_attribute: true,
                        path,
                    });
                }
                Err(sentinel) => sentinel,
            }
        };

        let request = ApiRequest::get("/authz/checkattribute").with_query([
            ("source_object_id", source_object_id.to_string()),
            ("target_object_id", target_object_id.to_string()),
            ("attribute", attribute.to_string()),
        ]);
        let result: Result<CheckAttributeResponse, _> = self
            .fetch(request, || AuthzError::ObjectNotFound {
                target: format!("{} or {}", source_object_id, target_object_id),
            })
            .await;
        if let Ok(response) = &result {
            if response.has_attribute {
                let owner = Object::placeholder(source_object_id.as_uuid());
                self.cache
                    .save_collection(&owner, &response.path, &key, &key, sentinel.as_ref())
                    .await;
            }
        }
        self.cache
            .release_lock(std::slice::from_ref(&key), sentinel.as_ref())
            .await;
        result
    }

    /// Lists the attributes `source_object_id` has on `target_object_id`. Never cached.
    #[instrument(skip(self))]
    pub async fn list_attributes(
        &self,
        source_object_id: ObjectId,
        target_object_id: ObjectId,
    ) -> Result<Vec<String>, Report<AuthzError>> {
        let request = ApiRequest::get("/authz/listattributes").with_query([
            ("source_object_id", source_object_id.to_string()),
            ("target_object_id", target_object_id.to_string()),
        ]);
        self.fetch(request, || AuthzError::ObjectNotFound {
            target: format!("{} or {}", source_object_id, target_object_id),
        })
        .await
    }

    /// Lists objects of a type on which `source_object_id` has `attribute`. Never cached.
    #[instrument(skip(self))]
    pub async fn list_objects_reachable_with_attribute(
        &self,
        source_object_id: ObjectId,
        target_object_type_id: ObjectTypeId,
        attribute: &str,
    ) -> Result<Vec<ObjectId>, Report<AuthzError>> {
        if attribute.is_empty() {
            return Err(AuthzError::validation("attribute name cannot be empty").into());
        }
        let request = ApiRequest::get("/authz/listobjectsreachablewithattribute").with_query([
            ("source_object_id", source_object_id.to_string()),
            ("target_object_type_id", target_object_type_id.to_string()),
            ("attribute", attribute.to_string()),
        ]);
        let reachable: ReachableObjects = self
            .fetch(request, || AuthzError::ObjectNotFound {
                target: source_object_id.to_string(),
            })
            .await?;
        Ok(reachable.data)
    }
}
