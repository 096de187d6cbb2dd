//! Backfill of organizations onto entities created before organizations existed.

use super::{AuthzClient, Entity};
use crate::error::AuthzError;
use crate::keys::{EDGE_TYPE_KEY, OBJECT_KEY};
use crate::models::{EdgeType, Object};
use crate::transport::ApiRequest;
use rootcause::Report;
use serde_json::json;
use tracing::instrument;
use trellis_cache::KeyNameProvider;
use trellis_core::{EdgeTypeId, ObjectId, OrganizationId};

impl AuthzClient {
    /// Moves an unscoped object into an organization.
    #[instrument(skip(self))]
    pub async fn add_organization_to_object(
        &self,
        id: ObjectId,
        organization_id: OrganizationId,
    ) -> Result<Object, Report<AuthzError>> {
        if organization_id.is_nil() {
            return Err(AuthzError::validation("organization is required").into());
        }
        let key = self.names.key_name_with_string(OBJECT_KEY, &id.to_string());
        let current = self
            .peek::<Object>(&key)
            .await
            .unwrap_or_else(|| Object::placeholder(id.as_uuid()));
        let request = ApiRequest::put(
            format!("/authz/migrate/objects/{}", id),
            json!({ "organization_id": organization_id }),
        );
        self.update_through_cache(&current, request).await
    }

    /// Moves an unscoped edge type into an organization.
    #[instrument(skip(self))]
    pub async fn add_organization_to_edge_type(
        &self,
        id: EdgeTypeId,
        organization_id: OrganizationId,
    ) -> Result<EdgeType, Report<AuthzError>> {
        if organization_id.is_nil() {
            return Err(AuthzError::validation("organization is required").into());
        }
        let key = self.names.key_name_with_string(EDGE_TYPE_KEY, &id.to_string());
        let current = self
            .peek::<EdgeType>(&key)
            .await
            .unwrap_or_else(|| EdgeType::placeholder(id.as_uuid()));
        let request = ApiRequest::put(
            format!("/authz/migrate/edgetypes/{}", id),
            json!({ "organization_id": organization_id }),
        );
        self.update_through_cache(&current, request).await
    }
}
