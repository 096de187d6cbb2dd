use super::{AuthzClient, Entity};
use crate::error::AuthzError;
use crate::keys::{ORGANIZATION_KEY, ORGANIZATION_NAME_KEY};
use crate::models::{Organization, Region};
use crate::options::CallOptions;
use crate::pagination::ListResponse;
use crate::transport::ApiRequest;
use rootcause::Report;
use serde_json::json;
use tracing::{debug, instrument};
use trellis_cache::KeyNameProvider;
use trellis_core::OrganizationId;

impl AuthzClient {
    /// Creates an organization.
    #[instrument(skip(self, options))]
    pub async fn create_organization(
        &self,
        id: Option<OrganizationId>,
        name: &str,
        region: Region,
        options: CallOptions,
    ) -> Result<Organization, Report<AuthzError>> {
        let options = self.options(options);
        let input = Organization {
            id: id.unwrap_or_else(OrganizationId::new),
            name: name.to_string(),
            region,
        };
        input.validate()?;
        self.create_through_cache(input, id.is_some(), &options, &[])
            .await
    }

    /// Fetches an organization by ID.
    #[instrument(skip(self, options), fields(id = %id))]
    pub async fn get_organization(
        &self,
        id: OrganizationId,
        options: CallOptions,
    ) -> Result<Organization, Report<AuthzError>> {
        let options = self.options(options);
        let key = self.names.key_name_with_string(ORGANIZATION_KEY, &id.to_string());
        let request = ApiRequest::get(format!("{}/{}", Organization::PATH, id));
        self.get_through_cache(key, &options, request, id.to_string())
            .await
    }

    /// Looks up an organization by name.
    #[instrument(skip(self, options))]
    pub async fn get_organization_for_name(
        &self,
        name: &str,
        options: CallOptions,
    ) -> Result<Organization, Report<AuthzError>> {
        let options = self.options(options);
        if name.is_empty() {
            return Err(AuthzError::validation("organization name cannot be empty").into());
        }
        if !options.bypass_cache {
            let key = self.names.key_name_with_string(ORGANIZATION_NAME_KEY, name);
            if let Some(cached) = self.peek::<Organization>(&key).await {
                return Ok(cached);
            }
        }
        self.list_organizations(options)
            .await?
            .into_iter()
            .find(|o| o.name == name)
            .ok_or_else(|| {
                AuthzError::OrganizationNotFound {
                    target: name.to_string(),
                }
                .into()
            })
    }

    /// Lists every organization, following all pages.
    #[instrument(skip(self, options))]
    pub async fn list_organizations(
        &self,
        options: CallOptions,
    ) -> Result<Vec<Organization>, Report<AuthzError>> {
        let options = self.options(options);
        self.list_all_through_cache(&options, &[]).await
    }

    /// Fetches one page of organizations, bypassing the cache.
    #[instrument(skip(self, options))]
    pub async fn list_organizations_paginated(
        &self,
        options: CallOptions,
    ) -> Result<ListResponse<Organization>, Report<AuthzError>> {
        let options = self.options(options);
        let pagination = options.pagination.unwrap_or_default();
        self.fetch_page(Organization::PATH, &pagination, &[], || {
            AuthzError::OrganizationNotFound {
                target: Organization::PATH.to_string(),
            }
        })
        .await
    }

    /// Renames an organization or moves it to another region.
    #[instrument(skip(self, options), fields(id = %id))]
    pub async fn update_organization(
        &self,
        id: OrganizationId,
        name: &str,
        region: Region,
        options: CallOptions,
    ) -> Result<Organization, Report<AuthzError>> {
        let options = self.options(options);
        if name.is_empty() {
            return Err(AuthzError::validation("organization name cannot be empty").into());
        }

        let key = self.names.key_name_with_string(ORGANIZATION_KEY, &id.to_string());
        let cached = if options.bypass_cache {
            None
        } else {
            self.peek::<Organization>(&key).await
        };
        if let Some(cached) = &cached {
            if cached.name == name && cached.region == region {
                debug!("organization unchanged, skipping update");
                return Ok(cached.clone());
            }
        }

        let current = cached.unwrap_or_else(|| Organization::placeholder(id.as_uuid()));
        let request = ApiRequest::put(
            format!("{}/{}", Organization::PATH, id),
            json!({ "name": name, "region": region }),
        );
        self.update_through_cache(&current, request).await
    }

    /// Deletes an organization and flushes the cache, since objects and edge
    /// types scoped to it go away with it.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn delete_organization(&self, id: OrganizationId) -> Result<(), Report<AuthzError>> {
        self.delete_and_flush::<Organization>(id.as_uuid()).await
    }
}
