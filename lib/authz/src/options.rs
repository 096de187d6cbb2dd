//! Per-call options.

use crate::pagination::Pagination;
use trellis_core::OrganizationId;

/// Options accepted by client operations.
///
/// Options a given operation has no use for are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Treat "already exists with identical content" as success on create.
    pub if_not_exists: bool,
    /// Skip the cache for this call.
    pub bypass_cache: bool,
    /// Organization to scope the call to.
    pub organization_id: Option<OrganizationId>,
    /// Pagination of list calls.
    pub pagination: Option<Pagination>,
    /// Caller identification forwarded with object updates.
    pub source: Option<String>,
}

impl CallOptions {
    /// Default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a create idempotent.
    #[must_use]
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    /// Skips the cache.
    #[must_use]
    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    /// Scopes the call to an organization.
    #[must_use]
    pub fn organization(mut self, organization_id: OrganizationId) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    /// Sets pagination parameters.
    #[must_use]
    pub fn pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Sets the caller identification.
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Fills unset values from client-level defaults.
    #[must_use]
    pub(crate) fn merged_with(mut self, defaults: &CallOptions) -> Self {
        self.if_not_exists |= defaults.if_not_exists;
        self.bypass_cache |= defaults.bypass_cache;
        if self.organization_id.is_none() {
            self.organization_id = defaults.organization_id;
        }
        if self.pagination.is_none() {
            self.pagination.clone_from(&defaults.pagination);
        }
        if self.source.is_none() {
            self.source.clone_from(&defaults.source);
        }
        self
    }

    /// Organization to scope to, nil if none.
    #[must_use]
    pub(crate) fn organization_or_nil(&self) -> OrganizationId {
        self.organization_id.unwrap_or_default()
    }
}
