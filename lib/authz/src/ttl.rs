//! Per-kind cache TTLs with random jitter.
//!
//! Entities created in a batch would otherwise all expire in the same instant,
//! so every TTL is `base + uniform[0, window)`.

use crate::config::CacheSettings;
use rand::Rng;
use std::time::Duration;
use trellis_cache::{SKIP_CACHE_TTL, TtlId, TtlProvider};

/// TTL class of object types.
pub const OBJECT_TYPE_TTL: TtlId = TtlId("ObjectTypeTTL");
/// TTL class of edge types.
pub const EDGE_TYPE_TTL: TtlId = TtlId("EdgeTypeTTL");
/// TTL class of objects.
pub const OBJECT_TTL: TtlId = TtlId("ObjectTTL");
/// TTL class of edges and attribute paths.
pub const EDGE_TTL: TtlId = TtlId("EdgeTTL");
/// TTL class of organizations.
pub const ORGANIZATION_TTL: TtlId = TtlId("OrganizationTTL");

/// TTL policy of the authorization client.
#[derive(Debug, Clone)]
pub struct CacheTtlProvider {
    object_type: Duration,
    edge_type: Duration,
    object: Duration,
    edge: Duration,
    organization: Duration,
    jitter_window: Duration,
}

impl CacheTtlProvider {
    /// Creates a policy from explicit base TTLs.
    #[must_use]
    pub fn new(
        object_type: Duration,
        edge_type: Duration,
        object: Duration,
        edge: Duration,
        organization: Duration,
    ) -> Self {
        Self {
            object_type,
            edge_type,
            object,
            edge,
            organization,
            jitter_window: Duration::ZERO,
        }
    }

    /// Creates a policy from configuration.
    #[must_use]
    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(
            Duration::from_secs(settings.object_type_ttl_secs),
            Duration::from_secs(settings.edge_type_ttl_secs),
            Duration::from_secs(settings.object_ttl_secs),
            Duration::from_secs(settings.edge_ttl_secs),
            Duration::from_secs(settings.organization_ttl_secs),
        )
        .with_jitter(Duration::from_millis(settings.jitter_window_ms))
    }

    /// Sets the jitter window.
    #[must_use]
    pub fn with_jitter(mut self, window: Duration) -> Self {
        self.jitter_window = window;
        self
    }

    fn base(&self, id: TtlId) -> Duration {
        match id {
            OBJECT_TYPE_TTL => self.object_type,
            EDGE_TYPE_TTL => self.edge_type,
            OBJECT_TTL => self.object,
            EDGE_TTL => self.edge,
            ORGANIZATION_TTL => self.organization,
            _ => SKIP_CACHE_TTL,
        }
    }
}

impl TtlProvider for CacheTtlProvider {
    fn ttl(&self, id: TtlId) -> Duration {
        let base = self.base(id);
        if base == SKIP_CACHE_TTL || self.jitter_window.is_zero() {
            return base;
        }
        let window_ms = u64::try_from(self.jitter_window.as_millis()).unwrap_or(u64::MAX);
        base + Duration::from_millis(rand::thread_rng().gen_range(0..window_ms))
    }
}
