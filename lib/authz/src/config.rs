//! Client configuration.
//!
//! Loaded via the `config` crate from `TRELLIS_AUTHZ__*` environment
//! variables, with `__` separating nested sections
//! (e.g. `TRELLIS_AUTHZ__CACHE__EDGE_TTL_SECS=10`).

use crate::error::AuthzError;
use rootcause::Report;
use serde::Deserialize;
use std::time::Duration;
use trellis_cache::memory::DEFAULT_SWEEP_EVERY;
use trellis_core::{OrganizationId, TenantId};

/// Authorization client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthzConfig {
    /// Base URL of the authorization API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Tenant the client acts for. Used as the cache namespace when set.
    #[serde(default)]
    pub tenant_id: Option<TenantId>,

    /// Bearer token sent with every request.
    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Per-request timeout, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Skip the cache for every call.
    #[serde(default)]
    pub bypass_cache: bool,

    /// Organization applied to calls that don't name one.
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,

    /// Cache TTLs.
    #[serde(default)]
    pub cache: CacheSettings,
}

/// Cache TTLs, per entity kind. Zero disables caching of that kind.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Object type TTL, in seconds.
    #[serde(default = "default_type_ttl_secs")]
    pub object_type_ttl_secs: u64,

    /// Edge type TTL, in seconds.
    #[serde(default = "default_type_ttl_secs")]
    pub edge_type_ttl_secs: u64,

    /// Object TTL, in seconds.
    #[serde(default = "default_object_ttl_secs")]
    pub object_ttl_secs: u64,

    /// Edge TTL, in seconds. Edges churn more than anything else.
    #[serde(default = "default_edge_ttl_secs")]
    pub edge_ttl_secs: u64,

    /// Organization TTL, in seconds.
    #[serde(default = "default_type_ttl_secs")]
    pub organization_ttl_secs: u64,

    /// Upper bound of the random delay added to every TTL, in milliseconds.
    #[serde(default = "default_jitter_window_ms")]
    pub jitter_window_ms: u64,

    /// How long an abandoned lock survives, in seconds.
    #[serde(default = "default_sentinel_ttl_secs")]
    pub sentinel_ttl_secs: u64,

    /// How long a modification marker survives, in seconds.
    #[serde(default = "default_tombstone_ttl_secs")]
    pub tombstone_ttl_secs: u64,

    /// Provider operations between sweeps of expired entries. Zero disables
    /// sweeping.
    #[serde(default = "default_sweep_every")]
    pub sweep_every: u64,
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_type_ttl_secs() -> u64 {
    600
}

fn default_object_ttl_secs() -> u64 {
    300
}

fn default_edge_ttl_secs() -> u64 {
    30
}

fn default_jitter_window_ms() -> u64 {
    5000
}

fn default_sentinel_ttl_secs() -> u64 {
    70
}

fn default_tombstone_ttl_secs() -> u64 {
    5
}

fn default_sweep_every() -> u64 {
    DEFAULT_SWEEP_EVERY
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            object_type_ttl_secs: default_type_ttl_secs(),
            edge_type_ttl_secs: default_type_ttl_secs(),
            object_ttl_secs: default_object_ttl_secs(),
            edge_ttl_secs: default_edge_ttl_secs(),
            organization_ttl_secs: default_type_ttl_secs(),
            jitter_window_ms: default_jitter_window_ms(),
            sentinel_ttl_secs: default_sentinel_ttl_secs(),
            tombstone_ttl_secs: default_tombstone_ttl_secs(),
            sweep_every: default_sweep_every(),
        }
    }
}

impl CacheSettings {
    /// Lifetime of locks in the in-memory provider.
    #[must_use]
    pub fn sentinel_ttl(&self) -> Duration {
        Duration::from_secs(self.sentinel_ttl_secs)
    }

    /// Lifetime of modification markers in the in-memory provider.
    #[must_use]
    pub fn tombstone_ttl(&self) -> Duration {
        Duration::from_secs(self.tombstone_ttl_secs)
    }
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            tenant_id: None,
            bearer_token: None,
            request_timeout_secs: default_request_timeout_secs(),
            bypass_cache: false,
            organization_id: None,
            cache: CacheSettings::default(),
        }
    }
}

impl AuthzConfig {
    /// Environment variable prefix.
    pub const ENV_PREFIX: &'static str = "TRELLIS_AUTHZ";

    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but invalid.
    pub fn from_env() -> Result<Self, Report<AuthzError>> {
        Self::from_source(config::Environment::with_prefix(Self::ENV_PREFIX))
    }

    fn from_source(source: config::Environment) -> Result<Self, Report<AuthzError>> {
        let config: Self = config::Config::builder()
            .add_source(source.prefix_separator("__").separator("__").try_parsing(true))
            .build()
            .map_err(|e| AuthzError::Configuration {
                details: e.to_string(),
            })?
            .try_deserialize()
            .map_err(|e| AuthzError::Configuration {
                details: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that deserialize but cannot work.
    pub fn validate(&self) -> Result<(), Report<AuthzError>> {
        if self.base_url.is_empty() {
            return Err(AuthzError::Configuration {
                details: "base_url cannot be empty".to_string(),
            }
            .into());
        }
        if self.request_timeout_secs == 0 {
            return Err(AuthzError::Configuration {
                details: "request_timeout_secs must be positive".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
