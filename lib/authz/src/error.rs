//! Authorization client error types.

use std::fmt;

/// Errors returned by [`crate::AuthzClient`] operations.
///
/// Cache failures never appear here, except when an explicit flush fails: the
/// client logs them and serves the request from the remote API instead.
#[derive(Debug)]
pub enum AuthzError {
    /// The object type does not exist.
    ObjectTypeNotFound {
        /// ID or name that was looked up.
        target: String,
    },
    /// The edge type does not exist.
    EdgeTypeNotFound {
        /// ID or name that was looked up.
        target: String,
    },
    /// The object does not exist.
    ObjectNotFound {
        /// ID or alias that was looked up.
        target: String,
    },
    /// The edge does not exist.
    EdgeNotFound {
        /// ID or endpoints that were looked up.
        target: String,
    },
    /// The organization does not exist.
    OrganizationNotFound {
        /// ID or name that was looked up.
        target: String,
    },
    /// The request collides with existing state; the caller may retry.
    Conflict {
        /// Error details.
        details: String,
    },
    /// The request is malformed. Raised before any network or cache call.
    Validation {
        /// Error details.
        details: String,
    },
    /// The remote API rejected the request.
    RequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error details.
        details: String,
    },
    /// The remote API could not be reached.
    ConnectionFailed {
        /// Error details.
        details: String,
    },
    /// The remote API returned a body that could not be decoded.
    InvalidResponse {
        /// Error details.
        details: String,
    },
    /// The client configuration is invalid.
    Configuration {
        /// Error details.
        details: String,
    },
    /// The cache could not be flushed. Stale entries may be served until they expire.
    CacheFlushFailed {
        /// Error details.
        details: String,
    },
}

impl AuthzError {
    /// Returns true for any of the per-kind not-found variants.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ObjectTypeNotFound { .. }
                | Self::EdgeTypeNotFound { .. }
                | Self::ObjectNotFound { .. }
                | Self::EdgeNotFound { .. }
                | Self::OrganizationNotFound { .. }
        )
    }

    pub(crate) fn validation(details: impl Into<String>) -> Self {
        Self::Validation {
            details: details.into(),
        }
    }
}

impl fmt::Display for AuthzError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ObjectTypeNotFound { target } => write!(f, "object type '{}' not found", target),
            Self::EdgeTypeNotFound { target } => write!(f, "edge type '{}' not found", target),
            Self::ObjectNotFound { target } => write!(f, "object '{}' not found", target),
            Self::EdgeNotFound { target } => write!(f, "edge '{}' not found", target),
            Self::OrganizationNotFound { target } => {
                write!(f, "organization '{}' not found", target)
            }
            Self::Conflict { details } => write!(f, "conflict: {}", details),
            Self::Validation { details } => write!(f, "invalid request: {}", details),
            Self::RequestFailed { status, details } => {
                write!(f, "authorization request failed ({}): {}", status, details)
            }
            Self::ConnectionFailed { details } => {
                write!(f, "failed to connect to authorization service: {}", details)
            }
            Self::InvalidResponse { details } => {
                write!(f, "invalid response from authorization service: {}", details)
            }
            Self::Configuration { details } => {
                write!(f, "invalid authorization client configuration: {}", details)
            }
            Self::CacheFlushFailed { details } => write!(f, "failed to flush cache: {}", details),
        }
    }
}

impl std::error::Error for AuthzError {}
