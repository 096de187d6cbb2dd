//! Cache error types.

use std::fmt;

/// Errors raised by cache providers and the consistency engine.
#[derive(Debug)]
pub enum CacheError {
    /// The backing store could not be used.
    ProviderUnavailable {
        /// Error details.
        details: String,
    },
    /// A cached value could not be encoded or decoded.
    Serialization {
        /// The key involved.
        key: String,
        /// Error details.
        details: String,
    },
    /// A key had an unexpected shape for the requested operation.
    InvalidKey {
        /// The key involved.
        key: String,
        /// Error details.
        details: String,
    },
    /// A lock of this kind cannot be taken on this kind of key.
    UnsupportedLock {
        /// The requested lock kind.
        kind: String,
        /// The key involved.
        key: String,
    },
    /// A dependency list could not be extended because it is tombstoned.
    DependencyTombstoned {
        /// The tombstoned dependency key.
        key: String,
    },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderUnavailable { details } => {
                write!(f, "cache provider unavailable: {}", details)
            }
            Self::Serialization { key, details } => {
                write!(f, "failed to (de)serialize cache value at '{}': {}", key, details)
            }
            Self::InvalidKey { key, details } => {
                write!(f, "invalid cache key '{}': {}", key, details)
            }
            Self::UnsupportedLock { kind, key } => {
                write!(f, "cannot take a {} lock on '{}'", kind, key)
            }
            Self::DependencyTombstoned { key } => {
                write!(f, "dependency key '{}' is tombstoned", key)
            }
        }
    }
}

impl std::error::Error for CacheError {}
