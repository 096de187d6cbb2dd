//! Cache keys, key naming and TTL lookup.
//!
//! Callers never build keys by concatenating strings. They ask a
//! [`KeyNameProvider`] for the key of a role ([`KeyNameId`]) and a list of
//! components, and ask a [`TtlProvider`] for the TTL of a class ([`TtlId`]).

use std::fmt;
use std::time::Duration;

/// TTL value meaning "do not cache this class at all".
pub const SKIP_CACHE_TTL: Duration = Duration::ZERO;

/// A fully-qualified cache key.
///
/// The empty key stands for "this role is unused by the entity" and is
/// ignored by every cache operation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Key(String);

impl Key {
    /// Creates a key from its full string form.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The empty key.
    #[must_use]
    pub const fn none() -> Self {
        Self(String::new())
    }

    /// Returns true for the empty key.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derives a key by appending `_{suffix}`.
    #[must_use]
    pub fn with_suffix(&self, suffix: &str) -> Self {
        if self.is_none() {
            return Self::none();
        }
        Self(format!("{}_{}", self.0, suffix))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Opaque identifier of a key role (primary key, alias key, collection key...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyNameId(pub &'static str);

impl fmt::Display for KeyNameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Opaque identifier of a TTL class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TtlId(pub &'static str);

impl fmt::Display for TtlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Maps key roles and their components to keys.
pub trait KeyNameProvider: Send + Sync {
    /// Returns the key for `id` built from `components`.
    ///
    /// Unknown roles, or a wrong number of components, yield [`Key::none`].
    fn key_name(&self, id: KeyNameId, components: &[&str]) -> Key;

    /// Prefix shared by every key this provider produces.
    fn prefix(&self) -> &str;

    /// Key for a role that takes no components.
    fn key_name_static(&self, id: KeyNameId) -> Key {
        self.key_name(id, &[])
    }

    /// Key for a role that takes a single component.
    fn key_name_with_string(&self, id: KeyNameId, component: &str) -> Key {
        self.key_name(id, &[component])
    }
}

/// Maps TTL classes to durations.
pub trait TtlProvider: Send + Sync {
    /// Returns the TTL for `id`. [`SKIP_CACHE_TTL`] disables caching.
    fn ttl(&self, id: TtlId) -> Duration;
}
