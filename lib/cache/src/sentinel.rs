//! Sentinels, tombstones and the rules that arbitrate between them.
//!
//! A sentinel is a unique token written into a key to claim it for the
//! duration of an in-flight operation. Only the holder of the sentinel that
//! currently occupies the lock key may commit a value there. A tombstone marks
//! a key whose content changed recently enough that nothing may be cached in it
//! until the tombstone expires.
//!
//! Every stored string is one of: a plain value, a sentinel, a conflict marker
//! or a tombstone. The rules below are pure functions over the current content
//! so that any provider, local or shared, can apply them inside its own atomic
//! read-modify-write.

use std::fmt;
use uuid::Uuid;

const SENTINEL_PREFIX: &str = "SENTINEL_";
const TOMBSTONE_PREFIX: &str = "TOMBSTONE_";
const CONFLICT_TAG: &str = "CONFLICT";

/// The operation a sentinel was taken for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SentinelKind {
    /// Read-through population of an empty key.
    Read,
    /// Creation of a new entity.
    Create,
    /// Mutation of an existing entity.
    Update,
    /// Deletion of an entity.
    Delete,
}

impl SentinelKind {
    const fn tag(self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "READ" => Some(Self::Read),
            "CREATE" => Some(Self::Create),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Create and Update sentinels carry a value to commit.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }
}

impl fmt::Display for SentinelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A unique lock token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sentinel(String);

impl Sentinel {
    /// Generates a fresh sentinel of the given kind.
    #[must_use]
    pub fn generate(kind: SentinelKind) -> Self {
        Self(format!("{}{}_{}", SENTINEL_PREFIX, kind.tag(), Uuid::new_v4()))
    }

    /// Generates a conflict marker. Nobody holds it, so nothing can commit over it.
    #[must_use]
    pub fn conflict() -> Self {
        Self(format!("{}{}_{}", SENTINEL_PREFIX, CONFLICT_TAG, Uuid::new_v4()))
    }

    /// Returns the kind this sentinel was taken for, or `None` for a conflict marker.
    #[must_use]
    pub fn kind(&self) -> Option<SentinelKind> {
        match classify(&self.0) {
            Some(Marker::Sentinel(kind)) => Some(kind),
            _ => None,
        }
    }

    /// Returns the stored string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generates a fresh tombstone string.
#[must_use]
pub fn new_tombstone() -> String {
    format!("{}{}", TOMBSTONE_PREFIX, Uuid::new_v4())
}

/// What a non-plain stored string is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// A live sentinel of the given kind.
    Sentinel(SentinelKind),
    /// Two writers collided on this key.
    Conflict,
    /// The key's content changed recently.
    Tombstone,
}

/// Classifies a stored string. Plain values return `None`.
#[must_use]
pub fn classify(value: &str) -> Option<Marker> {
    if value.starts_with(TOMBSTONE_PREFIX) {
        return Some(Marker::Tombstone);
    }
    let rest = value.strip_prefix(SENTINEL_PREFIX)?;
    let tag = rest.split('_').next().unwrap_or_default();
    if tag == CONFLICT_TAG {
        return Some(Marker::Conflict);
    }
    // Unknown tags are still treated as sentinels so they are never served.
    Some(
        SentinelKind::from_tag(tag)
            .map(Marker::Sentinel)
            .unwrap_or(Marker::Conflict),
    )
}

/// Returns true if `value` is any marker rather than cached data.
#[must_use]
pub fn is_marker(value: &str) -> bool {
    classify(value).is_some()
}

/// Returns true if `value` is a tombstone.
#[must_use]
pub fn is_tombstone(value: &str) -> bool {
    matches!(classify(value), Some(Marker::Tombstone))
}

/// Decides whether a sentinel of `kind` may be written over `current`.
///
/// Delete may always lock. Read only claims empty keys. Create and Update
/// supersede plain values and other non-delete sentinels, but never a delete
/// sentinel, a conflict marker or a tombstone.
#[must_use]
pub fn can_write_sentinel(current: Option<&str>, kind: SentinelKind) -> bool {
    match kind {
        SentinelKind::Delete => true,
        SentinelKind::Read => current.is_none(),
        SentinelKind::Create | SentinelKind::Update => match current.map(classify) {
            None | Some(None) => true,
            Some(Some(Marker::Sentinel(held))) => held != SentinelKind::Delete,
            Some(Some(Marker::Conflict | Marker::Tombstone)) => false,
        },
    }
}

/// Outcome of presenting a value and a sentinel for commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitDecision {
    /// The sentinel still owns the lock key: write the value.
    Store,
    /// Leave the key untouched.
    Skip,
    /// Another writer cached a different value: drop it.
    Clear,
    /// Another writer holds the key: mark the collision so neither value lands.
    Conflict,
}

/// Decides what a commit of `value` under `sentinel` does given `current`.
#[must_use]
pub fn commit_decision(current: Option<&str>, value: &str, sentinel: &Sentinel) -> CommitDecision {
    let Some(current) = current else {
        return CommitDecision::Skip;
    };
    if current == sentinel.as_str() {
        return CommitDecision::Store;
    }
    let writer = sentinel.kind().is_some_and(SentinelKind::is_write);
    match classify(current) {
        None if writer && current != value => CommitDecision::Clear,
        Some(Marker::Sentinel(held)) if writer && held.is_write() => CommitDecision::Conflict,
        _ => CommitDecision::Skip,
    }
}
