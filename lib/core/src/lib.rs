//! Core types shared by the trellis crates.
//!
//! This crate provides the typed identifiers for every graph entity and the
//! rootcause-based `Result` alias used throughout the workspace.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{EdgeId, EdgeTypeId, ObjectId, ObjectTypeId, OrganizationId, ParseIdError, TenantId};
