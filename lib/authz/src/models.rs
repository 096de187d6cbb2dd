//! Graph data model.
//!
//! Objects are typed nodes, edges are typed directed links between objects,
//! and edge types carry the attributes that compose along paths. All entities
//! serialize to the remote API's JSON shape.

use crate::error::AuthzError;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use trellis_core::{EdgeId, EdgeTypeId, ObjectId, ObjectTypeId, OrganizationId};

/// Built-in type of user objects.
pub const USER_OBJECT_TYPE_ID: ObjectTypeId =
    ObjectTypeId::from_u128(0x1bf2b775_e521_41d3_8b7e_78e89427e6fe);

/// Built-in type of group objects.
pub const GROUP_OBJECT_TYPE_ID: ObjectTypeId =
    ObjectTypeId::from_u128(0xf5bce640_f866_4464_af1a_9e7474c4a90c);

/// Built-in type of login application objects.
pub const LOGIN_APP_OBJECT_TYPE_ID: ObjectTypeId =
    ObjectTypeId::from_u128(0x9b90794f_0ed0_48d6_99a5_6fd578a9134d);

/// A kind of object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectType {
    /// Unique ID.
    pub id: ObjectTypeId,
    /// Unique name.
    pub type_name: String,
}

impl ObjectType {
    /// Creates an object type.
    #[must_use]
    pub fn new(id: ObjectTypeId, type_name: impl Into<String>) -> Self {
        Self {
            id,
            type_name: type_name.into(),
        }
    }

    /// Compares everything but the ID.
    #[must_use]
    pub fn equals_ignoring_id(&self, other: &Self) -> bool {
        self.type_name == other.type_name
    }

    /// Checks required fields.
    pub fn validate(&self) -> Result<(), Report<AuthzError>> {
        if self.type_name.is_empty() {
            return Err(AuthzError::validation("object type name cannot be empty").into());
        }
        Ok(())
    }
}

/// How an attribute on an edge type applies along paths.
///
/// Given an edge `source -> target` whose type carries attribute `a`:
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeMode {
    /// The source has `a` on the target.
    Direct,
    /// The source has `a` on whatever the target has `a` on.
    Inherit,
    /// Whatever has `a` on the source also has `a` on the target.
    Propagate,
}

impl fmt::Display for AttributeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Inherit => f.write_str("inherit"),
            Self::Propagate => f.write_str("propagate"),
        }
    }
}

/// A named attribute on an edge type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "AttributeWire", into = "AttributeWire")]
pub struct Attribute {
    /// Attribute name, e.g. "read".
    pub name: String,
    /// How the attribute composes.
    pub mode: AttributeMode,
}

impl Attribute {
    /// Creates an attribute.
    #[must_use]
    pub fn new(name: impl Into<String>, mode: AttributeMode) -> Self {
        Self {
            name: name.into(),
            mode,
        }
    }

    /// A direct attribute.
    #[must_use]
    pub fn direct(name: impl Into<String>) -> Self {
        Self::new(name, AttributeMode::Direct)
    }

    /// An inherited attribute.
    #[must_use]
    pub fn inherit(name: impl Into<String>) -> Self {
        Self::new(name, AttributeMode::Inherit)
    }

    /// A propagated attribute.
    #[must_use]
    pub fn propagate(name: impl Into<String>) -> Self {
        Self::new(name, AttributeMode::Propagate)
    }
}

/// Wire shape of an attribute: one flag per mode.
#[derive(Serialize, Deserialize)]
struct AttributeWire {
    name: String,
    #[serde(default)]
    direct: bool,
    #[serde(default)]
    inherit: bool,
    #[serde(default)]
    propagate: bool,
}

impl TryFrom<AttributeWire> for Attribute {
    type Error = String;

    fn try_from(wire: AttributeWire) -> Result<Self, Self::Error> {
        let mode = match (wire.direct, wire.inherit, wire.propagate) {
            (true, false, false) => AttributeMode::Direct,
            (false, true, false) => AttributeMode::Inherit,
            (false, false, true) => AttributeMode::Propagate,
            _ => {
                return Err(format!(
                    "attribute '{}' must have exactly one of direct, inherit or propagate set",
                    wire.name
                ));
            }
        };
        Ok(Self {
            name: wire.name,
            mode,
        })
    }
}

impl From<Attribute> for AttributeWire {
    fn from(attribute: Attribute) -> Self {
        Self {
            direct: attribute.mode == AttributeMode::Direct,
            inherit: attribute.mode == AttributeMode::Inherit,
            propagate: attribute.mode == AttributeMode::Propagate,
            name: attribute.name,
        }
    }
}

/// A kind of edge, constraining the types it connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeType {
    /// Unique ID.
    pub id: EdgeTypeId,
    /// Name, unique per (source type, target type).
    pub type_name: String,
    /// Type every edge of this type starts at.
    pub source_object_type_id: ObjectTypeId,
    /// Type every edge of this type ends at.
    pub target_object_type_id: ObjectTypeId,
    /// Attributes granted along edges of this type.
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    /// Owning organization, nil if unscoped.
    #[serde(default)]
    pub organization_id: OrganizationId,
}

impl EdgeType {
    /// Compares everything but the ID. Attribute order does not matter.
    #[must_use]
    pub fn equals_ignoring_id(&self, other: &Self) -> bool {
        self.type_name == other.type_name
            && self.source_object_type_id == other.source_object_type_id
            && self.target_object_type_id == other.target_object_type_id
            && self.organization_id == other.organization_id
            && same_attributes(&self.attributes, &other.attributes)
    }

    /// Checks required fields.
    pub fn validate(&self) -> Result<(), Report<AuthzError>> {
        if self.type_name.is_empty() {
            return Err(AuthzError::validation("edge type name cannot be empty").into());
        }
        if self.source_object_type_id.is_nil() || self.target_object_type_id.is_nil() {
            return Err(AuthzError::validation(
                "edge type source and target object types are required",
            )
            .into());
        }
        validate_attributes(&self.attributes)
    }
}

pub(crate) fn same_attributes(a: &[Attribute], b: &[Attribute]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let modes: HashMap<&str, AttributeMode> =
        b.iter().map(|attr| (attr.name.as_str(), attr.mode)).collect();
    a.iter()
        .all(|attr| modes.get(attr.name.as_str()) == Some(&attr.mode))
}

pub(crate) fn validate_attributes(attributes: &[Attribute]) -> Result<(), Report<AuthzError>> {
    if attributes.iter().any(|a| a.name.is_empty()) {
        return Err(AuthzError::validation("attribute name cannot be empty").into());
    }
    Ok(())
}

/// A node in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    /// Unique ID.
    pub id: ObjectId,
    /// Name unique within (type, organization). `None` for anonymous objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Object type.
    pub type_id: ObjectTypeId,
    /// Owning organization, nil if unscoped.
    #[serde(default)]
    pub organization_id: OrganizationId,
}

impl Object {
    /// Compares everything but the ID.
    #[must_use]
    pub fn equals_ignoring_id(&self, other: &Self) -> bool {
        self.alias == other.alias
            && self.type_id == other.type_id
            && self.organization_id == other.organization_id
    }

    /// Checks required fields.
    pub fn validate(&self) -> Result<(), Report<AuthzError>> {
        if self.type_id.is_nil() {
            return Err(AuthzError::validation("object type is required").into());
        }
        if self.alias.as_deref() == Some("") {
            return Err(AuthzError::validation("object alias cannot be empty").into());
        }
        Ok(())
    }
}

/// A directed, typed link between two objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Unique ID.
    pub id: EdgeId,
    /// Edge type.
    pub edge_type_id: EdgeTypeId,
    /// Object the edge starts at.
    pub source_object_id: ObjectId,
    /// Object the edge ends at.
    pub target_object_id: ObjectId,
}

impl Edge {
    /// Creates an edge.
    #[must_use]
    pub fn new(
        id: EdgeId,
        source_object_id: ObjectId,
        target_object_id: ObjectId,
        edge_type_id: EdgeTypeId,
    ) -> Self {
        Self {
            id,
            edge_type_id,
            source_object_id,
            target_object_id,
        }
    }

    /// Compares everything but the ID.
    #[must_use]
    pub fn equals_ignoring_id(&self, other: &Self) -> bool {
        self.edge_type_id == other.edge_type_id
            && self.source_object_id == other.source_object_id
            && self.target_object_id == other.target_object_id
    }

    /// Checks required fields.
    pub fn validate(&self) -> Result<(), Report<AuthzError>> {
        if self.edge_type_id.is_nil() || self.source_object_id.is_nil() || self.target_object_id.is_nil()
        {
            return Err(AuthzError::validation(
                "edge type, source object and target object are required",
            )
            .into());
        }
        Ok(())
    }
}

/// Data residency region of an organization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Region(pub String);

impl Region {
    /// Creates a region from its name, e.g. "aws-us-west-2".
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A namespace within a tenant. Aliases are unique per organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    /// Unique ID.
    pub id: OrganizationId,
    /// Unique name.
    pub name: String,
    /// Data region.
    #[serde(default)]
    pub region: Region,
}

impl Organization {
    /// Compares everything but the ID.
    #[must_use]
    pub fn equals_ignoring_id(&self, other: &Self) -> bool {
        self.name == other.name && self.region == other.region
    }

    /// Checks required fields.
    pub fn validate(&self) -> Result<(), Report<AuthzError>> {
        if self.name.is_empty() {
            return Err(AuthzError::validation("organization name cannot be empty").into());
        }
        Ok(())
    }
}

/// One hop of a path found by an attribute check.
///
/// The first node of a path has a nil edge; every later node records the edge
/// that was followed to reach its object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributePathNode {
    /// Object reached.
    pub object_id: ObjectId,
    /// Edge followed to reach it.
    #[serde(default)]
    pub edge_id: EdgeId,
}

/// Result of an attribute check.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckAttributeResponse {
    /// Whether the source has the attribute on the target.
    pub has_attribute: bool,
    /// Path proving it, source first.
    #[serde(default)]
    pub path: Vec<AttributePathNode>,
}
