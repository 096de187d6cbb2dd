//! Cache key naming for the authorization graph.
//!
//! Every key is `{base}_{TAG}_{components...}` where `base` is `authz_{tenant}`
//! (or `authz_{url}` for clients not bound to a tenant), so several tenants can
//! share one store.

use trellis_cache::{Key, KeyNameId, KeyNameProvider};
use trellis_core::TenantId;
use tracing::warn;

/// Prefix of every key in the authorization cache.
pub const CACHE_PREFIX: &str = "authz";

const OBJ_TYPE: &str = "OBJTYPE";
const OBJ_TYPE_COL: &str = "OBJTYPE_COL";
const OBJ_TYPE_NAME: &str = "OBJTYPE_NAME";
const EDGE_TYPE: &str = "EDGETYPE";
const EDGE_TYPE_COL: &str = "EDGETYPE_COL";
const EDGE_TYPE_NAME: &str = "EDGETYPE_NAME";
const OBJ: &str = "OBJ";
const OBJ_COL: &str = "OBJ_COL";
const OBJ_EDGES: &str = "OBJEDGES";
const PAIR: &str = "E";
const PATH: &str = "P";
const EDGE: &str = "EDGE";
const EDGE_COL: &str = "EDGE_COL";
const PAGES: &str = "PAGES";
const ORG: &str = "ORG";
const ORG_COL: &str = "ORG_COL";
const ORG_NAME: &str = "ORG_NAME";
const DEP: &str = "DEP";
const MOD: &str = "MOD";

/// Object type by ID.
pub const OBJECT_TYPE_KEY: KeyNameId = KeyNameId("ObjTypeKeyID");
/// Edge type by ID.
pub const EDGE_TYPE_KEY: KeyNameId = KeyNameId("EdgeTypeKeyID");
/// Object by ID.
pub const OBJECT_KEY: KeyNameId = KeyNameId("ObjectKeyID");
/// Edge by ID.
pub const EDGE_KEY: KeyNameId = KeyNameId("EdgeKeyID");
/// Organization by ID.
pub const ORGANIZATION_KEY: KeyNameId = KeyNameId("OrgKeyID");
/// Edge by (source, target, edge type).
pub const EDGE_FULL_KEY: KeyNameId = KeyNameId("EdgeFullKeyID");
/// Object type by name.
pub const OBJECT_TYPE_NAME_KEY: KeyNameId = KeyNameId("ObjTypeNameKeyID");
/// Edge type by name.
pub const EDGE_TYPE_NAME_KEY: KeyNameId = KeyNameId("EdgeTypeNameKeyID");
/// Object by (type, alias, organization).
pub const OBJECT_ALIAS_KEY: KeyNameId = KeyNameId("ObjAliasKeyID");
/// Organization by name.
pub const ORGANIZATION_NAME_KEY: KeyNameId = KeyNameId("OrgNameKeyID");
/// Every edge into or out of an object.
pub const OBJECT_EDGES_KEY: KeyNameId = KeyNameId("ObjEdgesKeyID");
/// Edges from one object to another.
pub const EDGES_OBJ_TO_OBJ: KeyNameId = KeyNameId("EdgesObjToObjID");
/// Path granting an attribute from one object to another.
pub const ATTRIBUTE_PATH_KEY: KeyNameId = KeyNameId("AttributePathObjToObjID");
/// Dependency list of an entity.
pub const DEPENDENCY_KEY: KeyNameId = KeyNameId("DependencyKeyID");
/// Recently-modified marker of an entity.
pub const IS_MODIFIED_KEY: KeyNameId = KeyNameId("IsModifiedKeyID");
/// Recently-modified marker of a collection; takes the collection key.
pub const IS_MODIFIED_COLLECTION_KEY: KeyNameId = KeyNameId("IsModifiedCollectionKeyID");
/// Every object type.
pub const OBJECT_TYPE_COLLECTION_KEY: KeyNameId = KeyNameId("ObjTypeCollectionKeyID");
/// Every edge type.
pub const EDGE_TYPE_COLLECTION_KEY: KeyNameId = KeyNameId("EdgeTypeCollectionKeyID");
/// Every object.
pub const OBJECT_COLLECTION_KEY: KeyNameId = KeyNameId("ObjCollectionKeyID");
/// Every edge.
pub const EDGE_COLLECTION_KEY: KeyNameId = KeyNameId("EdgeCollectionKeyID");
/// Pages of the edge collection that are cached.
pub const EDGE_COLLECTION_PAGES_KEY: KeyNameId = KeyNameId("EdgeCollectionPagesKeyID");
/// Every organization.
pub const ORGANIZATION_COLLECTION_KEY: KeyNameId = KeyNameId("OrgCollectionKeyID");

/// Key naming scheme of the authorization client.
#[derive(Debug, Clone)]
pub struct CacheNameProvider {
    base: String,
}

impl CacheNameProvider {
    /// Creates a provider whose keys all start with `base`.
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    /// Keys scoped to a tenant.
    #[must_use]
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self::new(format!("{}_{}", CACHE_PREFIX, tenant_id))
    }

    /// Keys scoped to an API base URL.
    #[must_use]
    pub fn for_url(url: &str) -> Self {
        Self::new(format!("{}_{}", CACHE_PREFIX, url))
    }

    fn join(&self, tag: &str, components: &[&str]) -> Key {
        let mut key = format!("{}_{}", self.base, tag);
        for component in components {
            key.push('_');
            key.push_str(component);
        }
        Key::new(key)
    }

    fn layout(&self, id: KeyNameId, c: &[&str]) -> Option<Key> {
        let key = match id {
            OBJECT_TYPE_KEY if c.len() == 1 => self.join(OBJ_TYPE, c),
            OBJECT_TYPE_NAME_KEY if c.len() == 1 => self.join(OBJ_TYPE_NAME, c),
            EDGE_TYPE_KEY if c.len() == 1 => self.join(EDGE_TYPE, c),
            EDGE_TYPE_NAME_KEY if c.len() == 1 => self.join(EDGE_TYPE_NAME, c),
            OBJECT_KEY if c.len() == 1 => self.join(OBJ, c),
            EDGE_KEY if c.len() == 1 => self.join(EDGE, c),
            ORGANIZATION_KEY if c.len() == 1 => self.join(ORG, c),
            ORGANIZATION_NAME_KEY if c.len() == 1 => self.join(ORG_NAME, c),
            OBJECT_EDGES_KEY if c.len() == 1 => self.join(OBJ_EDGES, c),
            DEPENDENCY_KEY if c.len() == 1 => self.join(DEP, c),
            IS_MODIFIED_KEY if c.len() == 1 => self.join(MOD, c),
            IS_MODIFIED_COLLECTION_KEY if c.len() == 1 => Key::new(format!("{}_{}", c[0], MOD)),
            OBJECT_ALIAS_KEY if c.len() == 3 => self.join(OBJ, c),
            EDGE_FULL_KEY if c.len() == 3 => self.join(EDGE, c),
            EDGES_OBJ_TO_OBJ if c.len() == 2 => self.join(OBJ, &[c[0], PAIR, c[1]]),
            ATTRIBUTE_PATH_KEY if c.len() == 3 => self.join(OBJ, &[c[0], PATH, c[1], c[2]]),
            OBJECT_TYPE_COLLECTION_KEY if c.is_empty() => self.join(OBJ_TYPE_COL, c),
            EDGE_TYPE_COLLECTION_KEY if c.is_empty() => self.join(EDGE_TYPE_COL, c),
            OBJECT_COLLECTION_KEY if c.is_empty() => self.join(OBJ_COL, c),
            EDGE_COLLECTION_KEY if c.is_empty() => self.join(EDGE_COL, c),
            EDGE_COLLECTION_PAGES_KEY if c.is_empty() => self.join(EDGE_COL, &[PAGES]),
            ORGANIZATION_COLLECTION_KEY if c.is_empty() => self.join(ORG_COL, c),
            _ => return None,
        };
        Some(key)
    }

    /// Prefixes of object type and edge type keys, collections included.
    #[must_use]
    pub fn type_prefixes(&self) -> [String; 2] {
        [
            format!("{}_{}", self.base, OBJ_TYPE),
            format!("{}_{}", self.base, EDGE_TYPE),
        ]
    }
}

impl KeyNameProvider for CacheNameProvider {
    fn key_name(&self, id: KeyNameId, components: &[&str]) -> Key {
        match self.layout(id, components) {
            Some(key) => key,
            None => {
                warn!(key_id = %id, components = components.len(), "unknown key role or wrong component count");
                Key::none()
            }
        }
    }

    fn prefix(&self) -> &str {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> CacheNameProvider {
        CacheNameProvider::new("authz_t")
    }

    #[test]
    fn primary_and_collection_keys() {
        let n = names();
        assert_eq!(n.key_name_with_string(OBJECT_KEY, "o1").as_str(), "authz_t_OBJ_o1");
        assert_eq!(n.key_name_with_string(EDGE_TYPE_KEY, "e1").as_str(), "authz_t_EDGETYPE_e1");
        assert_eq!(n.key_name_static(EDGE_COLLECTION_KEY).as_str(), "authz_t_EDGE_COL");
        assert_eq!(
            n.key_name_static(EDGE_COLLECTION_PAGES_KEY).as_str(),
            "authz_t_EDGE_COL_PAGES"
        );
        assert_eq!(n.key_name_with_string(DEPENDENCY_KEY, "o1").as_str(), "authz_t_DEP_o1");
    }

    #[test]
    fn composite_keys() {
        let n = names();
        assert_eq!(
            n.key_name(OBJECT_ALIAS_KEY, &["ty", "alice", "org"]).as_str(),
            "authz_t_OBJ_ty_alice_org"
        );
        assert_eq!(n.key_name(EDGES_OBJ_TO_OBJ, &["a", "b"]).as_str(), "authz_t_OBJ_a_E_b");
        assert_eq!(
            n.key_name(ATTRIBUTE_PATH_KEY, &["a", "b", "read"]).as_str(),
            "authz_t_OBJ_a_P_b_read"
        );
        assert_eq!(n.key_name(EDGE_FULL_KEY, &["a", "b", "t"]).as_str(), "authz_t_EDGE_a_b_t");
        let col = n.key_name_static(EDGE_COLLECTION_KEY);
        assert_eq!(
            n.key_name_with_string(IS_MODIFIED_COLLECTION_KEY, col.as_str()).as_str(),
            "authz_t_EDGE_COL_MOD"
        );
    }

    #[test]
    fn name_keys_never_alias_id_keys() {
        let n = names();
        let id = "3f2a9c1e-0000-4000-8000-000000000001";
        for (by_id, by_name) in [
            (OBJECT_TYPE_KEY, OBJECT_TYPE_NAME_KEY),
            (EDGE_TYPE_KEY, EDGE_TYPE_NAME_KEY),
            (ORGANIZATION_KEY, ORGANIZATION_NAME_KEY),
        ] {
            assert_ne!(n.key_name_with_string(by_id, id), n.key_name_with_string(by_name, id));
        }
        assert_eq!(
            n.key_name_with_string(ORGANIZATION_NAME_KEY, "acme").as_str(),
            "authz_t_ORG_NAME_acme"
        );
    }

    #[test]
    fn wrong_component_count_yields_empty_key() {
        let n = names();
        assert!(n.key_name(OBJECT_ALIAS_KEY, &["ty", "alice"]).is_none());
        assert!(n.key_name_static(OBJECT_KEY).is_none());
        assert!(n.key_name_with_string(EDGE_COLLECTION_KEY, "x").is_none());
        assert!(n.key_name_with_string(KeyNameId("Unknown"), "x").is_none());
    }

    #[test]
    fn tenants_do_not_collide() {
        let a = CacheNameProvider::for_tenant(TenantId::new());
        let b = CacheNameProvider::for_tenant(TenantId::new());
        assert_ne!(
            a.key_name_with_string(OBJECT_KEY, "1"),
            b.key_name_with_string(OBJECT_KEY, "1")
        );
        assert!(a.prefix().starts_with("authz_"));
        assert_eq!(CacheNameProvider::for_url("http://x").prefix(), "authz_http://x");
    }

    #[test]
    fn flush_prefixes_do_not_overlap_types() {
        let n = names();
        let [object_types, edge_types] = n.type_prefixes();
        assert!(!n.key_name_with_string(OBJECT_KEY, "o1").as_str().starts_with(&object_types));
        assert!(!n.key_name_static(EDGE_COLLECTION_KEY).as_str().starts_with(&edge_types));
        assert!(n.key_name_static(OBJECT_TYPE_COLLECTION_KEY).as_str().starts_with(&object_types));
        assert!(n.key_name_with_string(EDGE_TYPE_NAME_KEY, "owns").as_str().starts_with(&edge_types));
    }
}
