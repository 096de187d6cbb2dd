//! Cache keys and TTL class of every graph entity.

use crate::keys::{
    DEPENDENCY_KEY, EDGE_COLLECTION_KEY, EDGE_COLLECTION_PAGES_KEY, EDGE_FULL_KEY, EDGE_KEY,
    EDGE_TYPE_COLLECTION_KEY, EDGE_TYPE_KEY, EDGE_TYPE_NAME_KEY, IS_MODIFIED_COLLECTION_KEY,
    IS_MODIFIED_KEY, OBJECT_ALIAS_KEY, OBJECT_COLLECTION_KEY, OBJECT_EDGES_KEY, OBJECT_KEY,
    OBJECT_TYPE_COLLECTION_KEY, OBJECT_TYPE_KEY, OBJECT_TYPE_NAME_KEY,
    ORGANIZATION_COLLECTION_KEY, ORGANIZATION_KEY, ORGANIZATION_NAME_KEY,
};
use crate::models::{AttributePathNode, Edge, EdgeType, Object, ObjectType, Organization};
use crate::ttl::{EDGE_TTL, EDGE_TYPE_TTL, OBJECT_TTL, OBJECT_TYPE_TTL, ORGANIZATION_TTL};
use std::fmt::Display;
use std::time::Duration;
use tracing::debug;
use trellis_cache::{CacheItem, Key, KeyNameId, KeyNameProvider, TtlProvider};

fn with_id(names: &dyn KeyNameProvider, id: KeyNameId, value: impl Display) -> Key {
    names.key_name_with_string(id, &value.to_string())
}

// Object and edge types have no dependency list: deleting one flushes the
// whole cache.
impl CacheItem for ObjectType {
    fn primary_key(&self, names: &dyn KeyNameProvider) -> Key {
        with_id(names, OBJECT_TYPE_KEY, self.id)
    }

    fn secondary_keys(&self, names: &dyn KeyNameProvider) -> Vec<Key> {
        if self.type_name.is_empty() {
            debug!(id = %self.id, "object type has no name, dropping secondary key");
            return Vec::new();
        }
        vec![names.key_name_with_string(OBJECT_TYPE_NAME_KEY, &self.type_name)]
    }

    fn global_collection_key(&self, names: &dyn KeyNameProvider) -> Key {
        names.key_name_static(OBJECT_TYPE_COLLECTION_KEY)
    }

    fn is_modified_key(&self, names: &dyn KeyNameProvider) -> Key {
        with_id(names, IS_MODIFIED_KEY, self.id)
    }

    fn ttl(ttls: &dyn TtlProvider) -> Duration {
        ttls.ttl(OBJECT_TYPE_TTL)
    }

    fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

impl CacheItem for EdgeType {
    fn primary_key(&self, names: &dyn KeyNameProvider) -> Key {
        with_id(names, EDGE_TYPE_KEY, self.id)
    }

    fn secondary_keys(&self, names: &dyn KeyNameProvider) -> Vec<Key> {
        if self.type_name.is_empty() {
            debug!(id = %self.id, "edge type has no name, dropping secondary key");
            return Vec::new();
        }
        vec![names.key_name_with_string(EDGE_TYPE_NAME_KEY, &self.type_name)]
    }

    fn global_collection_key(&self, names: &dyn KeyNameProvider) -> Key {
        names.key_name_static(EDGE_TYPE_COLLECTION_KEY)
    }

    fn is_modified_key(&self, names: &dyn KeyNameProvider) -> Key {
        with_id(names, IS_MODIFIED_KEY, self.id)
    }

    fn ttl(ttls: &dyn TtlProvider) -> Duration {
        ttls.ttl(EDGE_TYPE_TTL)
    }

    fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

impl CacheItem for Object {
    fn primary_key(&self, names: &dyn KeyNameProvider) -> Key {
        with_id(names, OBJECT_KEY, self.id)
    }

    fn secondary_keys(&self, names: &dyn KeyNameProvider) -> Vec<Key> {
        match &self.alias {
            Some(alias) => vec![names.key_name(
                OBJECT_ALIAS_KEY,
                &[
                    &self.type_id.to_string(),
                    alias,
                    &self.organization_id.to_string(),
                ],
            )],
            None => Vec::new(),
        }
    }

    fn global_collection_key(&self, names: &dyn KeyNameProvider) -> Key {
        names.key_name_static(OBJECT_COLLECTION_KEY)
    }

    fn per_item_collection_key(&self, names: &dyn KeyNameProvider) -> Key {
        with_id(names, OBJECT_EDGES_KEY, self.id)
    }

    fn dependencies_key(&self, names: &dyn KeyNameProvider) -> Key {
        with_id(names, DEPENDENCY_KEY, self.id)
    }

    fn is_modified_key(&self, names: &dyn KeyNameProvider) -> Key {
        with_id(names, IS_MODIFIED_KEY, self.id)
    }

    fn ttl(ttls: &dyn TtlProvider) -> Duration {
        ttls.ttl(OBJECT_TTL)
    }

    fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

impl CacheItem for Edge {
    fn primary_key(&self, names: &dyn KeyNameProvider) -> Key {
        with_id(names, EDGE_KEY, self.id)
    }

    fn secondary_keys(&self, names: &dyn KeyNameProvider) -> Vec<Key> {
        if self.source_object_id.is_nil()
            || self.target_object_id.is_nil()
            || self.edge_type_id.is_nil()
        {
            debug!(id = %self.id, "edge is missing an endpoint or type, dropping secondary key");
            return Vec::new();
        }
        vec![names.key_name(
            EDGE_FULL_KEY,
            &[
                &self.source_object_id.to_string(),
                &self.target_object_id.to_string(),
                &self.edge_type_id.to_string(),
            ],
        )]
    }

    fn global_collection_key(&self, names: &dyn KeyNameProvider) -> Key {
        names.key_name_static(EDGE_COLLECTION_KEY)
    }

    fn global_collection_pages_key(&self, names: &dyn KeyNameProvider) -> Key {
        names.key_name_static(EDGE_COLLECTION_PAGES_KEY)
    }

    fn dependencies_key(&self, names: &dyn KeyNameProvider) -> Key {
        with_id(names, DEPENDENCY_KEY, self.id)
    }

    fn dependency_keys(&self, names: &dyn KeyNameProvider) -> Vec<Key> {
        vec![
            with_id(names, DEPENDENCY_KEY, self.source_object_id),
            with_id(names, DEPENDENCY_KEY, self.target_object_id),
        ]
    }

    fn is_modified_key(&self, names: &dyn KeyNameProvider) -> Key {
        with_id(names, IS_MODIFIED_KEY, self.id)
    }

    fn is_modified_collection_key(&self, names: &dyn KeyNameProvider) -> Key {
        let collection = self.global_collection_key(names);
        names.key_name_with_string(IS_MODIFIED_COLLECTION_KEY, collection.as_str())
    }

    fn ttl(ttls: &dyn TtlProvider) -> Duration {
        ttls.ttl(EDGE_TTL)
    }

    fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

// Path nodes only live inside cached attribute-check results.
impl CacheItem for AttributePathNode {
    fn primary_key(&self, _names: &dyn KeyNameProvider) -> Key {
        Key::none()
    }

    fn secondary_keys(&self, _names: &dyn KeyNameProvider) -> Vec<Key> {
        Vec::new()
    }

    fn global_collection_key(&self, _names: &dyn KeyNameProvider) -> Key {
        Key::none()
    }

    fn dependency_keys(&self, names: &dyn KeyNameProvider) -> Vec<Key> {
        let object = with_id(names, DEPENDENCY_KEY, self.object_id);
        if self.edge_id.is_nil() {
            return vec![object];
        }
        vec![with_id(names, DEPENDENCY_KEY, self.edge_id), object]
    }

    fn is_modified_key(&self, _names: &dyn KeyNameProvider) -> Key {
        Key::none()
    }

    fn ttl(ttls: &dyn TtlProvider) -> Duration {
        ttls.ttl(EDGE_TTL)
    }
}

impl CacheItem for Organization {
    fn primary_key(&self, names: &dyn KeyNameProvider) -> Key {
        with_id(names, ORGANIZATION_KEY, self.id)
    }

    fn secondary_keys(&self, names: &dyn KeyNameProvider) -> Vec<Key> {
        if self.name.is_empty() {
            debug!(id = %self.id, "organization has no name, dropping secondary key");
            return Vec::new();
        }
        vec![names.key_name_with_string(ORGANIZATION_NAME_KEY, &self.name)]
    }

    fn global_collection_key(&self, names: &dyn KeyNameProvider) -> Key {
        names.key_name_static(ORGANIZATION_COLLECTION_KEY)
    }

    fn dependencies_key(&self, names: &dyn KeyNameProvider) -> Key {
        with_id(names, DEPENDENCY_KEY, self.id)
    }

    fn is_modified_key(&self, names: &dyn KeyNameProvider) -> Key {
        with_id(names, IS_MODIFIED_KEY, self.id)
    }

    fn ttl(ttls: &dyn TtlProvider) -> Duration {
        ttls.ttl(ORGANIZATION_TTL)
    }

    fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}
