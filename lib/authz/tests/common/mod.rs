//! In-process fake of the authorization API.

use async_trait::async_trait;
use rootcause::Report;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use trellis_authz::{
    ApiRequest, ApiResponse, Attribute, AttributeMode, AttributePathNode, AuthzError,
    AuthzTransport, CheckAttributeResponse, Edge, EdgeType, ListResponse, Method, Object,
    ObjectType, Organization, Region,
};
use trellis_cache::{CacheError, CacheLookup, CacheProvider, Key, Sentinel, SentinelKind, SetOutcome};
use trellis_core::{EdgeId, ObjectId, ObjectTypeId, OrganizationId};
use uuid::Uuid;

/// Routes client logs to the test harness, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct State {
    object_types: Vec<ObjectType>,
    edge_types: Vec<EdgeType>,
    objects: Vec<Object>,
    edges: Vec<Edge>,
    organizations: Vec<Organization>,
    calls: HashMap<String, usize>,
    page_size: Option<usize>,
    omit_next_cursor: bool,
}

/// Serves the authorization API from memory and counts calls per route.
///
/// Routes are counted as `"{METHOD} {path}"` with every UUID segment replaced
/// by `:id`, e.g. `"GET /authz/objects/:id/edges"`.
#[derive(Clone, Default)]
pub struct FakeAuthzServer {
    state: Arc<Mutex<State>>,
}

impl FakeAuthzServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves list endpoints at most `size` items per page.
    pub fn with_page_size(self, size: usize) -> Self {
        self.state.lock().unwrap().page_size = Some(size);
        self
    }

    /// Keeps `has_next` on list pages but leaves out the `next` cursor.
    pub fn without_next_cursor(self) -> Self {
        self.state.lock().unwrap().omit_next_cursor = true;
        self
    }

    pub fn calls(&self, route: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(route)
            .copied()
            .unwrap_or(0)
    }

    pub fn objects_with_alias(&self, alias: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .objects
            .iter()
            .filter(|o| o.alias.as_deref() == Some(alias))
            .count()
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }
}

#[async_trait]
impl AuthzTransport for FakeAuthzServer {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, Report<AuthzError>> {
        let mut state = self.state.lock().unwrap();
        let (route, ids) = normalize(&request.path);
        *state
            .calls
            .entry(format!("{} {}", request.method, route))
            .or_default() += 1;
        Ok(state.handle(&request, &route, &ids))
    }
}

fn normalize(path: &str) -> (String, Vec<Uuid>) {
    let mut ids = Vec::new();
    let route = path
        .split('/')
        .map(|segment| match segment.parse::<Uuid>() {
            Ok(id) => {
                ids.push(id);
                ":id"
            }
            Err(_) => segment,
        })
        .collect::<Vec<_>>()
        .join("/");
    (route, ids)
}

fn not_found() -> ApiResponse {
    ApiResponse::new(404, r#"{"error":"not found"}"#)
}

fn bad_request(details: &str) -> ApiResponse {
    ApiResponse::new(400, json!({ "error": details }).to_string())
}

fn field<T: DeserializeOwned>(request: &ApiRequest, name: &str) -> Option<T> {
    let value = request.body.as_ref()?.get(name)?.clone();
    serde_json::from_value(value).ok()
}

fn param<T: std::str::FromStr>(request: &ApiRequest, name: &str) -> Option<T> {
    request.query_param(name)?.parse().ok()
}

fn create<T: Clone + Serialize>(
    list: &mut Vec<T>,
    item: T,
    id: impl Fn(&T) -> Uuid,
    natural: impl Fn(&T) -> Option<String>,
    same: impl Fn(&T, &T) -> bool,
) -> ApiResponse {
    let key = natural(&item);
    let existing = list
        .iter()
        .find(|&e| id(e) == id(&item) || (key.is_some() && natural(e) == key));
    if let Some(existing) = existing {
        let body = json!({ "error": { "id": id(existing), "identical": same(existing, &item) } });
        return ApiResponse::new(409, body.to_string());
    }
    list.push(item.clone());
    ApiResponse::json_ok(&item)
}

fn get<T: Serialize>(list: &[T], id: impl Fn(&T) -> Uuid, wanted: Uuid) -> ApiResponse {
    match list.iter().find(|&e| id(e) == wanted) {
        Some(item) => ApiResponse::json_ok(item),
        None => not_found(),
    }
}

fn remove<T>(list: &mut Vec<T>, id: impl Fn(&T) -> Uuid, wanted: Uuid) -> ApiResponse {
    let before = list.len();
    list.retain(|e| id(e) != wanted);
    if list.len() == before {
        return not_found();
    }
    ApiResponse::new(200, "{}")
}

impl State {
    fn page<T: Serialize + Clone>(&self, items: Vec<T>, request: &ApiRequest) -> ApiResponse {
        let start = request
            .query_param("starting_after")
            .filter(|c| !c.is_empty())
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0);
        let mut limit = param::<usize>(request, "limit").unwrap_or(items.len().max(1));
        if let Some(size) = self.page_size {
            limit = limit.min(size);
        }
        let end = (start + limit).min(items.len());
        let data = items.get(start..end).map(<[T]>::to_vec).unwrap_or_default();
        let has_next = end < items.len();
        let has_prev = start > 0;
        ApiResponse::json_ok(&ListResponse {
            data,
            has_next,
            has_prev,
            next: (has_next && !self.omit_next_cursor).then(|| end.to_string()),
            prev: has_prev.then(|| start.to_string()),
        })
    }

    fn handle(&mut self, request: &ApiRequest, route: &str, ids: &[Uuid]) -> ApiResponse {
        let id = ids.first().copied().unwrap_or_default();
        match (request.method, route) {
            (Method::Post, "/authz/objecttypes") => {
                let Some(item) = field::<ObjectType>(request, "object_type") else {
                    return bad_request("object_type required");
                };
                create(
                    &mut self.object_types,
                    item,
                    |t| t.id.as_uuid(),
                    |t| Some(t.type_name.clone()),
                    ObjectType::equals_ignoring_id,
                )
            }
            (Method::Post, "/authz/edgetypes") => {
                let Some(item) = field::<EdgeType>(request, "edge_type") else {
                    return bad_request("edge_type required");
                };
                create(
                    &mut self.edge_types,
                    item,
                    |t| t.id.as_uuid(),
                    |t| {
                        Some(format!(
                            "{}/{}/{}",
                            t.type_name, t.source_object_type_id, t.target_object_type_id
                        ))
                    },
                    EdgeType::equals_ignoring_id,
                )
            }
            (Method::Post, "/authz/objects") => {
                let Some(item) = field::<Object>(request, "object") else {
                    return bad_request("object required");
                };
                create(
                    &mut self.objects,
                    item,
                    |o| o.id.as_uuid(),
                    |o| {
                        o.alias
                            .as_ref()
                            .map(|a| format!("{}/{}/{}", o.type_id, a, o.organization_id))
                    },
                    Object::equals_ignoring_id,
                )
            }
            (Method::Post, "/authz/edges") => {
                let Some(item) = field::<Edge>(request, "edge") else {
                    return bad_request("edge required");
                };
                let endpoints_exist = [item.source_object_id, item.target_object_id]
                    .iter()
                    .all(|end| self.objects.iter().any(|o| o.id == *end));
                if !endpoints_exist {
                    return bad_request("edge endpoints must exist");
                }
                create(
                    &mut self.edges,
                    item,
                    |e| e.id.as_uuid(),
                    |e| {
                        Some(format!(
                            "{}/{}/{}",
                            e.source_object_id, e.target_object_id, e.edge_type_id
                        ))
                    },
                    Edge::equals_ignoring_id,
                )
            }
            (Method::Post, "/authz/organizations") => {
                let Some(item) = field::<Organization>(request, "organization") else {
                    return bad_request("organization required");
                };
                create(
                    &mut self.organizations,
                    item,
                    |o| o.id.as_uuid(),
                    |o| Some(o.name.clone()),
                    Organization::equals_ignoring_id,
                )
            }

            (Method::Get, "/authz/objecttypes/:id") => get(&self.object_types, |t| t.id.as_uuid(), id),
            (Method::Get, "/authz/edgetypes/:id") => get(&self.edge_types, |t| t.id.as_uuid(), id),
            (Method::Get, "/authz/objects/:id") => get(&self.objects, |o| o.id.as_uuid(), id),
            (Method::Get, "/authz/edges/:id") => get(&self.edges, |e| e.id.as_uuid(), id),
            (Method::Get, "/authz/organizations/:id") => {
                get(&self.organizations, |o| o.id.as_uuid(), id)
            }

            (Method::Get, "/authz/objecttypes") => self.page(self.object_types.clone(), request),
            (Method::Get, "/authz/edgetypes") => {
                let org = param::<OrganizationId>(request, "organization_id");
                let items = self
                    .edge_types
                    .iter()
                    .filter(|t| org.is_none_or(|org| t.organization_id == org))
                    .cloned()
                    .collect();
                self.page(items, request)
            }
            (Method::Get, "/authz/organizations") => self.page(self.organizations.clone(), request),
            (Method::Get, "/authz/objects") => {
                let type_id = param::<ObjectTypeId>(request, "type_id");
                let name = request.query_param("name");
                let org = param::<OrganizationId>(request, "organization_id");
                let items = self
                    .objects
                    .iter()
                    .filter(|o| type_id.is_none_or(|t| o.type_id == t))
                    .filter(|o| name.is_none_or(|n| o.alias.as_deref() == Some(n)))
                    .filter(|o| org.is_none_or(|org| o.organization_id == org))
                    .cloned()
                    .collect();
                self.page(items, request)
            }
            (Method::Get, "/authz/edges") => {
                let source = param::<ObjectId>(request, "source_object_id");
                let target = param::<ObjectId>(request, "target_object_id");
                let edge_type = param::<Uuid>(request, "edge_type_id");
                let items = self
                    .edges
                    .iter()
                    .filter(|e| source.is_none_or(|s| e.source_object_id == s))
                    .filter(|e| target.is_none_or(|t| e.target_object_id == t))
                    .filter(|e| edge_type.is_none_or(|t| e.edge_type_id.as_uuid() == t))
                    .cloned()
                    .collect();
                self.page(items, request)
            }
            (Method::Get, "/authz/objects/:id/edges") => {
                let object_id = ObjectId::from_uuid(id);
                if !self.objects.iter().any(|o| o.id == object_id) {
                    return not_found();
                }
                let target = param::<ObjectId>(request, "target_object_id");
                let items = self
                    .edges
                    .iter()
                    .filter(|e| match target {
                        Some(target) => e.source_object_id == object_id && e.target_object_id == target,
                        None => e.source_object_id == object_id || e.target_object_id == object_id,
                    })
                    .cloned()
                    .collect();
                self.page(items, request)
            }

            (Method::Put, "/authz/edgetypes/:id") => {
                let type_name = field::<String>(request, "type_name");
                let attributes = field::<Vec<Attribute>>(request, "attributes");
                let Some(edge_type) = self.edge_types.iter_mut().find(|t| t.id.as_uuid() == id) else {
                    return not_found();
                };
                if let Some(type_name) = type_name {
                    edge_type.type_name = type_name;
                }
                edge_type.attributes = attributes.unwrap_or_default();
                ApiResponse::json_ok(edge_type)
            }
            (Method::Put, "/authz/objects/:id") => {
                let alias = field::<Option<String>>(request, "alias").flatten();
                let Some(current) = self.objects.iter().find(|o| o.id.as_uuid() == id).cloned() else {
                    return not_found();
                };
                let taken = alias.is_some()
                    && self.objects.iter().any(|o| {
                        o.id != current.id
                            && o.alias == alias
                            && o.type_id == current.type_id
                            && o.organization_id == current.organization_id
                    });
                if taken {
                    return ApiResponse::new(409, r#"{"error":"alias taken"}"#);
                }
                let Some(object) = self.objects.iter_mut().find(|o| o.id == current.id) else {
                    return not_found();
                };
                object.alias = alias;
                ApiResponse::json_ok(object)
            }
            (Method::Put, "/authz/organizations/:id") => {
                let name = field::<String>(request, "name");
                let region = field::<Region>(request, "region");
                let Some(org) = self.organizations.iter_mut().find(|o| o.id.as_uuid() == id) else {
                    return not_found();
                };
                if let Some(name) = name {
                    org.name = name;
                }
                if let Some(region) = region {
                    org.region = region;
                }
                ApiResponse::json_ok(org)
            }
            (Method::Put, "/authz/migrate/objects/:id") => {
                let Some(org) = field::<OrganizationId>(request, "organization_id") else {
                    return bad_request("organization_id required");
                };
                let Some(object) = self.objects.iter_mut().find(|o| o.id.as_uuid() == id) else {
                    return not_found();
                };
                object.organization_id = org;
                ApiResponse::json_ok(object)
            }
            (Method::Put, "/authz/migrate/edgetypes/:id") => {
                let Some(org) = field::<OrganizationId>(request, "organization_id") else {
                    return bad_request("organization_id required");
                };
                let Some(edge_type) = self.edge_types.iter_mut().find(|t| t.id.as_uuid() == id) else {
                    return not_found();
                };
                edge_type.organization_id = org;
                ApiResponse::json_ok(edge_type)
            }

            (Method::Delete, "/authz/objecttypes/:id") => {
                remove(&mut self.object_types, |t| t.id.as_uuid(), id)
            }
            (Method::Delete, "/authz/edgetypes/:id") => {
                self.edges.retain(|e| e.edge_type_id.as_uuid() != id);
                remove(&mut self.edge_types, |t| t.id.as_uuid(), id)
            }
            (Method::Delete, "/authz/objects/:id") => {
                let object_id = ObjectId::from_uuid(id);
                self.edges
                    .retain(|e| e.source_object_id != object_id && e.target_object_id != object_id);
                remove(&mut self.objects, |o| o.id.as_uuid(), id)
            }
            (Method::Delete, "/authz/edges/:id") => remove(&mut self.edges, |e| e.id.as_uuid(), id),
            (Method::Delete, "/authz/organizations/:id") => {
                remove(&mut self.organizations, |o| o.id.as_uuid(), id)
            }
            (Method::Delete, "/authz/objects/:id/edges") => {
                let object_id = ObjectId::from_uuid(id);
                if !self.objects.iter().any(|o| o.id == object_id) {
                    return not_found();
                }
                self.edges
                    .retain(|e| e.source_object_id != object_id && e.target_object_id != object_id);
                ApiResponse::new(200, "{}")
            }

            (Method::Get, "/authz/checkattribute") => {
                let (Some(source), Some(target), Some(attribute)) = (
                    param::<ObjectId>(request, "source_object_id"),
                    param::<ObjectId>(request, "target_object_id"),
                    request.query_param("attribute"),
                ) else {
                    return bad_request("source, target and attribute required");
                };
                ApiResponse::json_ok(&self.check_attribute(source, target, attribute))
            }
            (Method::Get, "/authz/listattributes") => {
                let (Some(source), Some(target)) = (
                    param::<ObjectId>(request, "source_object_id"),
                    param::<ObjectId>(request, "target_object_id"),
                ) else {
                    return bad_request("source and target required");
                };
                let names: HashSet<String> = self
                    .edge_types
                    .iter()
                    .flat_map(|t| t.attributes.iter().map(|a| a.name.clone()))
                    .collect();
                let mut granted: Vec<String> = names
                    .into_iter()
                    .filter(|name| self.check_attribute(source, target, name).has_attribute)
                    .collect();
                granted.sort();
                ApiResponse::json_ok(&granted)
            }
            (Method::Get, "/authz/listobjectsreachablewithattribute") => {
                let (Some(source), Some(type_id), Some(attribute)) = (
                    param::<ObjectId>(request, "source_object_id"),
                    param::<ObjectTypeId>(request, "target_object_type_id"),
                    request.query_param("attribute"),
                ) else {
                    return bad_request("source, target type and attribute required");
                };
                let data: Vec<ObjectId> = self
                    .objects
                    .iter()
                    .filter(|o| o.type_id == type_id)
                    .filter(|o| self.check_attribute(source, o.id, attribute).has_attribute)
                    .map(|o| o.id)
                    .collect();
                ApiResponse::json_ok(&json!({ "data": data }))
            }

            _ => not_found(),
        }
    }

    /// Breadth-first search over (object, granted) states: inherit edges are
    /// followed before the grant, one direct edge grants, and propagate edges
    /// carry the grant further.
    fn check_attribute(&self, source: ObjectId, target: ObjectId, attribute: &str) -> CheckAttributeResponse {
        let mode = |edge: &Edge| {
            self.edge_types
                .iter()
                .find(|t| t.id == edge.edge_type_id)
                .and_then(|t| t.attributes.iter().find(|a| a.name == attribute))
                .map(|a| a.mode)
        };
        let start = (source, false);
        let mut parents: HashMap<(ObjectId, bool), ((ObjectId, bool), EdgeId)> = HashMap::new();
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some((node, granted)) = queue.pop_front() {
            if node == target && granted {
                let mut path = Vec::new();
                let mut current = (node, granted);
                loop {
                    match parents.get(&current) {
                        Some(&(previous, edge_id)) => {
                            path.push(AttributePathNode {
                                object_id: current.0,
                                edge_id,
                            });
                            current = previous;
                        }
                        None => {
                            path.push(AttributePathNode {
                                object_id: current.0,
                                edge_id: EdgeId::nil(),
                            });
                            break;
                        }
                    }
                }
                path.reverse();
                return CheckAttributeResponse {
                    has_attribute: true,
                    path,
                };
            }
            for edge in self.edges.iter().filter(|e| e.source_object_id == node) {
                let next_granted = match (granted, mode(edge)) {
                    (false, Some(AttributeMode::Inherit)) => false,
                    (false, Some(AttributeMode::Direct)) => true,
                    (true, Some(AttributeMode::Propagate)) => true,
                    _ => continue,
                };
                let next = (edge.target_object_id, next_granted);
                if seen.insert(next) {
                    parents.insert(next, ((node, granted), edge.id));
                    queue.push_back(next);
                }
            }
        }
        CheckAttributeResponse::default()
    }
}

/// A cache provider whose store is always unreachable.
pub struct UnreachableCache;

fn unavailable() -> Report<CacheError> {
    CacheError::ProviderUnavailable {
        details: "connection refused".to_string(),
    }
    .into()
}

#[async_trait]
impl CacheProvider for UnreachableCache {
    async fn get_value(&self, _key: &Key, _lock_on_miss: bool) -> Result<CacheLookup, Report<CacheError>> {
        Err(unavailable())
    }

    async fn set_value(
        &self,
        _lock_key: &Key,
        _keys_to_set: &[Key],
        _value: &str,
        _sentinel: &Sentinel,
        _ttl: std::time::Duration,
    ) -> Result<SetOutcome, Report<CacheError>> {
        Err(unavailable())
    }

    async fn delete_value(
        &self,
        _keys: &[Key],
        _set_tombstone: bool,
        _force: bool,
    ) -> Result<(), Report<CacheError>> {
        Err(unavailable())
    }

    async fn write_sentinel(
        &self,
        _kind: SentinelKind,
        _keys: &[Key],
    ) -> Result<Option<Sentinel>, Report<CacheError>> {
        Err(unavailable())
    }

    async fn release_sentinel(&self, _keys: &[Key], _sentinel: &Sentinel) -> Result<(), Report<CacheError>> {
        Err(unavailable())
    }

    async fn add_dependency(
        &self,
        _dependency_keys: &[Key],
        _dependents: &[Key],
        _ttl: std::time::Duration,
    ) -> Result<(), Report<CacheError>> {
        Err(unavailable())
    }

    async fn clear_dependencies(&self, _key: &Key, _set_tombstone: bool) -> Result<(), Report<CacheError>> {
        Err(unavailable())
    }

    async fn flush(&self, _prefix: &str, _flush_tombstones: bool) -> Result<(), Report<CacheError>> {
        Err(unavailable())
    }

    fn name(&self) -> &str {
        "unreachable"
    }
}

