//! JSON serialization and deserialization for resources.
//!
//! Deserialization populates a property tree from a request body using the
//! resource type's super attribute: unknown keys are rejected unless they
//! name a declared extension schema, type coercion is strict, and
//! multi-valued attributes accept arrays only.
//!
//! Serialization has two modes. [`serialize`] emits canonical SCIM JSON for
//! responses, enforcing the attribute `returned` classes against the
//! request projection; this is the final word on visibility regardless of
//! what the database projection returned. [`serialize_stored`] emits the
//! complete tree (including `returned=never` values) for persistence.

use std::collections::HashSet;
use std::sync::Arc;

use log::debug;
use serde_json::{Map, Value};

use crate::crud::params::Projection;
use crate::error::{ScimError, ScimResult};
use crate::expr::AttrPath;
use crate::expr::eval::{PathEntry, resolve_entry};
use crate::property::Property;
use crate::resource::Resource;
use crate::schema::{Attribute, Returned, ResourceType, SchemaRegistry};

/// Deserialize a request body into a fresh resource of the given type.
pub fn deserialize(
    registry: &Arc<SchemaRegistry>,
    resource_type: &Arc<ResourceType>,
    body: &Value,
) -> ScimResult<Resource> {
    let object = body
        .as_object()
        .ok_or_else(|| ScimError::invalid_syntax("resource body must be a JSON object"))?;
    let mut resource = Resource::new(Arc::clone(registry), Arc::clone(resource_type));
    let changes = resource.root_mut().merge(object)?;
    resource.record(changes);
    Ok(resource)
}

/// Rebuild a resource from its persisted form. The stored form is the full
/// canonical rendering, so this is the same strict population as request
/// deserialization.
pub fn deserialize_stored(
    registry: &Arc<SchemaRegistry>,
    resource_type: &Arc<ResourceType>,
    stored: &Value,
) -> ScimResult<Resource> {
    deserialize(registry, resource_type, stored)
}

/// Serialize the complete tree for persistence, ignoring `returned` rules.
/// Optimistic-concurrency versions are part of this form via `meta.version`.
pub fn serialize_stored(resource: &Resource) -> Value {
    let raw = resource.root().raw();
    if raw.is_null() {
        Value::Object(Map::new())
    } else {
        raw
    }
}

/// Serialize a resource for a response, honoring `returned` classes and the
/// request projection.
pub fn serialize(resource: &Resource, projection: Option<&Projection>) -> ScimResult<Value> {
    let plan = RenderPlan::build(resource.resource_type(), projection);
    let mut out = Map::new();
    for child in resource.root().children() {
        if let Some(value) = render(child, &plan, false) {
            out.insert(child.attribute().name.clone(), value);
        }
    }
    Ok(Value::Object(out))
}

/// Inclusion decisions precomputed from the projection.
struct RenderPlan {
    /// Attribute ids named exactly by the `attributes` list
    include_exact: HashSet<String>,
    /// Ancestors of exactly included attributes
    include_chain: HashSet<String>,
    /// Attribute ids named by the `excludedAttributes` list
    exclude_exact: HashSet<String>,
    has_includes: bool,
}

impl RenderPlan {
    fn build(resource_type: &ResourceType, projection: Option<&Projection>) -> Self {
        let mut plan = Self {
            include_exact: HashSet::new(),
            include_chain: HashSet::new(),
            exclude_exact: HashSet::new(),
            has_includes: false,
        };
        let Some(projection) = projection else {
            return plan;
        };
        for path in &projection.attributes {
            match resolve_chain(resource_type, path) {
                Some(chain) => {
                    if let Some((last, ancestors)) = chain.split_last() {
                        plan.include_exact.insert(last.id.clone());
                        for ancestor in ancestors {
                            plan.include_chain.insert(ancestor.id.clone());
                        }
                    }
                }
                None => debug!("ignoring unresolvable projection path {}", path),
            }
        }
        plan.has_includes = !plan.include_exact.is_empty();
        for path in &projection.excluded_attributes {
            match resolve_chain(resource_type, path) {
                Some(chain) => {
                    if let Some(last) = chain.last() {
                        plan.exclude_exact.insert(last.id.clone());
                    }
                }
                None => debug!("ignoring unresolvable projection path {}", path),
            }
        }
        plan
    }

    fn should_emit(&self, attr: &Attribute, forced: bool) -> bool {
        match attr.returned {
            Returned::Never => false,
            Returned::Always => true,
            Returned::Default => {
                if forced {
                    return true;
                }
                if self.has_includes {
                    self.include_exact.contains(&attr.id)
                        || self.include_chain.contains(&attr.id)
                } else {
                    !self.exclude_exact.contains(&attr.id)
                }
            }
            Returned::Request => {
                forced
                    || (self.has_includes
                        && (self.include_exact.contains(&attr.id)
                            || self.include_chain.contains(&attr.id)))
            }
        }
    }
}

/// Resolve a projection path to the chain of attributes it names, rooted at
/// the resource type's super attribute. Value filters are ignored.
fn resolve_chain(resource_type: &ResourceType, path: &AttrPath) -> Option<Vec<Arc<Attribute>>> {
    let root = resource_type.super_attribute();
    let (mut current, steps): (Arc<Attribute>, _) =
        match resolve_entry(path, &resource_type.schema, root).ok()? {
            PathEntry::Root(steps) => (Arc::clone(root), steps),
            PathEntry::Container(name, steps) => {
                (Arc::clone(root.sub_attribute(&name)?), steps)
            }
        };

    let mut chain = Vec::new();
    if !current.path.is_empty() {
        chain.push(Arc::clone(&current));
    }
    for step in steps {
        let next = Arc::clone(current.sub_attribute(&step.name)?);
        chain.push(Arc::clone(&next));
        current = next;
    }
    if chain.is_empty() { None } else { Some(chain) }
}

fn render(prop: &Property, plan: &RenderPlan, forced: bool) -> Option<Value> {
    let attr = prop.attribute();
    if !plan.should_emit(attr, forced) || prop.is_unassigned() {
        return None;
    }
    let child_forced =
        forced || plan.include_exact.contains(&attr.id) || attr.returned == Returned::Always;

    if attr.multi_valued {
        let mut items = Vec::new();
        for element in prop.elements() {
            if element.attribute().is_complex() {
                let mut out = Map::new();
                for child in element.children() {
                    if let Some(value) = render(child, plan, child_forced) {
                        out.insert(child.attribute().name.clone(), value);
                    }
                }
                if !out.is_empty() {
                    items.push(Value::Object(out));
                }
            } else {
                let value = element.raw();
                if !value.is_null() {
                    items.push(value);
                }
            }
        }
        if items.is_empty() { None } else { Some(Value::Array(items)) }
    } else if attr.is_complex() {
        let mut out = Map::new();
        for child in prop.children() {
            if let Some(value) = render(child, plan, child_forced) {
                out.insert(child.attribute().name.clone(), value);
            }
        }
        if out.is_empty() { None } else { Some(Value::Object(out)) }
    } else {
        Some(prop.raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> (Arc<SchemaRegistry>, Arc<ResourceType>) {
        let registry = Arc::new(SchemaRegistry::with_embedded().unwrap());
        let resource_type = Arc::clone(registry.resource_type("User").unwrap());
        (registry, resource_type)
    }

    #[test]
    fn test_deserialize_rejects_unknown_keys() {
        let (registry, rt) = setup();
        let err = deserialize(
            &registry,
            &rt,
            &json!({"userName": "alice", "shoeSize": 42}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("shoeSize"));
    }

    #[test]
    fn test_deserialize_accepts_declared_extension() {
        let (registry, rt) = setup();
        let resource = deserialize(
            &registry,
            &rt,
            &json!({
                "userName": "alice",
                "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User": {
                    "employeeNumber": "E-1"
                }
            }),
        )
        .unwrap();
        let container = resource
            .root()
            .child("urn:ietf:params:scim:schemas:extension:enterprise:2.0:User")
            .unwrap();
        assert!(!container.is_unassigned());
    }

    #[test]
    fn test_serialize_honors_returned_never() {
        let (registry, rt) = setup();
        let resource = deserialize(
            &registry,
            &rt,
            &json!({"userName": "alice", "password": "hunter2"}),
        )
        .unwrap();
        let body = serialize(&resource, None).unwrap();
        assert_eq!(body["userName"], "alice");
        assert!(body.get("password").is_none());

        // But the stored form keeps it for persistence.
        let stored = serialize_stored(&resource);
        assert_eq!(stored["password"], "hunter2");
    }

    #[test]
    fn test_serialize_projection_include() {
        let (registry, rt) = setup();
        let resource = deserialize(
            &registry,
            &rt,
            &json!({
                "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"],
                "id": "42",
                "userName": "alice",
                "name": {"familyName": "Liddell"},
                "emails": [{"value": "a@example.com"}],
                "meta": {"resourceType": "User", "version": "v1"}
            }),
        )
        .unwrap();
        let projection = Projection::parse(Some("userName"), None).unwrap();
        let body = serialize(&resource, Some(&projection)).unwrap();

        assert_eq!(body["userName"], "alice");
        assert_eq!(body["id"], "42");
        assert!(body.get("schemas").is_some());
        assert!(body.get("meta").is_some());
        assert!(body.get("name").is_none());
        assert!(body.get("emails").is_none());
    }

    #[test]
    fn test_serialize_projection_exclude() {
        let (registry, rt) = setup();
        let resource = deserialize(
            &registry,
            &rt,
            &json!({
                "id": "42",
                "userName": "alice",
                "emails": [{"value": "a@example.com"}]
            }),
        )
        .unwrap();
        let projection = Projection::parse(None, Some("emails")).unwrap();
        let body = serialize(&resource, Some(&projection)).unwrap();
        assert!(body.get("emails").is_none());
        assert_eq!(body["userName"], "alice");
        // returned=always survives an exclude
        let projection = Projection::parse(None, Some("id")).unwrap();
        let body = serialize(&resource, Some(&projection)).unwrap();
        assert_eq!(body["id"], "42");
    }

    #[test]
    fn test_serialize_sub_attribute_projection() {
        let (registry, rt) = setup();
        let resource = deserialize(
            &registry,
            &rt,
            &json!({
                "userName": "alice",
                "name": {"familyName": "Liddell", "givenName": "Alice"}
            }),
        )
        .unwrap();
        let projection = Projection::parse(Some("name.familyName"), None).unwrap();
        let body = serialize(&resource, Some(&projection)).unwrap();
        assert_eq!(body["name"]["familyName"], "Liddell");
        assert!(body["name"].get("givenName").is_none());
        assert!(body.get("userName").is_none());
    }

    #[test]
    fn test_round_trip_stability() {
        let (registry, rt) = setup();
        let resource = deserialize(
            &registry,
            &rt,
            &json!({
                "userName": "alice",
                "active": true,
                "emails": [{"value": "a@example.com", "type": "work", "primary": true}]
            }),
        )
        .unwrap();
        let stored = serialize_stored(&resource);
        let rebuilt = deserialize_stored(&registry, &rt, &stored).unwrap();
        assert!(resource.matches(&rebuilt));
        assert_eq!(resource.compute_version(), rebuilt.compute_version());
    }

    #[test]
    fn test_extension_emitted_only_when_populated() {
        let (registry, rt) = setup();
        let resource = deserialize(&registry, &rt, &json!({"userName": "alice"})).unwrap();
        let body = serialize(&resource, None).unwrap();
        assert!(
            body.get("urn:ietf:params:scim:schemas:extension:enterprise:2.0:User")
                .is_none()
        );
    }
}
