//! SCIM resource: a property tree rooted at a resource type's super
//! attribute.
//!
//! A resource exists only in memory during a request; the persisted form is
//! deserialized into a fresh tree on each access. The resource owns the
//! subscriber list and the event log for its tree: every mutation routed
//! through [`Resource::record`] appends to the log and dispatches matching
//! subscribers synchronously.

pub mod context;

use std::sync::Arc;

use serde_json::Value;

pub use context::RequestContext;

use crate::property::{Change, EventPredicate, Property, PropertyEvent, Subscriber};
use crate::schema::{ResourceType, SchemaRegistry};

/// A SCIM resource under construction or mutation.
pub struct Resource {
    registry: Arc<SchemaRegistry>,
    resource_type: Arc<ResourceType>,
    root: Property,
    subscribers: Vec<Subscriber>,
    events: Vec<PropertyEvent>,
}

impl Resource {
    /// Create an empty resource of the given type.
    pub fn new(registry: Arc<SchemaRegistry>, resource_type: Arc<ResourceType>) -> Self {
        let root = Property::new(Arc::clone(resource_type.super_attribute()));
        Self {
            registry,
            resource_type,
            root,
            subscribers: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn resource_type(&self) -> &Arc<ResourceType> {
        &self.resource_type
    }

    pub fn root(&self) -> &Property {
        &self.root
    }

    /// Mutable access to the tree. Callers are responsible for feeding the
    /// resulting changes back through [`Resource::record`].
    pub fn root_mut(&mut self) -> &mut Property {
        &mut self.root
    }

    /// The resource id, when assigned.
    pub fn id(&self) -> Option<String> {
        self.root
            .child("id")
            .map(Property::raw)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// The `meta.location` value, when assigned.
    pub fn location(&self) -> Option<String> {
        self.meta_field("location")
    }

    /// The `meta.version` value, when assigned.
    pub fn version(&self) -> Option<String> {
        self.meta_field("version")
    }

    fn meta_field(&self, name: &str) -> Option<String> {
        self.root
            .child("meta")
            .and_then(|meta| meta.child(name))
            .map(Property::raw)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// Derive the version from the current tree hash. `meta` itself is
    /// excluded from the hash, so stamping `meta` does not shift the
    /// version it records.
    pub fn compute_version(&self) -> String {
        self.root.hash(&self.registry)
    }

    /// Register a subscriber. Handlers run synchronously inside the
    /// mutation call and must not mutate the property they observe.
    pub fn subscribe<F>(&mut self, predicate: EventPredicate, handler: F)
    where
        F: Fn(&PropertyEvent) + Send + Sync + 'static,
    {
        self.subscribers.push(Subscriber {
            predicate,
            handler: Box::new(handler),
        });
    }

    /// Append changes to the event log and dispatch them to subscribers.
    pub fn record(&mut self, changes: Vec<Change>) {
        for event in changes {
            for subscriber in &self.subscribers {
                if subscriber.predicate.matches(&event, &self.registry) {
                    (subscriber.handler)(&event);
                }
            }
            self.events.push(event);
        }
    }

    /// The accumulated change notifications, in occurrence order.
    pub fn events(&self) -> &[PropertyEvent] {
        &self.events
    }

    /// Structural match against another resource of the same type.
    pub fn matches(&self, other: &Resource) -> bool {
        self.root.matches(&other.root, &self.registry)
    }

    /// Convenience accessor: raw value of a top-level attribute.
    pub fn raw_of(&self, name: &str) -> Value {
        self.root.child(name).map(Property::raw).unwrap_or(Value::Null)
    }
}

impl Clone for Resource {
    /// Cloning copies the tree and event log but not the subscribers,
    /// which are not transferable across resource instances.
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            resource_type: Arc::clone(&self.resource_type),
            root: self.root.clone(),
            subscribers: Vec::new(),
            events: self.events.clone(),
        }
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("resource_type", &self.resource_type.name)
            .field("id", &self.id())
            .field("events", &self.events.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::ChangeKind;
    use serde_json::json;
    use std::sync::Mutex;

    fn empty_user() -> Resource {
        let registry = Arc::new(SchemaRegistry::with_embedded().unwrap());
        let resource_type = Arc::clone(registry.resource_type("User").unwrap());
        Resource::new(registry, resource_type)
    }

    #[test]
    fn test_id_and_meta_accessors() {
        let mut resource = empty_user();
        let changes = resource
            .root_mut()
            .child_mut("id")
            .unwrap()
            .set(&json!("2819c223-7f76-453a-919d-413861904646"))
            .unwrap();
        resource.record(changes);
        assert_eq!(
            resource.id().as_deref(),
            Some("2819c223-7f76-453a-919d-413861904646")
        );
        assert!(resource.version().is_none());
    }

    #[test]
    fn test_subscriber_dispatch_by_attribute_id() {
        let mut resource = empty_user();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        resource.subscribe(
            EventPredicate::AttributeId(
                "urn:ietf:params:scim:schemas:core:2.0:User:userName".to_string(),
            ),
            move |event| sink.lock().unwrap().push(event.kind),
        );

        let changes = resource
            .root_mut()
            .child_mut("userName")
            .unwrap()
            .set(&json!("alice"))
            .unwrap();
        resource.record(changes);

        let changes = resource
            .root_mut()
            .child_mut("displayName")
            .unwrap()
            .set(&json!("Alice"))
            .unwrap();
        resource.record(changes);

        let kinds = seen.lock().unwrap();
        assert_eq!(kinds.as_slice(), &[ChangeKind::Assigned]);
        assert_eq!(resource.events().len(), 2);
    }

    #[test]
    fn test_subscriber_dispatch_by_annotation() {
        let mut resource = empty_user();
        let seen = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        resource.subscribe(
            EventPredicate::Annotation("@SchemaSync".to_string()),
            move |_event| *sink.lock().unwrap() += 1,
        );

        let changes = resource
            .root_mut()
            .child_mut("schemas")
            .unwrap()
            .set(&json!(["urn:ietf:params:scim:schemas:core:2.0:User"]))
            .unwrap();
        resource.record(changes);
        assert!(*seen.lock().unwrap() > 0);
    }

    #[test]
    fn test_version_stability() {
        let mut resource = empty_user();
        let changes = resource
            .root_mut()
            .child_mut("userName")
            .unwrap()
            .set(&json!("alice"))
            .unwrap();
        resource.record(changes);

        let before = resource.compute_version();
        let clone = resource.clone();
        assert_eq!(before, clone.compute_version());
    }
}
