//! Change events published by the property tree.
//!
//! Every state transition in a resource's tree (assign, unassign, element
//! add/remove, primary demotion) produces a [`PropertyEvent`]. Events are
//! appended to the owning resource's event log and dispatched synchronously
//! to subscribers registered on the resource. Handlers must not mutate the
//! property they observe.

use serde_json::Value;

use crate::schema::SchemaRegistry;

/// The kind of state transition an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A value was assigned to a previously unassigned or different state
    Assigned,
    /// A value was removed
    Unassigned,
    /// An element was appended to a multi-valued property
    ElementAdded,
    /// An element was removed from a multi-valued property
    ElementRemoved,
    /// A previously primary element lost its primary flag
    PrimaryDemoted,
}

/// A single change notification.
#[derive(Debug, Clone)]
pub struct PropertyEvent {
    pub kind: ChangeKind,
    /// Stable id of the attribute whose property changed
    pub attribute_id: String,
    /// Canonical dotted path of the attribute
    pub path: String,
    /// Raw value before the change (`null` when previously unassigned)
    pub old: Value,
    /// Raw value after the change (`null` when now unassigned)
    pub new: Value,
}

/// Selects which events a subscriber receives.
#[derive(Debug, Clone)]
pub enum EventPredicate {
    /// Events whose attribute id equals the given id
    AttributeId(String),
    /// Events whose attribute carries the given annotation
    Annotation(String),
    /// All events
    Any,
}

impl EventPredicate {
    pub fn matches(&self, event: &PropertyEvent, registry: &SchemaRegistry) -> bool {
        match self {
            Self::AttributeId(id) => event.attribute_id == *id,
            Self::Annotation(annotation) => {
                registry.has_annotation(&event.attribute_id, annotation)
            }
            Self::Any => true,
        }
    }
}

/// A registered (predicate, handler) pair. Dispatch is synchronous within
/// the mutation call.
pub struct Subscriber {
    pub predicate: EventPredicate,
    pub handler: Box<dyn Fn(&PropertyEvent) + Send + Sync>,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("predicate", &self.predicate)
            .finish()
    }
}
