//! Typed, schema-bound property tree.
//!
//! A [`Property`] is one node in the runtime representation of a resource:
//! a reference to its [`Attribute`] plus a value whose shape is dictated by
//! the attribute's type. Complex properties own one child per sub-attribute;
//! multi-valued properties own an ordered list of element properties sharing
//! the element attribute structure.
//!
//! All mutations are strict about types (a JSON string never coerces into an
//! integer slot) and return the list of [`Change`]s they caused, which the
//! owning resource turns into subscriber notifications.

pub mod event;
pub mod matching;

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};

pub use event::{ChangeKind, EventPredicate, PropertyEvent, Subscriber};

use crate::error::{ScimError, ScimResult};
use crate::schema::{Attribute, AttributeType};

/// A change produced by a tree mutation, before dispatch.
pub type Change = PropertyEvent;

/// A typed simple value held by a leaf property.
#[derive(Debug, Clone, PartialEq)]
pub enum SimpleValue {
    Str(String),
    Bool(bool),
    Integer(i64),
    Decimal(Number),
    DateTime(DateTime<Utc>),
    Binary(String),
    Reference(String),
}

impl SimpleValue {
    /// Render as canonical SCIM JSON.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Str(s) | Self::Binary(s) | Self::Reference(s) => Value::String(s.clone()),
            Self::Bool(b) => Value::Bool(*b),
            Self::Integer(i) => Value::Number((*i).into()),
            Self::Decimal(n) => Value::Number(n.clone()),
            Self::DateTime(dt) => {
                Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Unassigned,
    Simple(SimpleValue),
    Complex(Vec<Property>),
    Multi(Vec<Property>),
}

/// One node in the property tree.
#[derive(Debug, Clone)]
pub struct Property {
    attr: Arc<Attribute>,
    node: Node,
}

/// The JSON type name of a value, for error messages.
pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "decimal",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Property {
    /// Create an unassigned property for the given attribute. Complex
    /// properties are created with the full set of unassigned children.
    pub fn new(attr: Arc<Attribute>) -> Self {
        let node = if attr.multi_valued {
            Node::Multi(Vec::new())
        } else if attr.is_complex() {
            let children = attr
                .sub_attributes
                .iter()
                .map(|sub| Property::new(Arc::clone(sub)))
                .collect();
            Node::Complex(children)
        } else {
            Node::Unassigned
        };
        Self { attr, node }
    }

    pub fn attribute(&self) -> &Arc<Attribute> {
        &self.attr
    }

    /// Whether this property holds no value. A complex property is
    /// unassigned when all its children are; a multi-valued property when
    /// it has no elements.
    pub fn is_unassigned(&self) -> bool {
        match &self.node {
            Node::Unassigned => true,
            Node::Simple(_) => false,
            Node::Complex(children) => children.iter().all(Property::is_unassigned),
            Node::Multi(elements) => elements.is_empty(),
        }
    }

    /// The `pr` criterion: assigned and not an empty container.
    pub fn present(&self) -> bool {
        !self.is_unassigned()
    }

    /// The typed simple value, if this is an assigned leaf.
    pub fn simple_value(&self) -> Option<&SimpleValue> {
        match &self.node {
            Node::Simple(v) => Some(v),
            _ => None,
        }
    }

    /// Render the canonical raw value: `null` when unassigned, an object of
    /// assigned children for complex, an array of element values for
    /// multi-valued.
    pub fn raw(&self) -> Value {
        match &self.node {
            Node::Unassigned => Value::Null,
            Node::Simple(v) => v.to_json(),
            Node::Complex(children) => {
                if self.is_unassigned() {
                    return Value::Null;
                }
                let mut out = Map::new();
                for child in children {
                    if !child.is_unassigned() {
                        out.insert(child.attr.name.clone(), child.raw());
                    }
                }
                Value::Object(out)
            }
            Node::Multi(elements) => {
                Value::Array(elements.iter().map(Property::raw).collect())
            }
        }
    }

    // ----- navigation -----

    /// Child of a complex property by sub-attribute name
    /// (case-insensitive).
    pub fn child(&self, name: &str) -> Option<&Property> {
        match &self.node {
            Node::Complex(children) => children
                .iter()
                .find(|c| c.attr.name.eq_ignore_ascii_case(name)),
            _ => None,
        }
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Property> {
        match &mut self.node {
            Node::Complex(children) => children
                .iter_mut()
                .find(|c| c.attr.name.eq_ignore_ascii_case(name)),
            _ => None,
        }
    }

    /// Children of a complex property, in schema declaration order.
    pub fn children(&self) -> &[Property] {
        match &self.node {
            Node::Complex(children) => children,
            _ => &[],
        }
    }

    /// Elements of a multi-valued property, in insertion order.
    pub fn elements(&self) -> &[Property] {
        match &self.node {
            Node::Multi(elements) => elements,
            _ => &[],
        }
    }

    pub fn element(&self, index: usize) -> Option<&Property> {
        self.elements().get(index)
    }

    pub fn element_mut(&mut self, index: usize) -> Option<&mut Property> {
        match &mut self.node {
            Node::Multi(elements) => elements.get_mut(index),
            _ => None,
        }
    }

    // ----- mutation -----

    /// Assign a value, replacing any existing state. `null` is equivalent
    /// to [`Property::delete`].
    pub fn set(&mut self, value: &Value) -> ScimResult<Vec<Change>> {
        if value.is_null() {
            return Ok(self.delete());
        }
        let old = self.raw();
        let mut changes = Vec::new();

        match (self.attr.multi_valued, self.attr.is_complex()) {
            (true, _) => {
                let items = value.as_array().ok_or_else(|| {
                    self.type_error("array", value)
                })?;
                self.node = Node::Multi(Vec::new());
                for item in items {
                    changes.extend(self.add_element(item)?);
                }
            }
            (false, true) => {
                let object = value.as_object().ok_or_else(|| {
                    self.type_error("object", value)
                })?;
                // Reset children, then assign the supplied sub-attributes.
                self.node = Node::Complex(
                    self.attr
                        .sub_attributes
                        .iter()
                        .map(|sub| Property::new(Arc::clone(sub)))
                        .collect(),
                );
                changes.extend(self.merge(object)?);
            }
            (false, false) => {
                let parsed = self.parse_simple(value)?;
                self.node = Node::Simple(parsed);
            }
        }

        let new = self.raw();
        if old != new {
            changes.push(self.change(ChangeKind::Assigned, old, new));
        }
        Ok(changes)
    }

    /// Assign only the supplied sub-attributes of a complex property,
    /// leaving the others untouched. Unknown keys are rejected.
    pub fn merge(&mut self, object: &Map<String, Value>) -> ScimResult<Vec<Change>> {
        if !self.attr.is_complex() || self.attr.multi_valued {
            return Err(ScimError::invalid_value(format!(
                "attribute {} does not accept an object merge",
                self.attr.path
            )));
        }
        let mut changes = Vec::new();
        for (key, item) in object {
            let child = self.child_mut(key).ok_or_else(|| {
                ScimError::invalid_syntax(format!("unknown attribute '{}'", key))
            })?;
            changes.extend(child.set(item)?);
        }
        Ok(changes)
    }

    /// Append an element to a multi-valued property. Returns the changes,
    /// including any primary demotion the new element caused.
    pub fn add_element(&mut self, value: &Value) -> ScimResult<Vec<Change>> {
        let elem_attr = self
            .attr
            .element_attribute()
            .cloned()
            .ok_or_else(|| {
                ScimError::invalid_value(format!(
                    "attribute {} is not multi-valued",
                    self.attr.path
                ))
            })?;
        let mut element = Property::new(elem_attr);
        let mut changes = element.set(value)?;

        let added = element.raw();
        let index = match &mut self.node {
            Node::Multi(elements) => {
                elements.push(element);
                elements.len() - 1
            }
            _ => {
                return Err(ScimError::invalid_value(format!(
                    "attribute {} is not multi-valued",
                    self.attr.path
                )));
            }
        };
        changes.push(self.change(ChangeKind::ElementAdded, Value::Null, added));
        changes.extend(self.enforce_primary(index));
        Ok(changes)
    }

    /// Append an unassigned element and return its index.
    pub fn new_element(&mut self) -> ScimResult<usize> {
        let elem_attr = self
            .attr
            .element_attribute()
            .cloned()
            .ok_or_else(|| {
                ScimError::invalid_value(format!(
                    "attribute {} is not multi-valued",
                    self.attr.path
                ))
            })?;
        match &mut self.node {
            Node::Multi(elements) => {
                elements.push(Property::new(elem_attr));
                Ok(elements.len() - 1)
            }
            _ => Err(ScimError::invalid_value(format!(
                "attribute {} is not multi-valued",
                self.attr.path
            ))),
        }
    }

    /// Remove elements selected by the predicate; returns one
    /// `ElementRemoved` change per removed element.
    pub fn retain_elements<F>(&mut self, mut keep: F) -> Vec<Change>
    where
        F: FnMut(&Property) -> bool,
    {
        let attr = Arc::clone(&self.attr);
        let mut changes = Vec::new();
        if let Node::Multi(elements) = &mut self.node {
            let mut index = 0;
            while index < elements.len() {
                if keep(&elements[index]) {
                    index += 1;
                } else {
                    let removed = elements.remove(index);
                    changes.push(PropertyEvent {
                        kind: ChangeKind::ElementRemoved,
                        attribute_id: attr.id.clone(),
                        path: attr.path.clone(),
                        old: removed.raw(),
                        new: Value::Null,
                    });
                }
            }
        }
        changes
    }

    /// Unassign this property.
    pub fn delete(&mut self) -> Vec<Change> {
        if self.is_unassigned() {
            return Vec::new();
        }
        let old = self.raw();
        self.node = match (self.attr.multi_valued, self.attr.is_complex()) {
            (true, _) => Node::Multi(Vec::new()),
            (false, true) => Node::Complex(
                self.attr
                    .sub_attributes
                    .iter()
                    .map(|sub| Property::new(Arc::clone(sub)))
                    .collect(),
            ),
            (false, false) => Node::Unassigned,
        };
        vec![self.change(ChangeKind::Unassigned, old, Value::Null)]
    }

    /// After the element at `keep` was assigned or modified, demote any
    /// other element whose boolean `primary` sub-attribute is true.
    ///
    /// At most one element of a multi-valued complex may be primary; the
    /// most recently assigned primary wins.
    pub fn enforce_primary(&mut self, keep: usize) -> Vec<Change> {
        let keep_is_primary = self
            .element(keep)
            .and_then(|e| e.child("primary"))
            .and_then(|p| p.simple_value())
            .is_some_and(|v| matches!(v, SimpleValue::Bool(true)));
        if !keep_is_primary {
            return Vec::new();
        }

        let mut changes = Vec::new();
        if let Node::Multi(elements) = &mut self.node {
            for (index, element) in elements.iter_mut().enumerate() {
                if index == keep {
                    continue;
                }
                let was_primary = element
                    .child("primary")
                    .and_then(|p| p.simple_value())
                    .is_some_and(|v| matches!(v, SimpleValue::Bool(true)));
                if was_primary {
                    if let Some(primary) = element.child_mut("primary") {
                        primary.node = Node::Simple(SimpleValue::Bool(false));
                        changes.push(PropertyEvent {
                            kind: ChangeKind::PrimaryDemoted,
                            attribute_id: primary.attr.id.clone(),
                            path: primary.attr.path.clone(),
                            old: Value::Bool(true),
                            new: Value::Bool(false),
                        });
                    }
                }
            }
        }
        changes
    }

    fn parse_simple(&self, value: &Value) -> ScimResult<SimpleValue> {
        let expected = self.attr.data_type;
        match expected {
            AttributeType::String => match value {
                Value::String(s) => Ok(SimpleValue::Str(s.clone())),
                other => Err(self.type_error("string", other)),
            },
            AttributeType::Boolean => match value {
                Value::Bool(b) => Ok(SimpleValue::Bool(*b)),
                other => Err(self.type_error("boolean", other)),
            },
            AttributeType::Integer => match value.as_i64() {
                Some(i) => Ok(SimpleValue::Integer(i)),
                None => Err(self.type_error("integer", value)),
            },
            AttributeType::Decimal => match value {
                Value::Number(n) => Ok(SimpleValue::Decimal(n.clone())),
                other => Err(self.type_error("decimal", other)),
            },
            AttributeType::DateTime => match value {
                Value::String(s) => {
                    let parsed = DateTime::parse_from_rfc3339(s).map_err(|_| {
                        ScimError::invalid_value(format!(
                            "attribute {} expects an RFC 3339 dateTime, got '{}'",
                            self.attr.path, s
                        ))
                    })?;
                    Ok(SimpleValue::DateTime(parsed.with_timezone(&Utc)))
                }
                other => Err(self.type_error("dateTime", other)),
            },
            AttributeType::Binary => match value {
                Value::String(s) => {
                    BASE64.decode(s).map_err(|_| {
                        ScimError::invalid_value(format!(
                            "attribute {} expects base64 binary data",
                            self.attr.path
                        ))
                    })?;
                    Ok(SimpleValue::Binary(s.clone()))
                }
                other => Err(self.type_error("binary", other)),
            },
            AttributeType::Reference => match value {
                Value::String(s) => Ok(SimpleValue::Reference(s.clone())),
                other => Err(self.type_error("reference", other)),
            },
            AttributeType::Complex => Err(self.type_error("object", value)),
        }
    }

    fn type_error(&self, expected: &str, actual: &Value) -> ScimError {
        ScimError::invalid_value(format!(
            "attribute {} expects {}, got {}",
            self.attr.path,
            expected,
            value_type_name(actual)
        ))
    }

    fn change(&self, kind: ChangeKind, old: Value, new: Value) -> Change {
        PropertyEvent {
            kind,
            attribute_id: self.attr.id.clone(),
            path: self.attr.path.clone(),
            old,
            new,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistry;
    use serde_json::json;

    fn user_root() -> Property {
        let registry = SchemaRegistry::with_embedded().unwrap();
        let user = registry.resource_type("User").unwrap();
        Property::new(Arc::clone(user.super_attribute()))
    }

    #[test]
    fn test_simple_assign_and_raw() {
        let mut root = user_root();
        let changes = root
            .child_mut("userName")
            .unwrap()
            .set(&json!("alice"))
            .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Assigned);
        assert_eq!(root.child("userName").unwrap().raw(), json!("alice"));
    }

    #[test]
    fn test_strict_type_coercion() {
        let mut root = user_root();
        let err = root
            .child_mut("userName")
            .unwrap()
            .set(&json!(42))
            .unwrap_err();
        assert!(err.to_string().contains("expects string"));

        let err = root
            .child_mut("active")
            .unwrap()
            .set(&json!("true"))
            .unwrap_err();
        assert!(err.to_string().contains("expects boolean"));
    }

    #[test]
    fn test_complex_assign_rejects_unknown_keys() {
        let mut root = user_root();
        let err = root
            .child_mut("name")
            .unwrap()
            .set(&json!({"familyName": "Doe", "shoeSize": 42}))
            .unwrap_err();
        assert!(err.to_string().contains("shoeSize"));
    }

    #[test]
    fn test_multi_valued_accepts_arrays_only() {
        let mut root = user_root();
        let err = root
            .child_mut("emails")
            .unwrap()
            .set(&json!({"value": "a@b.c"}))
            .unwrap_err();
        assert!(err.to_string().contains("expects array"));
    }

    #[test]
    fn test_unassigned_semantics() {
        let mut root = user_root();
        assert!(root.child("name").unwrap().is_unassigned());
        root.child_mut("name")
            .unwrap()
            .set(&json!({"familyName": "Doe"}))
            .unwrap();
        assert!(!root.child("name").unwrap().is_unassigned());

        let changes = root.child_mut("name").unwrap().delete();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Unassigned);
        assert!(root.child("name").unwrap().is_unassigned());
        assert!(root.child("name").unwrap().raw().is_null());
    }

    #[test]
    fn test_primary_auto_demotion() {
        let mut root = user_root();
        let emails = root.child_mut("emails").unwrap();
        emails
            .set(&json!([
                {"value": "a@example.com", "type": "work", "primary": true},
                {"value": "b@example.com", "type": "home", "primary": true}
            ]))
            .unwrap();

        let primaries: Vec<bool> = emails
            .elements()
            .iter()
            .map(|e| e.child("primary").unwrap().raw() == json!(true))
            .collect();
        assert_eq!(primaries, vec![false, true]);
    }

    #[test]
    fn test_datetime_parsing() {
        let mut root = user_root();
        let meta = root.child_mut("meta").unwrap();
        meta.child_mut("created")
            .unwrap()
            .set(&json!("2023-04-01T12:00:00Z"))
            .unwrap();
        let raw = meta.child("created").unwrap().raw();
        assert_eq!(raw, json!("2023-04-01T12:00:00.000Z"));

        let err = meta
            .child_mut("lastModified")
            .unwrap()
            .set(&json!("yesterday"))
            .unwrap_err();
        assert!(err.to_string().contains("RFC 3339"));
    }

    #[test]
    fn test_retain_elements() {
        let mut root = user_root();
        let emails = root.child_mut("emails").unwrap();
        emails
            .set(&json!([
                {"value": "a@example.com", "type": "work"},
                {"value": "b@example.com", "type": "home"}
            ]))
            .unwrap();
        let changes = emails.retain_elements(|e| {
            e.child("type").is_some_and(|t| t.raw() == json!("work"))
        });
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::ElementRemoved);
        assert_eq!(emails.elements().len(), 1);
    }
}
