//! Equality, ordering, and hashing semantics for properties.
//!
//! String comparisons honor the attribute's `caseExact` flag. Complex
//! properties match on their `@Identity` sub-attributes when any are
//! declared, falling back to full equality otherwise; attributes annotated
//! `@IgnoreMatch` are excluded from both matching and hashing, which keeps
//! the derived resource version independent of `meta`.

use std::cmp::Ordering;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{Node, Property, SimpleValue};
use crate::error::{ScimError, ScimResult};
use crate::schema::SchemaRegistry;

/// String match mode for the `co`, `sw` and `ew` operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringMatch {
    Contains,
    StartsWith,
    EndsWith,
}

impl Property {
    /// Typed equality against a JSON literal.
    ///
    /// A `null` literal matches an unassigned property. A multi-valued
    /// property equals the literal when any element does; a complex
    /// property delegates to its `value` sub-attribute, per RFC 7644.
    pub fn equals_literal(&self, literal: &Value) -> bool {
        if literal.is_null() {
            return self.is_unassigned();
        }
        match &self.node {
            Node::Unassigned => false,
            Node::Simple(value) => self.simple_equals(value, literal),
            Node::Complex(_) => self
                .child("value")
                .is_some_and(|value| value.equals_literal(literal)),
            Node::Multi(elements) => {
                elements.iter().any(|element| element.equals_literal(literal))
            }
        }
    }

    fn simple_equals(&self, value: &SimpleValue, literal: &Value) -> bool {
        match (value, literal) {
            (SimpleValue::Str(s), Value::String(l)) => self.attr.string_eq(s, l),
            (SimpleValue::Reference(s), Value::String(l))
            | (SimpleValue::Binary(s), Value::String(l)) => self.attr.string_eq(s, l),
            (SimpleValue::Bool(b), Value::Bool(l)) => b == l,
            (SimpleValue::Integer(i), Value::Number(n)) => n.as_i64() == Some(*i),
            (SimpleValue::Decimal(d), Value::Number(n)) => {
                d.as_f64().zip(n.as_f64()).is_some_and(|(a, b)| a == b)
            }
            (SimpleValue::DateTime(dt), Value::String(l)) => {
                DateTime::parse_from_rfc3339(l)
                    .map(|parsed| parsed.with_timezone(&Utc) == *dt)
                    .unwrap_or(false)
            }
            _ => false,
        }
    }

    /// Ordering against a JSON literal, for `gt`/`ge`/`lt`/`le`. Defined on
    /// numbers, strings (lexicographic) and dateTimes; anything else is an
    /// `invalidFilter` error.
    pub fn compare_literal(&self, literal: &Value) -> ScimResult<Option<Ordering>> {
        let value = match &self.node {
            Node::Simple(value) => value,
            Node::Multi(elements) => {
                // An ordering comparison on a multi-valued path holds when
                // any element satisfies it; the caller inspects each
                // element, so here we surface the first comparable one.
                for element in elements {
                    if let Some(ordering) = element.compare_literal(literal)? {
                        return Ok(Some(ordering));
                    }
                }
                return Ok(None);
            }
            Node::Complex(_) => {
                return match self.child("value") {
                    Some(value) => value.compare_literal(literal),
                    None => Ok(None),
                };
            }
            Node::Unassigned => return Ok(None),
        };

        let ordering = match (value, literal) {
            (SimpleValue::Integer(i), Value::Number(n)) => {
                let rhs = n.as_f64().ok_or_else(|| {
                    ScimError::invalid_filter("numeric literal out of range")
                })?;
                (*i as f64).partial_cmp(&rhs)
            }
            (SimpleValue::Decimal(d), Value::Number(n)) => {
                d.as_f64().zip(n.as_f64()).and_then(|(a, b)| a.partial_cmp(&b))
            }
            (SimpleValue::Str(s), Value::String(l)) => {
                if self.attr.case_exact {
                    Some(s.as_str().cmp(l.as_str()))
                } else {
                    Some(s.to_lowercase().cmp(&l.to_lowercase()))
                }
            }
            (SimpleValue::DateTime(dt), Value::String(l)) => {
                let rhs = DateTime::parse_from_rfc3339(l)
                    .map_err(|_| {
                        ScimError::invalid_filter(format!(
                            "cannot compare dateTime {} against '{}'",
                            self.attr.path, l
                        ))
                    })?
                    .with_timezone(&Utc);
                Some(dt.cmp(&rhs))
            }
            _ => {
                return Err(ScimError::invalid_filter(format!(
                    "ordering comparison is not defined for attribute {}",
                    self.attr.path
                )));
            }
        };
        Ok(ordering)
    }

    /// Substring matching for `co`/`sw`/`ew`. String attributes only.
    pub fn string_match(&self, mode: StringMatch, literal: &str) -> ScimResult<bool> {
        match &self.node {
            Node::Unassigned => Ok(false),
            Node::Simple(SimpleValue::Str(s)) | Node::Simple(SimpleValue::Reference(s)) => {
                let (haystack, needle) = if self.attr.case_exact {
                    (s.clone(), literal.to_string())
                } else {
                    (s.to_lowercase(), literal.to_lowercase())
                };
                Ok(match mode {
                    StringMatch::Contains => haystack.contains(&needle),
                    StringMatch::StartsWith => haystack.starts_with(&needle),
                    StringMatch::EndsWith => haystack.ends_with(&needle),
                })
            }
            Node::Multi(elements) => {
                for element in elements {
                    if element.string_match(mode, literal)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Node::Complex(_) => match self.child("value") {
                Some(value) => value.string_match(mode, literal),
                None => Ok(false),
            },
            _ => Err(ScimError::invalid_filter(format!(
                "substring matching is not defined for attribute {}",
                self.attr.path
            ))),
        }
    }

    /// Structural matching between two properties of the same attribute.
    pub fn matches(&self, other: &Property, registry: &SchemaRegistry) -> bool {
        if self.attr.id != other.attr.id {
            return false;
        }
        if self.is_unassigned() || other.is_unassigned() {
            return self.is_unassigned() && other.is_unassigned();
        }
        match (&self.node, &other.node) {
            (Node::Simple(a), Node::Simple(_)) => self.simple_equals(a, &other.raw()),
            (Node::Complex(_), Node::Complex(_)) => {
                let identity: Vec<&str> = self
                    .attr
                    .sub_attributes
                    .iter()
                    .filter(|sub| registry.has_annotation(&sub.id, "@Identity"))
                    .map(|sub| sub.name.as_str())
                    .collect();
                let names: Vec<&str> = if identity.is_empty() {
                    self.attr
                        .sub_attributes
                        .iter()
                        .filter(|sub| !registry.has_annotation(&sub.id, "@IgnoreMatch"))
                        .map(|sub| sub.name.as_str())
                        .collect()
                } else {
                    identity
                };
                names.iter().all(|name| {
                    match (self.child(name), other.child(name)) {
                        (Some(a), Some(b)) => a.matches(b, registry),
                        _ => false,
                    }
                })
            }
            (Node::Multi(a), Node::Multi(b)) => {
                if a.len() != b.len() {
                    return false;
                }
                let mut used = vec![false; b.len()];
                a.iter().all(|element| {
                    b.iter().enumerate().any(|(index, candidate)| {
                        if used[index] || !element.matches(candidate, registry) {
                            false
                        } else {
                            used[index] = true;
                            true
                        }
                    })
                })
            }
            _ => false,
        }
    }

    /// Digest of this subtree, excluding `@IgnoreMatch` attributes and
    /// unassigned properties. Case-insensitive strings hash their lowercase
    /// form so the hash agrees with [`Property::matches`].
    pub fn hash(&self, registry: &SchemaRegistry) -> String {
        let mut hasher = Sha256::new();
        self.hash_into(registry, &mut hasher);
        let digest = hasher.finalize();
        BASE64.encode(&digest[..8])
    }

    fn hash_into(&self, registry: &SchemaRegistry, hasher: &mut Sha256) {
        if registry.has_annotation(&self.attr.id, "@IgnoreMatch") || self.is_unassigned() {
            return;
        }
        hasher.update(self.attr.id.as_bytes());
        hasher.update([0u8]);
        match &self.node {
            Node::Unassigned => {}
            Node::Simple(value) => match value {
                SimpleValue::Str(s) => {
                    if self.attr.case_exact {
                        hasher.update(s.as_bytes());
                    } else {
                        hasher.update(s.to_lowercase().as_bytes());
                    }
                }
                SimpleValue::Reference(s) | SimpleValue::Binary(s) => {
                    hasher.update(s.as_bytes());
                }
                SimpleValue::Bool(b) => hasher.update([u8::from(*b)]),
                SimpleValue::Integer(i) => hasher.update(i.to_le_bytes()),
                SimpleValue::Decimal(d) => {
                    hasher.update(d.as_f64().unwrap_or(0.0).to_le_bytes());
                }
                SimpleValue::DateTime(dt) => {
                    hasher.update(dt.timestamp_millis().to_le_bytes());
                }
            },
            Node::Complex(children) => {
                for child in children {
                    child.hash_into(registry, hasher);
                }
            }
            Node::Multi(elements) => {
                hasher.update((elements.len() as u64).to_le_bytes());
                for element in elements {
                    element.hash_into(registry, hasher);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::Property;
    use crate::schema::SchemaRegistry;
    use serde_json::json;
    use std::sync::Arc;

    fn populated_root(registry: &SchemaRegistry, body: serde_json::Value) -> Property {
        let user = registry.resource_type("User").unwrap();
        let mut root = Property::new(Arc::clone(user.super_attribute()));
        root.merge(body.as_object().unwrap()).unwrap();
        root
    }

    #[test]
    fn test_equals_literal_case_insensitive() {
        let registry = SchemaRegistry::with_embedded().unwrap();
        let root = populated_root(&registry, json!({"userName": "Alice"}));
        let user_name = root.child("userName").unwrap();
        assert!(user_name.equals_literal(&json!("alice")));
        assert!(!user_name.equals_literal(&json!("bob")));
    }

    #[test]
    fn test_multi_valued_equals_any_element() {
        let registry = SchemaRegistry::with_embedded().unwrap();
        let root = populated_root(
            &registry,
            json!({"emails": [{"value": "a@x.com"}, {"value": "b@x.com"}]}),
        );
        let emails = root.child("emails").unwrap();
        // Elements are complex, so equality delegates to their `value`
        // sub-attribute; the container matches when any element does.
        assert!(emails.equals_literal(&json!("A@X.COM")));
        assert!(emails.equals_literal(&json!("b@x.com")));
        assert!(!emails.equals_literal(&json!("missing@x.com")));
    }

    #[test]
    fn test_ordering_on_strings_and_datetimes() {
        let registry = SchemaRegistry::with_embedded().unwrap();
        let root = populated_root(&registry, json!({"userName": "carol"}));
        let user_name = root.child("userName").unwrap();
        assert_eq!(
            user_name.compare_literal(&json!("bob")).unwrap(),
            Some(Ordering::Greater)
        );

        let active = root.child("active").unwrap();
        assert!(active.compare_literal(&json!(true)).is_err());
    }

    #[test]
    fn test_matches_uses_identity_sub_attributes() {
        let registry = SchemaRegistry::with_embedded().unwrap();
        let left = populated_root(
            &registry,
            json!({"emails": [{"value": "a@x.com", "type": "work", "display": "A"}]}),
        );
        let right = populated_root(
            &registry,
            json!({"emails": [{"value": "a@x.com", "type": "work", "display": "different"}]}),
        );
        let a = left.child("emails").unwrap();
        let b = right.child("emails").unwrap();
        // display differs but value/type are the identity sub-attributes
        assert!(a.matches(b, &registry));
    }

    #[test]
    fn test_hash_ignores_meta_and_is_stable() {
        let registry = SchemaRegistry::with_embedded().unwrap();
        let one = populated_root(&registry, json!({"userName": "alice"}));
        let two = populated_root(
            &registry,
            json!({
                "userName": "alice",
                "meta": {"resourceType": "User", "created": "2023-01-01T00:00:00Z"}
            }),
        );
        assert_eq!(one.hash(&registry), two.hash(&registry));

        let three = populated_root(&registry, json!({"userName": "bob"}));
        assert_ne!(one.hash(&registry), three.hash(&registry));
    }
}
