//! In-memory filter evaluation against the property tree.
//!
//! Evaluation is recursive and pure; no suspension. A filter on a
//! multi-valued path such as `a[f].v` holds when there exists an element of
//! `a` satisfying `f` for which `v` satisfies the comparison.

use crate::error::{ScimError, ScimResult};
use crate::property::Property;
use crate::property::matching::StringMatch;
use crate::resource::Resource;
use crate::schema::Attribute;

use super::ast::{AttrPath, CompareOp, Filter, PathStep};

/// How a compiled path enters the tree relative to the resource root.
pub(crate) enum PathEntry<'a> {
    /// Descend the steps directly from the root.
    Root(&'a [PathStep]),
    /// Descend into the named extension container first, then the steps.
    Container(String, &'a [PathStep]),
}

/// Resolve the URN qualifier of a path against a resource type's root
/// attribute.
///
/// The path compiler splits URN-qualified paths at the last colon, so a
/// bare extension URN loses its final segment into the first step; this is
/// where it is re-joined against the declared extension containers.
pub(crate) fn resolve_entry<'a>(
    path: &'a AttrPath,
    core_urn: &str,
    root_attr: &Attribute,
) -> ScimResult<PathEntry<'a>> {
    let Some(urn) = &path.schema_urn else {
        return Ok(PathEntry::Root(&path.steps));
    };
    if urn.eq_ignore_ascii_case(core_urn) {
        return Ok(PathEntry::Root(&path.steps));
    }
    if root_attr.sub_attribute(urn).is_some() {
        return Ok(PathEntry::Container(urn.clone(), &path.steps));
    }
    if let Some(first) = path.steps.first() {
        let joined = format!("{}:{}", urn, first.name);
        if joined.eq_ignore_ascii_case(core_urn) {
            return Ok(PathEntry::Root(&path.steps[1..]));
        }
        if root_attr.sub_attribute(&joined).is_some() {
            return Ok(PathEntry::Container(joined, &path.steps[1..]));
        }
    }
    Err(ScimError::invalid_path(format!(
        "schema '{}' is not declared by this resource type",
        urn
    )))
}

/// Evaluate a filter against a resource.
pub fn evaluate(resource: &Resource, filter: &Filter) -> ScimResult<bool> {
    eval_at(resource.root(), filter, Some(&resource.resource_type().schema))
}

/// Evaluate a filter against an arbitrary property, e.g. one element of a
/// multi-valued attribute. Paths must be relative (no URN qualifier).
pub fn evaluate_property(property: &Property, filter: &Filter) -> ScimResult<bool> {
    eval_at(property, filter, None)
}

/// Collect the properties a compiled path selects on a resource.
pub fn select<'a>(resource: &'a Resource, path: &AttrPath) -> ScimResult<Vec<&'a Property>> {
    resolve(resource.root(), path, Some(&resource.resource_type().schema))
}

fn eval_at(node: &Property, filter: &Filter, core_urn: Option<&str>) -> ScimResult<bool> {
    match filter {
        Filter::And(left, right) => {
            Ok(eval_at(node, left, core_urn)? && eval_at(node, right, core_urn)?)
        }
        Filter::Or(left, right) => {
            Ok(eval_at(node, left, core_urn)? || eval_at(node, right, core_urn)?)
        }
        Filter::Not(inner) => Ok(!eval_at(node, inner, core_urn)?),
        Filter::Compare { path, op, value } => {
            for candidate in resolve(node, path, core_urn)? {
                if compare(candidate, *op, value)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Filter::Present(path) => {
            for candidate in resolve(node, path, core_urn)? {
                if candidate.present() {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

/// Collect the properties a path selects from `node`. Multi-valued steps
/// fan out over their (optionally filtered) elements.
fn resolve<'a>(
    node: &'a Property,
    path: &AttrPath,
    core_urn: Option<&str>,
) -> ScimResult<Vec<&'a Property>> {
    let (start, steps): (&Property, &[PathStep]) = match core_urn {
        Some(core) => match resolve_entry(path, core, node.attribute())? {
            PathEntry::Root(steps) => (node, steps),
            PathEntry::Container(name, steps) => match node.child(&name) {
                Some(container) => (container, steps),
                None => return Ok(Vec::new()),
            },
        },
        None => {
            if path.schema_urn.is_some() {
                return Err(ScimError::invalid_filter(
                    "URN-qualified paths are not allowed inside value filters",
                ));
            }
            (node, &path.steps)
        }
    };

    let mut current = vec![start];
    for step in steps {
        let mut next = Vec::new();
        for prop in current {
            if !prop.attribute().is_complex() {
                return Err(ScimError::invalid_filter(format!(
                    "cannot descend into non-complex attribute '{}'",
                    prop.attribute().path
                )));
            }
            if prop.attribute().sub_attribute(&step.name).is_none() {
                return Err(ScimError::invalid_filter(format!(
                    "no attribute named '{}' under '{}'",
                    step.name,
                    if prop.attribute().path.is_empty() {
                        prop.attribute().name.as_str()
                    } else {
                        prop.attribute().path.as_str()
                    }
                )));
            }
            let Some(target) = prop.child(&step.name) else {
                continue;
            };
            if target.attribute().multi_valued {
                for element in target.elements() {
                    match &step.filter {
                        Some(filter) => {
                            if eval_at(element, filter, None)? {
                                next.push(element);
                            }
                        }
                        None => next.push(element),
                    }
                }
            } else {
                match &step.filter {
                    Some(filter) => {
                        if eval_at(target, filter, None)? {
                            next.push(target);
                        }
                    }
                    None => next.push(target),
                }
            }
        }
        current = next;
    }
    Ok(current)
}

fn compare(candidate: &Property, op: CompareOp, value: &serde_json::Value) -> ScimResult<bool> {
    match op {
        CompareOp::Eq => Ok(candidate.equals_literal(value)),
        CompareOp::Ne => Ok(!candidate.equals_literal(value)),
        CompareOp::Co | CompareOp::Sw | CompareOp::Ew => {
            let literal = value.as_str().ok_or_else(|| {
                ScimError::invalid_filter(format!(
                    "'{}' requires a string literal",
                    op.keyword()
                ))
            })?;
            let mode = match op {
                CompareOp::Co => StringMatch::Contains,
                CompareOp::Sw => StringMatch::StartsWith,
                _ => StringMatch::EndsWith,
            };
            candidate.string_match(mode, literal)
        }
        CompareOp::Gt | CompareOp::Ge | CompareOp::Lt | CompareOp::Le => {
            let Some(ordering) = candidate.compare_literal(value)? else {
                return Ok(false);
            };
            Ok(match op {
                CompareOp::Gt => ordering.is_gt(),
                CompareOp::Ge => ordering.is_ge(),
                CompareOp::Lt => ordering.is_lt(),
                _ => ordering.is_le(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::compile_filter;
    use crate::schema::SchemaRegistry;
    use serde_json::json;
    use std::sync::Arc;

    fn user_with(body: serde_json::Value) -> Resource {
        let registry = Arc::new(SchemaRegistry::with_embedded().unwrap());
        let resource_type = Arc::clone(registry.resource_type("User").unwrap());
        let mut resource = Resource::new(registry, resource_type);
        let changes = resource
            .root_mut()
            .merge(body.as_object().unwrap())
            .unwrap();
        resource.record(changes);
        resource
    }

    fn eval(resource: &Resource, filter: &str) -> bool {
        evaluate(resource, &compile_filter(filter).unwrap()).unwrap()
    }

    #[test]
    fn test_equality_and_case_sensitivity() {
        let user = user_with(json!({"userName": "Alice", "active": true}));
        assert!(eval(&user, r#"userName eq "alice""#));
        assert!(eval(&user, "active eq true"));
        assert!(!eval(&user, r#"userName eq "bob""#));
    }

    #[test]
    fn test_presence() {
        let user = user_with(json!({"userName": "alice"}));
        assert!(eval(&user, "userName pr"));
        assert!(!eval(&user, "name pr"));
        assert!(!eval(&user, "emails pr"));
    }

    #[test]
    fn test_multi_valued_sub_filter() {
        let user = user_with(json!({
            "userName": "alice",
            "emails": [
                {"type": "work", "value": "a@example.com"},
                {"type": "home", "value": "b@foo.com"}
            ]
        }));
        assert!(eval(&user, r#"emails[type eq "work"].value co "example.com""#));
        assert!(!eval(&user, r#"emails[type eq "fax"].value co "example.com""#));

        let without_work = user_with(json!({
            "userName": "alice",
            "emails": [{"type": "home", "value": "b@foo.com"}]
        }));
        assert!(!eval(
            &without_work,
            r#"emails[type eq "work"].value co "example.com""#
        ));
    }

    #[test]
    fn test_logical_operators() {
        let user = user_with(json!({"userName": "alice", "active": false}));
        assert!(eval(&user, r#"userName sw "al" and active eq false"#));
        assert!(eval(&user, r#"userName eq "bob" or active eq false"#));
        assert!(eval(&user, "not (active eq true)"));
    }

    #[test]
    fn test_ordering_on_datetime() {
        let user = user_with(json!({
            "userName": "alice",
            "meta": {"lastModified": "2024-06-01T00:00:00Z"}
        }));
        assert!(eval(&user, r#"meta.lastModified gt "2024-01-01T00:00:00Z""#));
        assert!(!eval(&user, r#"meta.lastModified lt "2024-01-01T00:00:00Z""#));
    }

    #[test]
    fn test_unknown_attribute_is_invalid_filter() {
        let user = user_with(json!({"userName": "alice"}));
        let filter = compile_filter(r#"shoeSize eq 42"#).unwrap();
        let err = evaluate(&user, &filter).unwrap_err();
        assert!(matches!(err, ScimError::InvalidFilter(_)));
    }

    #[test]
    fn test_extension_urn_path() {
        let user = user_with(json!({
            "userName": "alice",
            "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User": {
                "employeeNumber": "E-1234"
            }
        }));
        assert!(eval(
            &user,
            r#"urn:ietf:params:scim:schemas:extension:enterprise:2.0:User:employeeNumber eq "E-1234""#
        ));
    }

    #[test]
    fn test_string_only_operators_reject_numbers() {
        let user = user_with(json!({"userName": "alice"}));
        let filter = compile_filter("userName co 42").unwrap();
        assert!(evaluate(&user, &filter).is_err());
    }
}
