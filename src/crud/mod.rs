//! Add/Replace/Remove primitives over compiled attribute paths.
//!
//! These operations back both RFC 7644 PATCH handling and server-internal
//! mutation. Traversal is lazy: intermediate complex properties exist
//! eagerly in the tree, so missing containers are effectively auto-created;
//! an intermediate multi-valued step without a value filter is an error.
//! Every leaf change is recorded on the resource's event log.

pub mod params;

use serde_json::Value;

pub use params::{Pagination, Projection, Sort, SortOrder};

use crate::error::{ScimError, ScimResult};
use crate::expr::ast::{AttrPath, PathStep};
use crate::expr::eval::{PathEntry, evaluate_property, resolve_entry, select};
use crate::property::{Change, Property};
use crate::resource::Resource;

#[derive(Clone, Copy)]
enum Op<'v> {
    Add(&'v Value),
    Replace(&'v Value),
    Remove,
}

/// Add a value at the path: single-valued targets are assigned, complex
/// targets merge the supplied sub-attributes, multi-valued targets append
/// (element-wise when the value is an array).
pub fn add(resource: &mut Resource, path: &AttrPath, value: &Value) -> ScimResult<()> {
    mutate(resource, path, Op::Add(value))?;
    Ok(())
}

/// Replace the value at the path. A complex target with an object value
/// merges sub-attributes; anything else is overwritten. Fails with
/// `noTarget` when a value filter matched no element.
pub fn replace(resource: &mut Resource, path: &AttrPath, value: &Value) -> ScimResult<()> {
    let touched = mutate(resource, path, Op::Replace(value))?;
    if touched == 0 {
        return Err(ScimError::no_target(format!(
            "path '{}' matched no value to replace",
            path
        )));
    }
    Ok(())
}

/// Remove the value at the path; with a trailing value filter, remove the
/// matching elements. Fails with `noTarget` when nothing was removed.
pub fn remove(resource: &mut Resource, path: &AttrPath) -> ScimResult<()> {
    let touched = mutate(resource, path, Op::Remove)?;
    if touched == 0 {
        return Err(ScimError::no_target(format!(
            "path '{}' matched no value to remove",
            path
        )));
    }
    Ok(())
}

/// Read the first property the path selects, if any.
pub fn get<'a>(resource: &'a Resource, path: &AttrPath) -> ScimResult<Option<&'a Property>> {
    Ok(select(resource, path)?.into_iter().next())
}

fn mutate(resource: &mut Resource, path: &AttrPath, op: Op<'_>) -> ScimResult<usize> {
    let core_urn = resource.resource_type().schema.clone();
    let root_attr = std::sync::Arc::clone(resource.resource_type().super_attribute());
    let entry = resolve_entry(path, &core_urn, &root_attr)
        .map_err(|err| match err {
            ScimError::InvalidFilter(d) => ScimError::InvalidPath(d),
            other => other,
        })?;

    let mut changes = Vec::new();
    let mut touched = 0usize;
    {
        let root = resource.root_mut();
        let (start, steps): (&mut Property, &[PathStep]) = match entry {
            PathEntry::Root(steps) => (root, steps),
            PathEntry::Container(name, steps) => {
                let container = root.child_mut(&name).ok_or_else(|| {
                    ScimError::invalid_path(format!("no extension container '{}'", name))
                })?;
                (container, steps)
            }
        };
        apply(start, steps, op, &mut changes, &mut touched)?;
    }
    resource.record(changes);
    Ok(touched)
}

fn apply(
    prop: &mut Property,
    steps: &[PathStep],
    op: Op<'_>,
    changes: &mut Vec<Change>,
    touched: &mut usize,
) -> ScimResult<()> {
    let Some((step, rest)) = steps.split_first() else {
        return apply_terminal(prop, op, changes, touched);
    };

    if !prop.attribute().is_complex() {
        return Err(ScimError::invalid_path(format!(
            "cannot descend into non-complex attribute '{}'",
            prop.attribute().path
        )));
    }
    if prop.attribute().sub_attribute(&step.name).is_none() {
        return Err(ScimError::invalid_path(format!(
            "no attribute named '{}' under '{}'",
            step.name,
            prop.attribute().name
        )));
    }
    let target = prop
        .child_mut(&step.name)
        .ok_or_else(|| ScimError::invalid_path(format!("no attribute '{}'", step.name)))?;

    if target.attribute().multi_valued {
        match &step.filter {
            Some(filter) => {
                if rest.is_empty() && matches!(op, Op::Remove) {
                    let mut removed = target.retain_elements(|element| {
                        !evaluate_property(element, filter).unwrap_or(false)
                    });
                    *touched += removed.len();
                    changes.append(&mut removed);
                    return Ok(());
                }
                let matching: Vec<usize> = {
                    let mut indices = Vec::new();
                    for (index, element) in target.elements().iter().enumerate() {
                        if evaluate_property(element, filter)? {
                            indices.push(index);
                        }
                    }
                    indices
                };
                for index in matching {
                    if let Some(element) = target.element_mut(index) {
                        apply(element, rest, op, changes, touched)?;
                    }
                    changes.extend(target.enforce_primary(index));
                }
                Ok(())
            }
            None => {
                if rest.is_empty() {
                    apply_terminal(target, op, changes, touched)
                } else {
                    Err(ScimError::invalid_path(format!(
                        "multi-valued attribute '{}' requires a value filter before '{}'",
                        step.name, rest[0].name
                    )))
                }
            }
        }
    } else {
        if let Some(filter) = &step.filter {
            if !evaluate_property(target, filter)? {
                return Ok(());
            }
        }
        apply(target, rest, op, changes, touched)
    }
}

fn apply_terminal(
    prop: &mut Property,
    op: Op<'_>,
    changes: &mut Vec<Change>,
    touched: &mut usize,
) -> ScimResult<()> {
    match op {
        Op::Add(value) => {
            if prop.attribute().multi_valued {
                match value {
                    Value::Array(items) => {
                        for item in items {
                            changes.extend(prop.add_element(item)?);
                            *touched += 1;
                        }
                    }
                    other => {
                        changes.extend(prop.add_element(other)?);
                        *touched += 1;
                    }
                }
            } else if prop.attribute().is_complex() {
                let object = value.as_object().ok_or_else(|| {
                    ScimError::invalid_value(format!(
                        "attribute {} expects an object",
                        prop.attribute().path
                    ))
                })?;
                changes.extend(prop.merge(object)?);
                *touched += 1;
            } else {
                changes.extend(prop.set(value)?);
                *touched += 1;
            }
            Ok(())
        }
        Op::Replace(value) => {
            if !prop.attribute().multi_valued && prop.attribute().is_complex() {
                if let Some(object) = value.as_object() {
                    changes.extend(prop.merge(object)?);
                    *touched += 1;
                    return Ok(());
                }
            }
            changes.extend(prop.set(value)?);
            *touched += 1;
            Ok(())
        }
        Op::Remove => {
            if !prop.is_unassigned() {
                changes.extend(prop.delete());
                *touched += 1;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::compile_path;
    use crate::schema::SchemaRegistry;
    use serde_json::json;
    use std::sync::Arc;

    fn user_with(body: serde_json::Value) -> Resource {
        let registry = Arc::new(SchemaRegistry::with_embedded().unwrap());
        let resource_type = Arc::clone(registry.resource_type("User").unwrap());
        let mut resource = Resource::new(registry, resource_type);
        let changes = resource.root_mut().merge(body.as_object().unwrap()).unwrap();
        resource.record(changes);
        resource
    }

    #[test]
    fn test_add_then_get_round_trip() {
        let mut user = user_with(json!({"userName": "alice"}));
        let path = compile_path("displayName").unwrap();
        add(&mut user, &path, &json!("Alice Liddell")).unwrap();
        let prop = get(&user, &path).unwrap().unwrap();
        assert_eq!(prop.raw(), json!("Alice Liddell"));
    }

    #[test]
    fn test_replace_auto_creates_intermediate_complex() {
        let mut user = user_with(json!({"userName": "alice"}));
        let path = compile_path("name.familyName").unwrap();
        replace(&mut user, &path, &json!("Doe")).unwrap();
        assert_eq!(user.raw_of("name"), json!({"familyName": "Doe"}));
    }

    #[test]
    fn test_add_appends_to_multi_valued() {
        let mut user = user_with(json!({
            "userName": "alice",
            "emails": [{"value": "a@example.com", "type": "work"}]
        }));
        let path = compile_path("emails").unwrap();
        add(&mut user, &path, &json!({"value": "b@example.com", "type": "home"})).unwrap();
        let emails = user.root().child("emails").unwrap();
        assert_eq!(emails.elements().len(), 2);
    }

    #[test]
    fn test_replace_through_value_filter() {
        let mut user = user_with(json!({
            "userName": "alice",
            "emails": [
                {"value": "a@example.com", "type": "work"},
                {"value": "b@example.com", "type": "home"}
            ]
        }));
        let path = compile_path(r#"emails[type eq "work"].value"#).unwrap();
        replace(&mut user, &path, &json!("new@example.com")).unwrap();
        let emails = user.root().child("emails").unwrap();
        assert_eq!(
            emails.elements()[0].child("value").unwrap().raw(),
            json!("new@example.com")
        );
        assert_eq!(
            emails.elements()[1].child("value").unwrap().raw(),
            json!("b@example.com")
        );
    }

    #[test]
    fn test_replace_unmatched_filter_is_no_target() {
        let mut user = user_with(json!({
            "userName": "alice",
            "emails": [{"value": "a@example.com", "type": "work"}]
        }));
        let path = compile_path(r#"emails[type eq "fax"].value"#).unwrap();
        let err = replace(&mut user, &path, &json!("x")).unwrap_err();
        assert!(matches!(err, ScimError::NoTarget(_)));
    }

    #[test]
    fn test_remove_filtered_elements() {
        let mut user = user_with(json!({
            "userName": "alice",
            "emails": [
                {"value": "a@example.com", "type": "work"},
                {"value": "b@example.com", "type": "home"}
            ]
        }));
        let path = compile_path(r#"emails[type eq "home"]"#).unwrap();
        remove(&mut user, &path).unwrap();
        let emails = user.root().child("emails").unwrap();
        assert_eq!(emails.elements().len(), 1);

        // Removing again finds nothing.
        let err = remove(&mut user, &path).unwrap_err();
        assert!(matches!(err, ScimError::NoTarget(_)));
    }

    #[test]
    fn test_remove_then_get_is_unassigned() {
        let mut user = user_with(json!({"userName": "alice", "title": "Dr"}));
        let path = compile_path("title").unwrap();
        remove(&mut user, &path).unwrap();
        let prop = get(&user, &path).unwrap().unwrap();
        assert!(prop.is_unassigned());
    }

    #[test]
    fn test_intermediate_multi_without_filter_is_error() {
        let mut user = user_with(json!({
            "userName": "alice",
            "emails": [{"value": "a@example.com"}]
        }));
        let path = compile_path("emails.value").unwrap();
        let err = replace(&mut user, &path, &json!("x")).unwrap_err();
        assert!(matches!(err, ScimError::InvalidPath(_)));
    }

    #[test]
    fn test_primary_demotion_through_patch() {
        let mut user = user_with(json!({
            "userName": "alice",
            "emails": [
                {"value": "a@example.com", "type": "work", "primary": true},
                {"value": "b@example.com", "type": "home"}
            ]
        }));
        let path = compile_path(r#"emails[type eq "home"].primary"#).unwrap();
        replace(&mut user, &path, &json!(true)).unwrap();
        let emails = user.root().child("emails").unwrap();
        let primaries: Vec<bool> = emails
            .elements()
            .iter()
            .map(|e| e.child("primary").unwrap().raw() == json!(true))
            .collect();
        assert_eq!(primaries, vec![false, true]);
    }

    #[test]
    fn test_replace_idempotency() {
        let mut user = user_with(json!({"userName": "alice"}));
        let path = compile_path("displayName").unwrap();
        replace(&mut user, &path, &json!("Alice")).unwrap();
        let version_once = user.compute_version();
        replace(&mut user, &path, &json!("Alice")).unwrap();
        assert_eq!(user.compute_version(), version_once);
    }
}
