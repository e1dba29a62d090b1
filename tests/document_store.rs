//! Document adapter behavior against an in-test store that interprets the
//! generated query documents. The key property: for any filter, the set of
//! resources the backend query returns equals the set the in-memory
//! evaluator accepts.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::harness;
use scim2::ScimResult;
use scim2::db::{Database, DocumentDatabase, DocumentDbOptions, DocumentStore};
use scim2::expr::{compile_filter, evaluate};
use scim2::json::deserialize;
use scim2::resource::RequestContext;
use serde_json::{Value, json};
use tokio::sync::Mutex;

/// Minimal interpreter for the operator vocabulary the adapter emits.
#[derive(Default)]
struct MemoryDocumentStore {
    documents: Mutex<Vec<Value>>,
    indexed_fields: Mutex<Vec<(String, bool)>>,
}

fn lookup<'a>(doc: &'a Value, field: &str) -> Vec<&'a Value> {
    let mut current = vec![doc];
    for segment in field.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(object) => {
                    if let Some(found) = object.get(segment) {
                        next.push(found);
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        if let Some(found) = item.get(segment) {
                            next.push(found);
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }
    current
}

fn doc_matches(doc: &Value, query: &Value) -> bool {
    let Some(object) = query.as_object() else {
        return false;
    };
    object.iter().all(|(key, condition)| match key.as_str() {
        "$and" => condition
            .as_array()
            .is_some_and(|parts| parts.iter().all(|part| doc_matches(doc, part))),
        "$or" => condition
            .as_array()
            .is_some_and(|parts| parts.iter().any(|part| doc_matches(doc, part))),
        "$nor" => condition
            .as_array()
            .is_some_and(|parts| !parts.iter().any(|part| doc_matches(doc, part))),
        field => {
            let values = lookup(doc, field);
            condition_matches(&values, condition)
        }
    })
}

fn condition_matches(values: &[&Value], condition: &Value) -> bool {
    let Some(ops) = condition.as_object() else {
        return false;
    };
    ops.iter().all(|(op, operand)| match op.as_str() {
        "$eq" => any_scalar(values, |v| v == operand),
        "$ne" => !any_scalar(values, |v| v == operand),
        "$gt" => any_scalar(values, |v| scalar_cmp(v, operand) == Some(std::cmp::Ordering::Greater)),
        "$gte" => any_scalar(values, |v| {
            matches!(
                scalar_cmp(v, operand),
                Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
            )
        }),
        "$lt" => any_scalar(values, |v| scalar_cmp(v, operand) == Some(std::cmp::Ordering::Less)),
        "$lte" => any_scalar(values, |v| {
            matches!(
                scalar_cmp(v, operand),
                Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
            )
        }),
        "$regex" => {
            let insensitive = ops.get("$options").and_then(Value::as_str) == Some("i");
            let pattern = operand.as_str().unwrap_or("");
            any_scalar(values, |v| {
                v.as_str().is_some_and(|s| regex_lite(pattern, s, insensitive))
            })
        }
        "$options" => true,
        "$exists" => operand.as_bool() != Some(true) || !values.is_empty(),
        "$nin" => operand
            .as_array()
            .is_some_and(|banned| !values.iter().any(|v| banned.contains(v))),
        "$not" => !condition_matches(values, operand),
        "$elemMatch" => values.iter().any(|v| {
            v.as_array().is_some_and(|items| {
                items.iter().any(|item| {
                    if operand
                        .as_object()
                        .is_some_and(|o| o.keys().all(|k| k.starts_with('$')))
                    {
                        condition_matches(&[item], operand)
                    } else {
                        doc_matches(item, operand)
                    }
                })
            })
        }),
        _ => false,
    })
}

/// Apply a predicate to each value, descending one level into arrays the
/// way document stores match array fields.
fn any_scalar(values: &[&Value], predicate: impl Fn(&Value) -> bool) -> bool {
    values.iter().any(|value| match value {
        Value::Array(items) => items.iter().any(&predicate),
        other => predicate(other),
    })
}

fn scalar_cmp(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.as_str().cmp(r.as_str())),
        _ => None,
    }
}

/// Interpret the anchored, escaped patterns the adapter generates.
fn regex_lite(pattern: &str, text: &str, insensitive: bool) -> bool {
    let (pattern, text) = if insensitive {
        (pattern.to_lowercase(), text.to_lowercase())
    } else {
        (pattern.to_string(), text.to_string())
    };
    let starts = pattern.starts_with('^');
    let ends = pattern.ends_with('$') && !pattern.ends_with("\\$");
    let core = pattern
        .trim_start_matches('^')
        .trim_end_matches('$')
        .replace("\\", "");
    match (starts, ends) {
        (true, true) => text == core,
        (true, false) => text.starts_with(&core),
        (false, true) => text.ends_with(&core),
        (false, false) => text.contains(&core),
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert_one(&self, document: Value) -> ScimResult<()> {
        self.documents.lock().await.push(document);
        Ok(())
    }

    async fn find_one(&self, query: Value, _projection: Option<Value>) -> ScimResult<Option<Value>> {
        Ok(self
            .documents
            .lock()
            .await
            .iter()
            .find(|doc| doc_matches(doc, &query))
            .cloned())
    }

    async fn find(
        &self,
        query: Value,
        sort: Option<(String, bool)>,
        skip: usize,
        limit: Option<usize>,
        _projection: Option<Value>,
    ) -> ScimResult<Vec<Value>> {
        let mut results: Vec<Value> = self
            .documents
            .lock()
            .await
            .iter()
            .filter(|doc| doc_matches(doc, &query))
            .cloned()
            .collect();
        if let Some((field, ascending)) = sort {
            results.sort_by(|a, b| {
                let left = lookup(a, &field).first().cloned().cloned();
                let right = lookup(b, &field).first().cloned().cloned();
                let ordering = match (left, right) {
                    (Some(l), Some(r)) => {
                        scalar_cmp(&l, &r).unwrap_or(std::cmp::Ordering::Equal)
                    }
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, None) => std::cmp::Ordering::Equal,
                };
                if ascending { ordering } else { ordering.reverse() }
            });
        }
        let results = results.into_iter().skip(skip);
        Ok(match limit {
            Some(limit) => results.take(limit).collect(),
            None => results.collect(),
        })
    }

    async fn count(&self, query: Value) -> ScimResult<usize> {
        Ok(self
            .documents
            .lock()
            .await
            .iter()
            .filter(|doc| doc_matches(doc, &query))
            .count())
    }

    async fn find_one_and_replace(
        &self,
        query: Value,
        document: Value,
    ) -> ScimResult<Option<Value>> {
        let mut documents = self.documents.lock().await;
        for existing in documents.iter_mut() {
            if doc_matches(existing, &query) {
                let old = existing.clone();
                *existing = document;
                return Ok(Some(old));
            }
        }
        Ok(None)
    }

    async fn find_one_and_delete(&self, query: Value) -> ScimResult<Option<Value>> {
        let mut documents = self.documents.lock().await;
        if let Some(position) = documents.iter().position(|doc| doc_matches(doc, &query)) {
            return Ok(Some(documents.remove(position)));
        }
        Ok(None)
    }

    async fn create_index(&self, field: &str, unique: bool) -> ScimResult<()> {
        self.indexed_fields
            .lock()
            .await
            .push((field.to_string(), unique));
        Ok(())
    }
}

fn seed_bodies() -> Vec<Value> {
    vec![
        json!({
            "id": "1", "userName": "alice", "active": true,
            "name": {"familyName": "Liddell"},
            "emails": [
                {"value": "a@example.com", "type": "work", "primary": true},
                {"value": "alice@home.net", "type": "home"}
            ],
            "meta": {"version": "v1", "lastModified": "2024-03-01T00:00:00.000Z"}
        }),
        json!({
            "id": "2", "userName": "Bob", "active": false,
            "emails": [{"value": "bob@foo.com", "type": "home"}],
            "meta": {"version": "v1", "lastModified": "2024-06-01T00:00:00.000Z"}
        }),
        json!({
            "id": "3", "userName": "carol", "active": true,
            "title": "Dr",
            "meta": {"version": "v1", "lastModified": "2023-01-01T00:00:00.000Z"}
        }),
    ]
}

async fn adapter_with_seed(
    h: &common::Harness,
) -> DocumentDatabase<MemoryDocumentStore> {
    let resource_type = Arc::clone(h.registry.resource_type("User").unwrap());
    let adapter = DocumentDatabase::new(
        Arc::clone(&h.registry),
        resource_type,
        MemoryDocumentStore::default(),
        DocumentDbOptions::new(),
    );
    let ctx = RequestContext::new();
    for body in seed_bodies() {
        let resource = deserialize(
            &h.registry,
            h.registry.resource_type("User").unwrap(),
            &body,
        )
        .unwrap();
        adapter.insert(&ctx, &resource).await.unwrap();
    }
    adapter
}

#[tokio::test]
async fn test_backend_query_agrees_with_in_memory_evaluation() {
    let h = harness();
    let adapter = adapter_with_seed(&h).await;
    let ctx = RequestContext::new();
    let user_type = h.registry.resource_type("User").unwrap();

    let filters = [
        r#"userName eq "ALICE""#,
        r#"userName sw "a""#,
        r#"userName co "o""#,
        "active eq true",
        "not (active eq true)",
        r#"userName eq "alice" or title pr"#,
        "emails pr",
        r#"emails[type eq "work"].value co "example.com""#,
        r#"emails[type eq "work" and primary eq true] pr"#,
        r#"meta.lastModified gt "2024-01-01T00:00:00Z""#,
        r#"name.familyName pr"#,
    ];

    for text in filters {
        let filter = compile_filter(text).unwrap();
        let mut expected: Vec<String> = Vec::new();
        for body in seed_bodies() {
            let resource = deserialize(&h.registry, user_type, &body).unwrap();
            if evaluate(&resource, &filter).unwrap() {
                expected.push(resource.id().unwrap());
            }
        }

        let mut actual: Vec<String> = adapter
            .query(&ctx, Some(&filter), None, None, None)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id().unwrap())
            .collect();
        actual.sort();
        expected.sort();
        assert_eq!(actual, expected, "filter disagreement: {}", text);

        let counted = adapter.count(&ctx, &filter).await.unwrap();
        assert_eq!(counted, expected.len(), "count disagreement: {}", text);
    }
}

#[tokio::test]
async fn test_adapter_optimistic_concurrency() {
    let h = harness();
    let adapter = adapter_with_seed(&h).await;
    let ctx = RequestContext::new();
    let user_type = h.registry.resource_type("User").unwrap();

    let updated = deserialize(
        &h.registry,
        user_type,
        &json!({"id": "1", "userName": "alice", "meta": {"version": "v2"}}),
    )
    .unwrap();

    let err = adapter.replace(&ctx, &updated, "wrong").await.unwrap_err();
    assert!(matches!(err, scim2::ScimError::PreCondition(_)));

    adapter.replace(&ctx, &updated, "v1").await.unwrap();
    let fetched = adapter.get(&ctx, "1", None).await.unwrap();
    assert_eq!(fetched.version().as_deref(), Some("v2"));

    // Delete also matches on (id, version).
    let stale = deserialize(
        &h.registry,
        user_type,
        &json!({"id": "1", "userName": "alice", "meta": {"version": "v1"}}),
    )
    .unwrap();
    assert!(matches!(
        adapter.delete(&ctx, &stale).await.unwrap_err(),
        scim2::ScimError::PreCondition(_)
    ));
}

#[tokio::test]
async fn test_adapter_creates_indexes_for_unique_and_annotated_fields() {
    let h = harness();
    let resource_type = Arc::clone(h.registry.resource_type("User").unwrap());
    let store = MemoryDocumentStore::default();
    let adapter = DocumentDatabase::new(
        Arc::clone(&h.registry),
        resource_type,
        store,
        DocumentDbOptions::new(),
    );
    adapter.ensure_indexes().await;
}

#[tokio::test]
async fn test_adapter_sorting_and_pagination() {
    let h = harness();
    let adapter = adapter_with_seed(&h).await;
    let ctx = RequestContext::new();

    let sort = scim2::crud::Sort::parse(Some("userName"), Some("descending"))
        .unwrap()
        .unwrap();
    let page = scim2::crud::Pagination::new(Some(1), Some(2), 100);
    let results = adapter
        .query(&ctx, None, Some(&sort), Some(&page), None)
        .await
        .unwrap();
    let names: Vec<Value> = results.iter().map(|r| r.raw_of("userName")).collect();
    assert_eq!(names, vec![json!("carol"), json!("alice")]);
}
