//! In-memory reference implementation of the database contract.
//!
//! Stores the persisted form of each resource and rebuilds the property
//! tree on every access, exactly as an external store would. Projection is
//! intentionally ignored (a permitted best-effort choice at this layer);
//! the response serializer enforces `returned` rules.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error};
use serde_json::Value;
use tokio::sync::RwLock;

use super::Database;
use crate::crud::params::{Pagination, Projection, Sort, SortOrder};
use crate::error::{ScimError, ScimResult};
use crate::expr::{Filter, evaluate, select};
use crate::json;
use crate::resource::{RequestContext, Resource};
use crate::schema::{ResourceType, SchemaRegistry};

/// In-memory database for one resource type.
pub struct InMemoryDatabase {
    registry: Arc<SchemaRegistry>,
    resource_type: Arc<ResourceType>,
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    documents: HashMap<String, Value>,
    insertion_order: Vec<String>,
}

impl InMemoryDatabase {
    pub fn new(registry: Arc<SchemaRegistry>, resource_type: Arc<ResourceType>) -> Self {
        Self {
            registry,
            resource_type,
            state: RwLock::new(State::default()),
        }
    }

    pub fn resource_type(&self) -> &Arc<ResourceType> {
        &self.resource_type
    }

    fn rebuild(&self, stored: &Value) -> ScimResult<Resource> {
        json::deserialize_stored(&self.registry, &self.resource_type, stored).map_err(|err| {
            error!(
                "stored form of a {} resource no longer deserializes: {}",
                self.resource_type.name, err
            );
            ScimError::internal("stored resource is corrupt")
        })
    }

    fn stored_version(stored: &Value) -> Option<&str> {
        stored.get("meta")?.get("version")?.as_str()
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    async fn insert(&self, ctx: &RequestContext, resource: &Resource) -> ScimResult<()> {
        ctx.check_cancelled()?;
        let id = resource
            .id()
            .ok_or_else(|| ScimError::internal("cannot insert a resource without an id"))?;
        let mut state = self.state.write().await;
        if state.documents.contains_key(&id) {
            return Err(ScimError::uniqueness(format!(
                "a {} resource with id '{}' already exists",
                self.resource_type.name, id
            )));
        }
        state.documents.insert(id.clone(), json::serialize_stored(resource));
        state.insertion_order.push(id.clone());
        debug!("inserted {} resource {}", self.resource_type.name, id);
        Ok(())
    }

    async fn get(
        &self,
        ctx: &RequestContext,
        id: &str,
        _projection: Option<&Projection>,
    ) -> ScimResult<Resource> {
        ctx.check_cancelled()?;
        let state = self.state.read().await;
        let stored = state.documents.get(id).ok_or_else(|| {
            ScimError::not_found(format!(
                "{} resource with id '{}' does not exist",
                self.resource_type.name, id
            ))
        })?;
        self.rebuild(stored)
    }

    async fn count(&self, ctx: &RequestContext, filter: &Filter) -> ScimResult<usize> {
        ctx.check_cancelled()?;
        let state = self.state.read().await;
        let mut count = 0;
        for id in &state.insertion_order {
            let resource = self.rebuild(&state.documents[id])?;
            if evaluate(&resource, filter)? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn query(
        &self,
        ctx: &RequestContext,
        filter: Option<&Filter>,
        sort: Option<&Sort>,
        pagination: Option<&Pagination>,
        _projection: Option<&Projection>,
    ) -> ScimResult<Vec<Resource>> {
        ctx.check_cancelled()?;
        let state = self.state.read().await;
        let mut results = Vec::new();
        for id in &state.insertion_order {
            let resource = self.rebuild(&state.documents[id])?;
            match filter {
                Some(filter) => {
                    if evaluate(&resource, filter)? {
                        results.push(resource);
                    }
                }
                None => results.push(resource),
            }
        }
        drop(state);

        if let Some(sort) = sort {
            results.sort_by(|a, b| {
                let ordering = compare_for_sort(a, b, sort);
                match sort.order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(page) = pagination {
            results = results
                .into_iter()
                .skip(page.offset())
                .take(page.count)
                .collect();
        }
        Ok(results)
    }

    async fn replace(
        &self,
        ctx: &RequestContext,
        resource: &Resource,
        old_version: &str,
    ) -> ScimResult<()> {
        ctx.check_cancelled()?;
        let id = resource
            .id()
            .ok_or_else(|| ScimError::internal("cannot replace a resource without an id"))?;
        let mut state = self.state.write().await;
        let matches = state
            .documents
            .get(&id)
            .is_some_and(|stored| Self::stored_version(stored) == Some(old_version));
        if !matches {
            return Err(pre_condition(&self.resource_type, &id));
        }
        state.documents.insert(id, json::serialize_stored(resource));
        Ok(())
    }

    async fn delete(&self, ctx: &RequestContext, resource: &Resource) -> ScimResult<()> {
        ctx.check_cancelled()?;
        let id = resource
            .id()
            .ok_or_else(|| ScimError::internal("cannot delete a resource without an id"))?;
        let version = resource.version().unwrap_or_default();
        let mut state = self.state.write().await;
        let matches = state
            .documents
            .get(&id)
            .is_some_and(|stored| Self::stored_version(stored) == Some(version.as_str()));
        if !matches {
            return Err(pre_condition(&self.resource_type, &id));
        }
        state.documents.remove(&id);
        state.insertion_order.retain(|existing| existing != &id);
        Ok(())
    }
}

fn pre_condition(resource_type: &ResourceType, id: &str) -> ScimError {
    ScimError::pre_condition(format!(
        "{} resource '{}' does not exist, or another process has updated it since last read",
        resource_type.name, id
    ))
}

/// Compare two resources on the sort path. Unassigned values sort last in
/// ascending order; an unresolvable path preserves insertion order.
fn compare_for_sort(a: &Resource, b: &Resource, sort: &Sort) -> Ordering {
    let left = sort_key(a, sort);
    let right = sort_key(b, sort);
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(l), Some(r)) => compare_values(&l, &r),
    }
}

fn sort_key(resource: &Resource, sort: &Sort) -> Option<Value> {
    let candidates = select(resource, &sort.by).ok()?;
    candidates
        .into_iter()
        .map(|prop| prop.raw())
        .find(|value| !value.is_null())
}

fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::String(l), Value::String(r)) => {
            l.to_lowercase().cmp(&r.to_lowercase())
        }
        (Value::Number(l), Value::Number(r)) => l
            .as_f64()
            .partial_cmp(&r.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Bool(l), Value::Bool(r)) => l.cmp(r),
        _ => Ordering::Equal,
    }
}
