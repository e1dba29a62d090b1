//! Patch service: apply RFC 7644 PATCH operations through the CRUD
//! primitives, validate with the update pipeline, and replace under the
//! old version.

use std::sync::Arc;

use log::debug;
use serde_json::Value;

use crate::crud;
use crate::db::{Database, DatabaseSet};
use crate::error::{ScimError, ScimResult};
use crate::expr::compile_path;
use crate::resource::{RequestContext, Resource};
use crate::schema::{ResourceType, SchemaRegistry};
use crate::stage::FilterPipeline;

use super::publish::{Publisher, ResourceEvent, ResourceEventKind, publish_best_effort};

/// Schema URN of the PatchOp message.
pub const PATCH_OP_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:PatchOp";

pub struct PatchRequest {
    pub resource_id: String,
    /// The PatchOp message body
    pub body: Value,
    pub expected_version: Option<String>,
}

#[derive(Debug)]
pub struct PatchResponse {
    pub resource: Resource,
    pub location: Option<String>,
    pub version: Option<String>,
}

pub struct PatchService {
    pub registry: Arc<SchemaRegistry>,
    pub resource_type: Arc<ResourceType>,
    pub database: Arc<dyn Database>,
    pub databases: Arc<DatabaseSet>,
    pub pipeline: Arc<FilterPipeline>,
    pub publisher: Arc<dyn Publisher>,
}

impl PatchService {
    pub async fn patch(
        &self,
        ctx: &RequestContext,
        request: PatchRequest,
    ) -> ScimResult<PatchResponse> {
        let current = self.database.get(ctx, &request.resource_id, None).await?;
        let current_version = current.version().unwrap_or_default();

        if let Some(expected) = &request.expected_version {
            if expected != &current_version {
                return Err(ScimError::pre_condition(format!(
                    "version '{}' does not match the current version",
                    expected
                )));
            }
        }

        let mut resource = current.clone();
        for operation in Self::operations(&request.body)? {
            Self::apply(&mut resource, operation)?;
        }

        self.pipeline
            .on_update(
                &self.registry,
                &self.database,
                &self.databases,
                ctx,
                &mut resource,
                &current,
            )
            .await
            .map_err(|err| {
                debug!(
                    "request {}: patch pipeline rejected {} resource {}: {}",
                    ctx.request_id(),
                    self.resource_type.name,
                    request.resource_id,
                    err
                );
                err
            })?;

        self.database
            .replace(ctx, &resource, &current_version)
            .await?;

        publish_best_effort(
            self.publisher.as_ref(),
            ctx,
            ResourceEvent::of(ResourceEventKind::Patched, &resource),
        )
        .await;

        let location = resource.location();
        let version = resource.version();
        Ok(PatchResponse {
            resource,
            location,
            version,
        })
    }

    fn operations(body: &Value) -> ScimResult<Vec<&Value>> {
        let schemas_declare_patch = body
            .get("schemas")
            .and_then(Value::as_array)
            .is_some_and(|schemas| {
                schemas
                    .iter()
                    .any(|urn| urn.as_str() == Some(PATCH_OP_SCHEMA))
            });
        if !schemas_declare_patch {
            return Err(ScimError::invalid_syntax(format!(
                "patch request must declare the {} schema",
                PATCH_OP_SCHEMA
            )));
        }
        let operations = body
            .get("Operations")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ScimError::invalid_syntax("patch request must carry an Operations array")
            })?;
        if operations.is_empty() {
            return Err(ScimError::invalid_value(
                "patch request must carry at least one operation",
            ));
        }
        Ok(operations.iter().collect())
    }

    fn apply(resource: &mut Resource, operation: &Value) -> ScimResult<()> {
        let op = operation
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| ScimError::invalid_syntax("patch operation requires an 'op' field"))?;
        let path = operation.get("path").and_then(Value::as_str);
        let value = operation.get("value");

        match op.to_lowercase().as_str() {
            "add" => {
                let value = value.ok_or_else(|| {
                    ScimError::invalid_value("add operation requires a value")
                })?;
                match path {
                    Some(path) => crud::add(resource, &compile_path(path)?, value),
                    None => Self::apply_to_root(resource, value, crud::add),
                }
            }
            "replace" => {
                let value = value.ok_or_else(|| {
                    ScimError::invalid_value("replace operation requires a value")
                })?;
                match path {
                    Some(path) => crud::replace(resource, &compile_path(path)?, value),
                    None => Self::apply_to_root(resource, value, crud::replace),
                }
            }
            "remove" => {
                let path = path.ok_or_else(|| {
                    ScimError::no_target("remove operation requires a path")
                })?;
                crud::remove(resource, &compile_path(path)?)
            }
            other => Err(ScimError::invalid_syntax(format!(
                "unsupported patch operation '{}'",
                other
            ))),
        }
    }

    /// A path-less add/replace merges the value object attribute by
    /// attribute at the root.
    fn apply_to_root(
        resource: &mut Resource,
        value: &Value,
        apply: fn(&mut Resource, &crate::expr::AttrPath, &Value) -> ScimResult<()>,
    ) -> ScimResult<()> {
        let object = value.as_object().ok_or_else(|| {
            ScimError::invalid_value("a path-less patch operation requires an object value")
        })?;
        for (key, item) in object {
            apply(resource, &compile_path(key)?, item)?;
        }
        Ok(())
    }
}
