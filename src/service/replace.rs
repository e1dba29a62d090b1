//! Replace service: fetch the current resource, deserialize the new state
//! over a fresh tree, run the update pipeline with the current resource as
//! reference, and replace under optimistic concurrency.

use std::sync::Arc;

use log::{debug, error};
use serde_json::Value;

use crate::db::{Database, DatabaseSet};
use crate::error::{ScimError, ScimResult};
use crate::json;
use crate::resource::{RequestContext, Resource};
use crate::schema::{ResourceType, SchemaRegistry};
use crate::stage::FilterPipeline;

use super::publish::{Publisher, ResourceEvent, ResourceEventKind, publish_best_effort};

pub struct ReplaceRequest {
    pub resource_id: String,
    pub body: Value,
    /// Version from `If-Match`, when the client sent one
    pub expected_version: Option<String>,
}

#[derive(Debug)]
pub struct ReplaceResponse {
    pub resource: Resource,
    pub location: Option<String>,
    pub version: Option<String>,
}

pub struct ReplaceService {
    pub registry: Arc<SchemaRegistry>,
    pub resource_type: Arc<ResourceType>,
    pub database: Arc<dyn Database>,
    pub databases: Arc<DatabaseSet>,
    pub pipeline: Arc<FilterPipeline>,
    pub publisher: Arc<dyn Publisher>,
}

impl ReplaceService {
    pub async fn replace(
        &self,
        ctx: &RequestContext,
        request: ReplaceRequest,
    ) -> ScimResult<ReplaceResponse> {
        let current = self.database.get(ctx, &request.resource_id, None).await?;
        let current_version = current.version().unwrap_or_default();

        // A stale If-Match fails before any mutation reaches storage.
        if let Some(expected) = &request.expected_version {
            if expected != &current_version {
                return Err(ScimError::pre_condition(format!(
                    "version '{}' does not match the current version",
                    expected
                )));
            }
        }

        let mut resource = json::deserialize(&self.registry, &self.resource_type, &request.body)?;

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
                    "request {}: replace pipeline rejected {} resource {}: {}",
                    ctx.request_id(),
                    self.resource_type.name,
                    request.resource_id,
                    err
                );
                err
            })?;

        self.database
            .replace(ctx, &resource, &current_version)
            .await
            .map_err(|err| {
                error!(
                    "request {}: failed to replace {} resource {}: {}",
                    ctx.request_id(),
                    self.resource_type.name,
                    request.resource_id,
                    err
                );
                err
            })?;

        publish_best_effort(
            self.publisher.as_ref(),
            ctx,
            ResourceEvent::of(ResourceEventKind::Replaced, &resource),
        )
        .await;

        let location = resource.location();
        let version = resource.version();
        Ok(ReplaceResponse {
            resource,
            location,
            version,
        })
    }
}
