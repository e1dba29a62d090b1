//! Create service: deserialize, run the create pipeline, insert, publish.

use std::sync::Arc;

use log::{debug, error};
use serde_json::Value;

use crate::db::{Database, DatabaseSet};
use crate::error::ScimResult;
use crate::json;
use crate::resource::{RequestContext, Resource};
use crate::schema::{ResourceType, SchemaRegistry};
use crate::stage::FilterPipeline;

use super::publish::{Publisher, ResourceEvent, ResourceEventKind, publish_best_effort};

pub struct CreateRequest {
    pub body: Value,
}

#[derive(Debug)]
pub struct CreateResponse {
    pub resource: Resource,
    pub location: Option<String>,
    pub version: Option<String>,
}

pub struct CreateService {
    pub registry: Arc<SchemaRegistry>,
    pub resource_type: Arc<ResourceType>,
    pub database: Arc<dyn Database>,
    pub databases: Arc<DatabaseSet>,
    pub pipeline: Arc<FilterPipeline>,
    pub publisher: Arc<dyn Publisher>,
}

impl CreateService {
    pub async fn create(
        &self,
        ctx: &RequestContext,
        request: CreateRequest,
    ) -> ScimResult<CreateResponse> {
        let mut resource = json::deserialize(&self.registry, &self.resource_type, &request.body)?;

        self.pipeline
            .on_create(&self.registry, &self.database, &self.databases, ctx, &mut resource)
            .await
            .map_err(|err| {
                debug!(
                    "request {}: create pipeline rejected {} resource: {}",
                    ctx.request_id(),
                    self.resource_type.name,
                    err
                );
                err
            })?;

        self.database.insert(ctx, &resource).await.map_err(|err| {
            error!(
                "request {}: failed to insert {} resource: {}",
                ctx.request_id(),
                self.resource_type.name,
                err
            );
            err
        })?;

        publish_best_effort(
            self.publisher.as_ref(),
            ctx,
            ResourceEvent::of(ResourceEventKind::Created, &resource),
        )
        .await;

        let location = resource.location();
        let version = resource.version();
        Ok(CreateResponse {
            resource,
            location,
            version,
        })
    }
}
