//! Get service: fetch one resource by id.

use std::sync::Arc;

use log::error;

use crate::crud::params::Projection;
use crate::db::Database;
use crate::error::ScimResult;
use crate::resource::{RequestContext, Resource};

#[derive(Debug, Default)]
pub struct GetRequest {
    pub resource_id: String,
    pub projection: Option<Projection>,
}

#[derive(Debug)]
pub struct GetResponse {
    pub resource: Resource,
    pub location: Option<String>,
    pub version: Option<String>,
}

pub struct GetService {
    pub database: Arc<dyn Database>,
}

impl GetService {
    pub async fn get(&self, ctx: &RequestContext, request: GetRequest) -> ScimResult<GetResponse> {
        let resource = self
            .database
            .get(ctx, &request.resource_id, request.projection.as_ref())
            .await
            .map_err(|err| {
                error!(
                    "request {}: failed to get resource {}: {}",
                    ctx.request_id(),
                    request.resource_id,
                    err
                );
                err
            })?;
        let location = resource.location();
        let version = resource.version();
        Ok(GetResponse {
            resource,
            location,
            version,
        })
    }
}
