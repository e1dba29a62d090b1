//! Delete service: fetch, verify version, delete, publish.

use std::sync::Arc;

use log::error;

use crate::db::Database;
use crate::error::{ScimError, ScimResult};
use crate::resource::RequestContext;

use super::publish::{Publisher, ResourceEvent, ResourceEventKind, publish_best_effort};

pub struct DeleteRequest {
    pub resource_id: String,
    pub expected_version: Option<String>,
}

pub struct DeleteService {
    pub database: Arc<dyn Database>,
    pub publisher: Arc<dyn Publisher>,
}

impl DeleteService {
    pub async fn delete(&self, ctx: &RequestContext, request: DeleteRequest) -> ScimResult<()> {
        let current = self.database.get(ctx, &request.resource_id, None).await?;

        if let Some(expected) = &request.expected_version {
            let current_version = current.version().unwrap_or_default();
            if expected != &current_version {
                return Err(ScimError::pre_condition(format!(
                    "version '{}' does not match the current version",
                    expected
                )));
            }
        }

        self.database.delete(ctx, &current).await.map_err(|err| {
            error!(
                "request {}: failed to delete resource {}: {}",
                ctx.request_id(),
                request.resource_id,
                err
            );
            err
        })?;

        publish_best_effort(
            self.publisher.as_ref(),
            ctx,
            ResourceEvent::of(ResourceEventKind::Deleted, &current),
        )
        .await;
        Ok(())
    }
}
