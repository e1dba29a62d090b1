//! Side-channel publication of resource lifecycle events.
//!
//! Events are published after successful persistence and before the
//! response is written, so a cancellation in between is observable
//! externally: consumers get at-least-once semantics. Publish failures are
//! logged and never fail the request; the transport owns its own retry.

use async_trait::async_trait;
use log::{debug, warn};

use crate::error::ScimResult;
use crate::resource::{RequestContext, Resource};

/// What happened to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceEventKind {
    Created,
    Replaced,
    Patched,
    Deleted,
}

impl ResourceEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Replaced => "replaced",
            Self::Patched => "patched",
            Self::Deleted => "deleted",
        }
    }
}

/// A lifecycle event for one resource.
#[derive(Debug, Clone)]
pub struct ResourceEvent {
    pub kind: ResourceEventKind,
    pub resource_type: String,
    pub resource_id: String,
    pub version: Option<String>,
}

impl ResourceEvent {
    pub fn of(kind: ResourceEventKind, resource: &Resource) -> Self {
        Self {
            kind,
            resource_type: resource.resource_type().name.clone(),
            resource_id: resource.id().unwrap_or_default(),
            version: resource.version(),
        }
    }
}

/// Sink for lifecycle events, e.g. a message-bus producer.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, ctx: &RequestContext, event: &ResourceEvent) -> ScimResult<()>;
}

/// Discards all events.
pub struct NoopPublisher;

#[async_trait]
impl Publisher for NoopPublisher {
    async fn publish(&self, _ctx: &RequestContext, _event: &ResourceEvent) -> ScimResult<()> {
        Ok(())
    }
}

/// Logs events at debug level. Useful as a default and in tests.
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, ctx: &RequestContext, event: &ResourceEvent) -> ScimResult<()> {
        debug!(
            "request {}: {} {} {}",
            ctx.request_id(),
            event.resource_type,
            event.resource_id,
            event.kind.as_str()
        );
        Ok(())
    }
}

/// Publish and swallow failures with a warning.
pub(crate) async fn publish_best_effort(
    publisher: &dyn Publisher,
    ctx: &RequestContext,
    event: ResourceEvent,
) {
    if let Err(err) = publisher.publish(ctx, &event).await {
        warn!(
            "failed to publish {} event for {} {}: {}",
            event.kind.as_str(),
            event.resource_type,
            event.resource_id,
            err
        );
    }
}
