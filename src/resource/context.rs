//! Per-request context threaded through services and the database layer.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ScimError, ScimResult};

/// Context for a single SCIM request.
///
/// Carries a correlation id for logging and a cancellation token that is
/// checked at every database suspension point. Cancellation aborts the
/// current operation with a `cancelled` error; in-memory state is discarded
/// with the request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    cancel: CancellationToken,
}

impl RequestContext {
    /// Create a context with a generated request id.
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            cancel: CancellationToken::new(),
        }
    }

    /// Create a context bound to an externally owned cancellation token.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            cancel,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fail with a `cancelled` error if the request has been cancelled.
    pub fn check_cancelled(&self) -> ScimResult<()> {
        if self.cancel.is_cancelled() {
            Err(ScimError::cancelled(format!(
                "request {} was cancelled",
                self.request_id
            )))
        } else {
            Ok(())
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
