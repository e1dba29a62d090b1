//! Database contract for resource persistence.
//!
//! One database instance serves one resource type, mirroring a one-to-one
//! correspondence between resource types and backend collections. The
//! contract:
//!
//! - `insert` yields `uniqueness` on id collision (the pipeline's
//!   uniqueness filters should preempt this).
//! - `get` yields `notFound` when the id is absent.
//! - `replace` and `delete` use optimistic concurrency: they match on
//!   `(id, version)` and yield `preCondition` on mismatch, never
//!   `notFound`. The caller necessarily held a previously read resource,
//!   so a missing match can only mean a concurrent writer.
//! - `query` returns up to `pagination.count` results starting at the
//!   1-based `start_index`.
//! - Projection at this layer is best-effort; the response serializer is
//!   responsible for final `returned` enforcement.
//!
//! Every operation checks the request's cancellation token before touching
//! the backend.

pub mod document;
pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

pub use document::{DocumentDatabase, DocumentDbOptions, DocumentStore};
pub use memory::InMemoryDatabase;

/// Databases by resource type name. Built once at startup.
pub type DatabaseSet = HashMap<String, Arc<dyn Database>>;

use crate::crud::params::{Pagination, Projection, Sort};
use crate::error::ScimResult;
use crate::expr::Filter;
use crate::resource::{RequestContext, Resource};

/// Persistence operations for one resource type.
#[async_trait]
pub trait Database: Send + Sync {
    /// Persist a new resource.
    async fn insert(&self, ctx: &RequestContext, resource: &Resource) -> ScimResult<()>;

    /// Fetch a resource by id.
    async fn get(
        &self,
        ctx: &RequestContext,
        id: &str,
        projection: Option<&Projection>,
    ) -> ScimResult<Resource>;

    /// Count the resources matching a filter.
    async fn count(&self, ctx: &RequestContext, filter: &Filter) -> ScimResult<usize>;

    /// Query resources with optional filter, sort, pagination and
    /// projection.
    async fn query(
        &self,
        ctx: &RequestContext,
        filter: Option<&Filter>,
        sort: Option<&Sort>,
        pagination: Option<&Pagination>,
        projection: Option<&Projection>,
    ) -> ScimResult<Vec<Resource>>;

    /// Replace the stored resource whose `(id, version)` matches
    /// `(resource.id, old_version)`.
    async fn replace(
        &self,
        ctx: &RequestContext,
        resource: &Resource,
        old_version: &str,
    ) -> ScimResult<()>;

    /// Delete the stored resource matching the given resource's
    /// `(id, version)`.
    async fn delete(&self, ctx: &RequestContext, resource: &Resource) -> ScimResult<()>;
}
