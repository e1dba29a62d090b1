//! Service layer: thin orchestrators over the pipeline and the database.
//!
//! One [`Services`] bundle exists per registered resource type; the bulk
//! service spans all of them. Services own no protocol state beyond their
//! injected collaborators and are safe to share across requests.

pub mod bulk;
pub mod create;
pub mod delete;
pub mod get;
pub mod patch;
pub mod publish;
pub mod query;
pub mod replace;

use std::collections::HashMap;
use std::sync::Arc;

pub use bulk::{BulkResponse, BulkService};
pub use create::{CreateRequest, CreateResponse, CreateService};
pub use delete::{DeleteRequest, DeleteService};
pub use get::{GetRequest, GetResponse, GetService};
pub use patch::{PatchRequest, PatchResponse, PatchService};
pub use publish::{LogPublisher, NoopPublisher, Publisher, ResourceEvent, ResourceEventKind};
pub use query::{QueryRequest, QueryResponse, QueryService};
pub use replace::{ReplaceRequest, ReplaceResponse, ReplaceService};

use crate::db::{Database, DatabaseSet};
use crate::schema::{ResourceType, SchemaRegistry};
use crate::stage::FilterPipeline;

/// The service bundle for one resource type.
pub struct Services {
    pub resource_type: Arc<ResourceType>,
    pub get: GetService,
    pub create: CreateService,
    pub replace: ReplaceService,
    pub patch: PatchService,
    pub delete: DeleteService,
    pub query: QueryService,
}

impl Services {
    pub fn build(
        registry: Arc<SchemaRegistry>,
        resource_type: Arc<ResourceType>,
        database: Arc<dyn Database>,
        databases: Arc<DatabaseSet>,
        pipeline: Arc<FilterPipeline>,
        publisher: Arc<dyn Publisher>,
        max_results: usize,
    ) -> Self {
        Self {
            resource_type: Arc::clone(&resource_type),
            get: GetService {
                database: Arc::clone(&database),
            },
            create: CreateService {
                registry: Arc::clone(&registry),
                resource_type: Arc::clone(&resource_type),
                database: Arc::clone(&database),
                databases: Arc::clone(&databases),
                pipeline: Arc::clone(&pipeline),
                publisher: Arc::clone(&publisher),
            },
            replace: ReplaceService {
                registry: Arc::clone(&registry),
                resource_type: Arc::clone(&resource_type),
                database: Arc::clone(&database),
                databases: Arc::clone(&databases),
                pipeline: Arc::clone(&pipeline),
                publisher: Arc::clone(&publisher),
            },
            patch: PatchService {
                registry: Arc::clone(&registry),
                resource_type: Arc::clone(&resource_type),
                database: Arc::clone(&database),
                databases: Arc::clone(&databases),
                pipeline: Arc::clone(&pipeline),
                publisher: Arc::clone(&publisher),
            },
            delete: DeleteService {
                database: Arc::clone(&database),
                publisher: Arc::clone(&publisher),
            },
            query: QueryService {
                database,
                max_results,
            },
        }
    }

    /// Build one bundle per registered resource type plus the spanning
    /// bulk service.
    pub fn build_all(
        registry: &Arc<SchemaRegistry>,
        databases: &Arc<DatabaseSet>,
        pipeline: &Arc<FilterPipeline>,
        publisher: &Arc<dyn Publisher>,
        max_results: usize,
        max_bulk_operations: usize,
    ) -> (HashMap<String, Arc<Services>>, BulkService) {
        let mut by_endpoint = HashMap::new();
        for resource_type in registry.resource_types() {
            let Some(database) = databases.get(&resource_type.name) else {
                continue;
            };
            let services = Arc::new(Services::build(
                Arc::clone(registry),
                Arc::clone(resource_type),
                Arc::clone(database),
                Arc::clone(databases),
                Arc::clone(pipeline),
                Arc::clone(publisher),
                max_results,
            ));
            let endpoint = resource_type
                .endpoint
                .trim_start_matches('/')
                .to_lowercase();
            by_endpoint.insert(endpoint, services);
        }
        let bulk = BulkService {
            services: by_endpoint.clone(),
            max_operations: max_bulk_operations,
        };
        (by_endpoint, bulk)
    }
}
