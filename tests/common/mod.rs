//! Shared test harness: a registry with the embedded core types (plus a
//! Device type exercising immutability), in-memory databases, the standard
//! filter pipeline, and the per-type service bundles.

use std::collections::HashMap;
use std::sync::Arc;

use scim2::db::{Database, DatabaseSet, InMemoryDatabase};
use scim2::resource::RequestContext;
use scim2::schema::SchemaRegistry;
use scim2::service::{BulkService, LogPublisher, Publisher, Services};
use scim2::stage::filters::standard_filters;
use scim2::stage::{FilterPipeline, PipelineConfig};

pub const DEVICE_SCHEMA: &str = "urn:example:params:scim:schemas:2.0:Device";

pub struct Harness {
    pub registry: Arc<SchemaRegistry>,
    pub databases: Arc<DatabaseSet>,
    pub services: HashMap<String, Arc<Services>>,
    pub bulk: BulkService,
}

impl Harness {
    pub fn users(&self) -> &Arc<Services> {
        &self.services["users"]
    }

    pub fn groups(&self) -> &Arc<Services> {
        &self.services["groups"]
    }

    pub fn devices(&self) -> &Arc<Services> {
        &self.services["devices"]
    }

    pub fn ctx(&self) -> RequestContext {
        RequestContext::new()
    }
}

pub fn harness() -> Harness {
    let mut registry = SchemaRegistry::with_embedded().expect("embedded registry");
    registry
        .add_schema_json(&format!(
            r#"{{
              "id": "{DEVICE_SCHEMA}",
              "name": "Device",
              "description": "Managed device",
              "attributes": [
                {{
                  "name": "serialNumber",
                  "type": "string",
                  "multiValued": false,
                  "required": true,
                  "caseExact": true,
                  "mutability": "immutable",
                  "returned": "default",
                  "uniqueness": "none"
                }},
                {{
                  "name": "displayName",
                  "type": "string",
                  "multiValued": false,
                  "required": false,
                  "caseExact": false,
                  "mutability": "readWrite",
                  "returned": "default",
                  "uniqueness": "none"
                }},
                {{
                  "name": "owner",
                  "type": "reference",
                  "referenceTypes": ["User"],
                  "multiValued": false,
                  "required": false,
                  "caseExact": true,
                  "mutability": "readWrite",
                  "returned": "default",
                  "uniqueness": "none"
                }}
              ]
            }}"#
        ))
        .expect("device schema");
    registry
        .register_resource_type_json(&format!(
            r#"{{
              "id": "Device",
              "name": "Device",
              "endpoint": "/Devices",
              "schema": "{DEVICE_SCHEMA}"
            }}"#
        ))
        .expect("device resource type");

    let registry = Arc::new(registry);
    let mut databases: DatabaseSet = HashMap::new();
    for resource_type in registry.resource_types() {
        let database: Arc<dyn Database> = Arc::new(InMemoryDatabase::new(
            Arc::clone(&registry),
            Arc::clone(resource_type),
        ));
        databases.insert(resource_type.name.clone(), database);
    }
    let databases = Arc::new(databases);

    let pipeline = Arc::new(FilterPipeline::build(
        &registry,
        standard_filters(),
        PipelineConfig {
            base_url: "https://scim.example.com".to_string(),
        },
    ));
    let publisher: Arc<dyn Publisher> = Arc::new(LogPublisher);

    let (services, bulk) =
        Services::build_all(&registry, &databases, &pipeline, &publisher, 200, 1000);
    Harness {
        registry,
        databases,
        services,
        bulk,
    }
}
