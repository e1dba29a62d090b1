//! Schema registry: loads, seals, and indexes schemas and resource types.
//!
//! The registry is populated once during startup (from the embedded
//! definitions, optionally overlaid by a schema directory) and is read-only
//! afterwards. Services share it as an injected `Arc<SchemaRegistry>`
//! snapshot, so concurrent readers need no synchronization.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::embedded;
use super::types::{Attribute, ResourceType, Schema, collect_attributes, seal_attribute};
use crate::error::{ScimError, ScimResult};

/// Per-attribute metadata: annotations consumed by the filter pipeline and
/// the database layer, plus an optional backend field alias for attribute
/// names that are illegal in the store (`$ref`, extension URNs).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AttributeMetadata {
    /// Id of the attribute this record applies to
    pub id: String,
    /// Annotation strings such as `@UUID`, `@Hash`, `@DbIndex`
    pub annotations: Vec<String>,
    /// Backend field name overriding the attribute name
    pub db_alias: Option<String>,
}

/// Registry of schemas, resource types and attribute metadata.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<Schema>>,
    resource_types: HashMap<String, Arc<ResourceType>>,
    metadata: HashMap<String, AttributeMetadata>,
    attributes: HashMap<String, Arc<Attribute>>,
    common_attributes: Vec<Arc<Attribute>>,
}

impl SchemaRegistry {
    /// Create a registry containing only the embedded core definitions:
    /// User, Group, the enterprise User extension, and default metadata.
    pub fn with_embedded() -> ScimResult<Self> {
        let mut registry = Self::empty()?;
        registry.add_schema_json(embedded::core_user_schema())?;
        registry.add_schema_json(embedded::core_group_schema())?;
        registry.add_schema_json(embedded::enterprise_user_schema())?;
        registry.add_metadata_json(embedded::default_metadata())?;
        registry.register_resource_type_json(embedded::user_resource_type())?;
        registry.register_resource_type_json(embedded::group_resource_type())?;
        Ok(registry)
    }

    /// Create a registry from a schema directory, overlaid on the embedded
    /// definitions.
    ///
    /// Every `.json` file in the directory is classified by shape: objects
    /// with an `attributes` key are schemas, objects with an `endpoint` key
    /// are resource types, and arrays are metadata records. Resource types
    /// are registered after all schemas so extensions can resolve.
    pub fn from_schema_dir<P: AsRef<Path>>(schema_dir: P) -> ScimResult<Self> {
        let mut registry = Self::empty()?;
        registry.add_schema_json(embedded::core_user_schema())?;
        registry.add_schema_json(embedded::core_group_schema())?;
        registry.add_schema_json(embedded::enterprise_user_schema())?;
        registry.add_metadata_json(embedded::default_metadata())?;

        let mut resource_type_docs = Vec::new();
        let mut entries: Vec<_> = fs::read_dir(schema_dir.as_ref())
            .map_err(|e| ScimError::internal(format!("cannot read schema directory: {}", e)))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        entries.sort();

        for path in entries {
            let content = fs::read_to_string(&path)
                .map_err(|e| ScimError::internal(format!("cannot read {}: {}", path.display(), e)))?;
            let doc: Value = serde_json::from_str(&content)?;
            match &doc {
                Value::Array(_) => registry.add_metadata_json(&content)?,
                Value::Object(obj) if obj.contains_key("endpoint") => {
                    resource_type_docs.push(content);
                }
                Value::Object(obj) if obj.contains_key("attributes") => {
                    registry.add_schema_json(&content)?;
                }
                _ => {
                    return Err(ScimError::internal(format!(
                        "unrecognized schema file: {}",
                        path.display()
                    )));
                }
            }
            debug!("loaded schema file {}", path.display());
        }

        if resource_type_docs.is_empty() {
            registry.register_resource_type_json(embedded::user_resource_type())?;
            registry.register_resource_type_json(embedded::group_resource_type())?;
        } else {
            for doc in resource_type_docs {
                registry.register_resource_type_json(&doc)?;
            }
        }
        Ok(registry)
    }

    fn empty() -> ScimResult<Self> {
        let mut common: Vec<Arc<Attribute>> =
            serde_json::from_str(embedded::common_attributes())?;
        for attr in &mut common {
            seal_attribute(attr, "", "");
        }
        let mut registry = Self {
            common_attributes: common.clone(),
            ..Self::default()
        };
        for attr in &common {
            registry.index_attribute(attr);
        }
        Ok(registry)
    }

    /// Parse, seal and register a schema.
    pub fn add_schema_json(&mut self, content: &str) -> ScimResult<()> {
        let mut schema: Schema = serde_json::from_str(content)?;
        schema.seal();
        for attr in &schema.attributes {
            self.index_attribute(attr);
        }
        info!("registered schema {}", schema.id);
        self.schemas.insert(schema.id.clone(), Arc::new(schema));
        Ok(())
    }

    /// Parse and merge attribute metadata records.
    pub fn add_metadata_json(&mut self, content: &str) -> ScimResult<()> {
        let records: Vec<AttributeMetadata> = serde_json::from_str(content)?;
        for record in records {
            self.metadata.insert(record.id.clone(), record);
        }
        Ok(())
    }

    /// Parse and register a resource type, building its super attribute.
    pub fn register_resource_type_json(&mut self, content: &str) -> ScimResult<()> {
        let resource_type: ResourceType = serde_json::from_str(content)?;
        self.register_resource_type(resource_type)
    }

    /// Register a resource type, building its super attribute from the
    /// common attributes, the core schema, and one complex container per
    /// declared extension schema.
    pub fn register_resource_type(&mut self, mut resource_type: ResourceType) -> ScimResult<()> {
        let core = self
            .schemas
            .get(&resource_type.schema)
            .ok_or_else(|| {
                ScimError::internal(format!(
                    "resource type {} references unknown schema {}",
                    resource_type.name, resource_type.schema
                ))
            })?
            .clone();

        let mut subs = self.common_attributes.clone();
        subs.extend(core.attributes.iter().cloned());

        for ext in resource_type.schema_extensions.clone() {
            let ext_schema = self.schemas.get(&ext.schema).ok_or_else(|| {
                ScimError::internal(format!(
                    "resource type {} references unknown extension schema {}",
                    resource_type.name, ext.schema
                ))
            })?;
            let container = Arc::new(Attribute::complex_container(
                ext.schema.clone(),
                ext.schema.clone(),
                ext.schema.clone(),
                ext.required,
                ext_schema.attributes.clone(),
            ));
            self.index_attribute(&container);
            subs.push(container);
        }

        let super_attribute = Arc::new(Attribute::complex_container(
            resource_type.name.clone(),
            String::new(),
            resource_type.name.clone(),
            false,
            subs,
        ));
        resource_type.set_super_attribute(super_attribute);

        info!(
            "registered resource type {} at {}",
            resource_type.name, resource_type.endpoint
        );
        self.resource_types
            .insert(resource_type.name.clone(), Arc::new(resource_type));
        Ok(())
    }

    fn index_attribute(&mut self, attr: &Arc<Attribute>) {
        let mut all = Vec::new();
        collect_attributes(attr, &mut all);
        for each in all {
            if let Some(elem) = each.element_attribute() {
                self.attributes.insert(elem.id.clone(), Arc::clone(elem));
            }
            self.attributes.insert(each.id.clone(), each);
        }
    }

    pub fn schema(&self, urn: &str) -> Option<&Arc<Schema>> {
        self.schemas.get(urn)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Arc<Schema>> {
        self.schemas.values()
    }

    pub fn resource_type(&self, name: &str) -> Option<&Arc<ResourceType>> {
        self.resource_types.get(name)
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &Arc<ResourceType>> {
        self.resource_types.values()
    }

    /// Resolve a resource type by endpoint segment, e.g. `Users` or
    /// `/Users`.
    pub fn resource_type_by_endpoint(&self, endpoint: &str) -> Option<&Arc<ResourceType>> {
        let segment = endpoint.trim_start_matches('/');
        self.resource_types.values().find(|rt| {
            rt.endpoint.trim_start_matches('/').eq_ignore_ascii_case(segment)
        })
    }

    /// Resolve an attribute anywhere in the forest by its stable id.
    pub fn attribute_by_id(&self, id: &str) -> Option<&Arc<Attribute>> {
        self.attributes.get(id)
    }

    pub fn metadata(&self, attr_id: &str) -> Option<&AttributeMetadata> {
        self.metadata.get(attr_id)
    }

    /// Whether the attribute carries the given annotation. Annotations are
    /// case sensitive.
    pub fn has_annotation(&self, attr_id: &str, annotation: &str) -> bool {
        self.metadata
            .get(attr_id)
            .is_some_and(|record| record.annotations.iter().any(|a| a == annotation))
    }

    /// The backend field alias for the attribute, if one is registered.
    pub fn db_alias(&self, attr_id: &str) -> Option<&str> {
        self.metadata
            .get(attr_id)
            .and_then(|record| record.db_alias.as_deref())
    }
}
