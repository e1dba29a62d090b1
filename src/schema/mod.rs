//! SCIM schema definitions, registry, and embedded core schemas.

pub mod embedded;
pub mod registry;
pub mod types;

pub use registry::{AttributeMetadata, SchemaRegistry};
pub use types::{
    Attribute, AttributeType, Mutability, ResourceType, Returned, Schema, SchemaExtension,
    Uniqueness, collect_attributes, seal_attribute,
};
