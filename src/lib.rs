//! SCIM 2.0 server core: a schema-driven identity management engine.
//!
//! Implements the server side of RFC 7643/7644 around three subsystems:
//!
//! - a typed, observable [`property`] tree describing every resource
//!   through runtime-loaded schemas,
//! - an [`expr`] compiler and evaluator for the SCIM path/filter language,
//!   translatable to backend queries,
//! - a staged [`stage`] filter pipeline applying annotation-driven rules
//!   (generation, validation, uniqueness, hashing, meta stamping) on every
//!   write.
//!
//! Persistence goes through the [`db`] contract (in-memory reference
//! implementation plus a document-store adapter), orchestrated by thin
//! [`service`] structs and exposed over HTTP by the [`web`] router.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scim2::schema::SchemaRegistry;
//! use scim2::db::InMemoryDatabase;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(SchemaRegistry::with_embedded()?);
//! let users = Arc::clone(registry.resource_type("User").expect("core type"));
//! let database = InMemoryDatabase::new(Arc::clone(&registry), users);
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod crud;
pub mod db;
pub mod error;
pub mod expr;
pub mod json;
pub mod property;
pub mod resource;
pub mod schema;
pub mod service;
pub mod stage;
pub mod web;

pub use error::{ScimError, ScimResult};
pub use expr::{compile_filter, compile_path, evaluate};
pub use property::Property;
pub use resource::{RequestContext, Resource};
pub use schema::{Attribute, ResourceType, Schema, SchemaRegistry};
