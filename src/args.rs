//! Command line and environment configuration for the `scim` binary.

use std::path::PathBuf;

use clap::Parser;

use crate::error::ScimResult;
use crate::schema::SchemaRegistry;

/// SCIM 2.0 identity management server.
#[derive(Debug, Parser)]
#[command(name = "scim", version, about)]
pub struct Args {
    /// Interface to bind
    #[arg(long, env = "SCIM_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind
    #[arg(long, env = "SCIM_PORT", default_value_t = 8080)]
    pub port: u16,

    /// External base URL stamped into meta.location; defaults to
    /// http://{host}:{port}
    #[arg(long, env = "SCIM_BASE_URL")]
    pub base_url: Option<String>,

    /// Directory of schema, resource type and metadata JSON files,
    /// overlaid on the embedded definitions
    #[arg(long, env = "SCIM_SCHEMA_DIR")]
    pub schema_dir: Option<PathBuf>,

    /// Document store connection URL; when absent, resources live in
    /// process memory
    #[arg(long, env = "SCIM_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Database name within the document store
    #[arg(long, env = "SCIM_DATABASE_NAME", default_value = "scim")]
    pub database_name: String,

    /// Message bus connection URL for lifecycle events; when absent,
    /// events are logged only
    #[arg(long, env = "SCIM_AMQP_URL")]
    pub amqp_url: Option<String>,

    /// Upper bound on query page size
    #[arg(long, env = "SCIM_MAX_RESULTS", default_value_t = 200)]
    pub max_results: usize,

    /// Upper bound on operations per bulk request
    #[arg(long, env = "SCIM_BULK_MAX_OPERATIONS", default_value_t = 1000)]
    pub bulk_max_operations: usize,
}

impl Args {
    /// Load the schema registry, from the schema directory when one is
    /// configured.
    pub fn registry(&self) -> ScimResult<SchemaRegistry> {
        match &self.schema_dir {
            Some(dir) => SchemaRegistry::from_schema_dir(dir),
            None => SchemaRegistry::with_embedded(),
        }
    }

    /// The socket address to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The base URL for `meta.location`.
    pub fn effective_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }
}
