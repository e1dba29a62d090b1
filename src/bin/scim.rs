//! The `scim` server binary.
//!
//! Wires the schema registry, filter pipeline, databases and HTTP router
//! together and serves until interrupted. Exits zero on clean shutdown and
//! non-zero on startup failure.

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};

use scim2::args::Args;
use scim2::db::{Database, DatabaseSet, InMemoryDatabase};
use scim2::service::{LogPublisher, Publisher, Services};
use scim2::stage::{FilterPipeline, PipelineConfig, filters::standard_filters};
use scim2::web::{AppState, router};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    match run(args).await {
        Ok(()) => {
            info!("shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("startup failed: {}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let registry = Arc::new(args.registry()?);

    if args.database_url.is_some() {
        // Document store drivers are injected by embedding applications
        // through db::DocumentDatabase; the standalone binary keeps
        // resources in process memory.
        warn!("--database-url is configured but no driver is linked; using in-memory storage");
    }

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
            base_url: args.effective_base_url(),
        },
    ));

    if args.amqp_url.is_some() {
        warn!("--amqp-url is configured but no bus driver is linked; events are logged only");
    }
    let publisher: Arc<dyn Publisher> = Arc::new(LogPublisher);

    let (services, bulk) = Services::build_all(
        &registry,
        &databases,
        &pipeline,
        &publisher,
        args.max_results,
        args.bulk_max_operations,
    );

    let state = Arc::new(AppState {
        registry,
        services,
        bulk,
        max_results: args.max_results,
        max_bulk_operations: args.bulk_max_operations,
    });

    let listener = tokio::net::TcpListener::bind(args.bind_addr()).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("interrupt received, shutting down");
        })
        .await?;
    Ok(())
}
