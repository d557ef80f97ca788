//! `qstate-api` binary entrypoint.
//!
//! Loads configuration from environment variables and starts the HTTP server.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::sync::Arc;

use anyhow::{Context, Result};

use qstate_api::config::Config;
use qstate_api::server::Server;
use qstate_core::observability::{init_logging, LogFormat};
use qstate_core::{InMemoryQueryRegistry, QueryRegistry, StaticNodeDiscovery};

fn choose_log_format(config: &Config) -> LogFormat {
    if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

fn load_registry(config: &Config) -> Result<Arc<dyn QueryRegistry>> {
    let Some(path) = config.registry_seed_path.as_deref() else {
        return Ok(Arc::new(InMemoryQueryRegistry::new()));
    };
    if !config.debug {
        anyhow::bail!("QSTATE_REGISTRY_SEED_PATH is only allowed when QSTATE_DEBUG=true");
    }

    let json = std::fs::read_to_string(path)
        .with_context(|| format!("read registry seed file {path}"))?;
    let registry = InMemoryQueryRegistry::from_json(&json)
        .with_context(|| format!("parse registry seed file {path}"))?;
    tracing::warn!(path = %path, "Seeded in-memory query registry (debug only)");
    Ok(Arc::new(registry))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(choose_log_format(&config));

    let registry = load_registry(&config)?;
    let discovery = StaticNodeDiscovery::resource_managers(&config.resource_manager_uris)
        .context("parse QSTATE_RESOURCE_MANAGER_URIS")?;
    tracing::info!(
        resource_managers = config.resource_manager_uris.len(),
        "Configured static node discovery"
    );

    let server = Server::builder()
        .config(config)
        .registry(registry)
        .discovery(Arc::new(discovery))
        .build();
    server.serve().await?;
    Ok(())
}
