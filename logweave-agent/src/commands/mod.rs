//! Subcommand handlers and the setup they share.

pub mod graph;
pub mod offsets;
pub mod run;
pub mod version;

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use logweave_core::config::AgentConfig;
use logweave_core::persist::{Database, FileDatabase, MemoryDatabase};
use logweave_pipeline::{Pipeline, Registry, build_pipeline};

use crate::cli::Cli;
use crate::error::AgentError;

/// Apply command-line overrides. Flags win over files and environment.
pub fn apply_cli_overrides(config: &mut AgentConfig, cli: &Cli) {
    if let Some(database) = &cli.database {
        config.database_file = Some(database.clone());
    }
    if let Some(plugin_dir) = &cli.plugin_dir {
        config.plugin_dir = Some(plugin_dir.clone());
    }
    if cli.debug {
        config.logging.level = "debug".to_owned();
    }
}

/// Load, merge and validate every `-c` glob.
pub async fn load_config(cli: &Cli) -> Result<AgentConfig, AgentError> {
    let mut config = AgentConfig::from_globs(&cli.config).await?;
    config.apply_env_overrides();
    apply_cli_overrides(&mut config, cli);
    config.validate()?;
    Ok(config)
}

/// Open the persistence store, or an in-memory one when no file is configured.
pub fn open_database(path: Option<&Path>) -> Result<Arc<dyn Database>, AgentError> {
    match path {
        Some(path) => {
            let database = FileDatabase::open(path).map_err(|e| {
                AgentError::Start(format!("failed to open database {}: {e}", path.display()))
            })?;
            info!(path = %path.display(), "using offsets database");
            Ok(Arc::new(database))
        }
        None => {
            warn!("no database_file configured; offsets will not persist across restarts");
            Ok(Arc::new(MemoryDatabase::new()))
        }
    }
}

/// Built-in operators plus every template under `plugin_dir`.
pub fn build_registry(plugin_dir: Option<&Path>) -> Result<Registry, AgentError> {
    let mut registry = Registry::with_builtins();
    if let Some(dir) = plugin_dir {
        let count = registry.load_plugins(dir)?;
        info!(dir = %dir.display(), count, "loaded plugins");
    }
    Ok(registry)
}

/// Build the operator graph described by `config`.
pub fn build(config: &AgentConfig) -> Result<Pipeline, AgentError> {
    let registry = build_registry(config.plugin_dir.as_deref())?;
    let pipeline = build_pipeline(&config.pipeline, &registry)?;
    info!(operators = pipeline.len(), "pipeline built");
    Ok(pipeline)
}
