//! `logweave offsets list|clear`

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use tracing::info;

use logweave_core::config::AgentConfig;
use logweave_core::persist::{Database, FileDatabase, clear_all_offsets, clear_offsets, list_offsets};

use crate::cli::{Cli, OffsetsAction};
use crate::error::AgentError;

/// Database path for the offsets commands.
///
/// `--database` is used as-is; otherwise the configuration files are read
/// for `database_file` without requiring a valid pipeline.
pub async fn database_path(cli: &Cli) -> Result<PathBuf, AgentError> {
    if let Some(path) = &cli.database {
        return Ok(path.clone());
    }
    let mut config = AgentConfig::from_globs(&cli.config).await?;
    config.apply_env_overrides();
    config
        .database_file
        .ok_or_else(|| AgentError::Config("no database_file configured".to_owned()))
}

pub async fn execute(cli: &Cli, action: &OffsetsAction, out: &mut dyn Write) -> Result<(), AgentError> {
    let path = database_path(cli).await?;
    let database = FileDatabase::open(&path)?;
    match action {
        OffsetsAction::List => list(&database, out),
        OffsetsAction::Clear { ids, all } => clear(&database, ids, *all),
    }
}

/// One line per operator: `<operator_id>: <key>, <key>`.
pub fn list(database: &dyn Database, out: &mut dyn Write) -> Result<(), AgentError> {
    let mut by_operator: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (operator, key) in list_offsets(database)? {
        by_operator.entry(operator).or_default().push(key);
    }
    for (operator, keys) in by_operator {
        writeln!(out, "{operator}: {}", keys.join(", "))?;
    }
    out.flush()?;
    Ok(())
}

pub fn clear(database: &dyn Database, ids: &[String], all: bool) -> Result<(), AgentError> {
    let removed = if all {
        clear_all_offsets(database)?
    } else {
        clear_offsets(database, ids)?
    };
    info!(removed, all, "cleared offsets");
    Ok(())
}
