//! logweave agent library.
//!
//! `main.rs` only parses arguments and maps the result to an exit code;
//! everything else lives here so it can be exercised from tests.

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod metrics_server;

use logweave_core::config::LoggingConfig;

use crate::cli::{Cli, Commands};
use crate::error::AgentError;

/// Run the command selected on the command line.
pub async fn dispatch(cli: Cli) -> Result<(), AgentError> {
    match &cli.command {
        Some(Commands::Version) => commands::version::execute(&mut std::io::stdout()),
        Some(Commands::Graph) => {
            let config = commands::load_config(&cli).await?;
            init_logging(&config.logging, cli.debug)?;
            commands::graph::execute(&config, &mut std::io::stdout())
        }
        Some(Commands::Offsets(args)) => {
            init_logging(&LoggingConfig::default(), cli.debug)?;
            commands::offsets::execute(&cli, &args.action, &mut std::io::stdout()).await
        }
        None => {
            let config = commands::load_config(&cli).await?;
            init_logging(&config.logging, cli.debug)?;
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "logweave starting");
            commands::run::execute(config, cli.pprof_port).await
        }
    }
}

fn init_logging(config: &LoggingConfig, debug: bool) -> Result<(), AgentError> {
    logging::init_tracing(config, debug).map_err(|e| AgentError::Config(e.to_string()))
}
