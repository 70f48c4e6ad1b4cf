//! Default command: run the pipeline until a shutdown signal.

use std::future::Future;

use tracing::{error, info};

use logweave_core::config::AgentConfig;

use crate::error::AgentError;
use crate::metrics_server;

/// Execute the agent.
///
/// Installs the diagnostics endpoint when `pprof_port` is set, then runs
/// until SIGINT or SIGTERM.
pub async fn execute(config: AgentConfig, pprof_port: Option<u16>) -> Result<(), AgentError> {
    if let Some(port) = pprof_port {
        metrics_server::install_metrics_recorder(port)
            .map_err(|e| AgentError::Start(e.to_string()))?;
    }

    run_until(config, async {
        match wait_for_shutdown_signal().await {
            Ok(signal) => info!(signal, "shutdown signal received"),
            Err(e) => error!(error = %e, "failed to wait for shutdown signal, stopping"),
        }
    })
    .await
}

/// Build and start the pipeline, wait for `shutdown`, then stop it.
///
/// A start failure has already rolled back the operators that did start.
pub async fn run_until<F>(config: AgentConfig, shutdown: F) -> Result<(), AgentError>
where
    F: Future<Output = ()>,
{
    let mut pipeline = super::build(&config)?;
    let database = super::open_database(config.database_file.as_deref())?;

    pipeline.start(database).await?;
    info!("logweave running");

    shutdown.await;

    pipeline.stop().await?;
    info!("logweave shut down");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
