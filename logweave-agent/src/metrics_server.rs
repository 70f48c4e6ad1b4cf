//! Diagnostics endpoint behind `--pprof_port`.
//!
//! Uses the built-in HTTP listener from `metrics-exporter-prometheus` to
//! expose the engine's counters and gauges in the Prometheus text format.
//! Without the flag no recorder is installed and the `metrics` macros are
//! no-ops.

use std::net::{Ipv4Addr, SocketAddr};

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Loopback address the diagnostics listener binds to.
pub fn listen_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Install the global metrics recorder and start the HTTP listener.
///
/// Call at most once per process.
///
/// # Errors
///
/// - Socket binding fails
/// - Global recorder is already installed
pub fn install_metrics_recorder(port: u16) -> Result<()> {
    let addr = listen_addr(port);
    tracing::info!(listen_addr = %addr, "installing Prometheus metrics recorder");

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    logweave_core::metrics::describe_all();

    tracing::info!(listen_addr = %addr, "diagnostics endpoint active");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_loopback_only() {
        let addr = listen_addr(6060);
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 6060);
    }
}
