//! Logging initialization for the agent.
//!
//! Configures `tracing-subscriber` from the `logging` section of
//! `AgentConfig`. Output goes to stderr so that stdout stays clean for
//! the `stdout` output operator and the `graph` command.

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use logweave_core::config::LoggingConfig;

/// Resolve the filter directive.
///
/// `--debug` wins, then `RUST_LOG`, then the configured level.
pub fn filter_directive(config: &LoggingConfig, debug: bool) -> String {
    if debug {
        return "debug".to_owned();
    }
    std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| config.level.clone())
}

/// Initialize the global tracing subscriber.
///
/// Must be called exactly once, before any tracing macros are used.
///
/// # Formats
///
/// * `"json"` - Machine-parseable JSON lines
/// * `"pretty"` - Human-readable output (default)
pub fn init_tracing(config: &LoggingConfig, debug: bool) -> Result<()> {
    let env_filter = EnvFilter::try_new(filter_directive(config, debug))
        .map_err(|e| anyhow::anyhow!("invalid log filter: {}", e))?;

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .try_init()
                .map_err(|e| {
                    anyhow::anyhow!("failed to initialize JSON tracing subscriber: {}", e)
                })?;
        }
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(std::io::stderr),
                )
                .try_init()
                .map_err(|e| {
                    anyhow::anyhow!("failed to initialize pretty tracing subscriber: {}", e)
                })?;
        }
        _ => {
            return Err(anyhow::anyhow!(
                "unknown log format '{}', expected 'json' or 'pretty'",
                config.format
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn config(level: &str) -> LoggingConfig {
        LoggingConfig {
            level: level.to_owned(),
            format: "pretty".to_owned(),
        }
    }

    #[test]
    #[serial]
    fn debug_flag_wins() {
        // SAFETY: #[serial] keeps other tests from touching the environment concurrently.
        unsafe { std::env::set_var("RUST_LOG", "warn") };
        let directive = filter_directive(&config("error"), true);
        unsafe { std::env::remove_var("RUST_LOG") };
        assert_eq!(directive, "debug");
    }

    #[test]
    #[serial]
    fn rust_log_beats_config() {
        // SAFETY: #[serial] keeps other tests from touching the environment concurrently.
        unsafe { std::env::set_var("RUST_LOG", "logweave_pipeline=trace") };
        let directive = filter_directive(&config("info"), false);
        unsafe { std::env::remove_var("RUST_LOG") };
        assert_eq!(directive, "logweave_pipeline=trace");
    }

    #[test]
    #[serial]
    fn config_level_is_the_fallback() {
        // SAFETY: #[serial] keeps other tests from touching the environment concurrently.
        unsafe { std::env::remove_var("RUST_LOG") };
        assert_eq!(filter_directive(&config("warn"), false), "warn");
    }

    #[test]
    fn unknown_format_is_rejected() {
        let config = LoggingConfig {
            level: "info".to_owned(),
            format: "xml".to_owned(),
        };
        let err = init_tracing(&config, false).unwrap_err();
        assert!(err.to_string().contains("unknown log format"));
    }
}
