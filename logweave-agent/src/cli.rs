//! CLI argument parsing using clap derive API
//!
//! Purely declarative: no I/O happens here.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Default configuration path when `-c` is not given.
pub const DEFAULT_CONFIG: &str = "./config.yaml";

/// logweave -- log collection and processing agent.
///
/// Without a subcommand the agent runs the configured pipeline until
/// SIGINT or SIGTERM.
#[derive(Parser, Debug)]
#[command(name = "logweave", version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path or glob. May be repeated.
    #[arg(short = 'c', long = "config", global = true, default_value = DEFAULT_CONFIG)]
    pub config: Vec<String>,

    /// Override the persistence file (offsets database).
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Override the plugin template directory.
    #[arg(long = "plugin_dir", global = true)]
    pub plugin_dir: Option<PathBuf>,

    /// Force debug logging.
    #[arg(long, global = true)]
    pub debug: bool,

    /// Serve runtime metrics on 127.0.0.1:<port>.
    #[arg(long = "pprof_port", global = true)]
    pub pprof_port: Option<u16>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the pipeline graph in DOT format.
    Graph,

    /// Inspect or clear persisted offsets.
    Offsets(OffsetsArgs),

    /// Print version information.
    Version,
}

// ---- offsets ----

#[derive(Args, Debug)]
pub struct OffsetsArgs {
    #[command(subcommand)]
    pub action: OffsetsAction,
}

#[derive(Subcommand, Debug)]
pub enum OffsetsAction {
    /// List operators with persisted offsets and their keys.
    List,

    /// Delete persisted offsets.
    Clear {
        /// Operator ids whose offsets should be removed.
        #[arg(conflicts_with = "all", required_unless_present = "all")]
        ids: Vec<String>,

        /// Remove offsets for every operator.
        #[arg(long)]
        all: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("arguments should parse")
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_runs_agent_with_default_config() {
        let cli = parse(&["logweave"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.config, vec![DEFAULT_CONFIG.to_owned()]);
        assert!(!cli.debug);
    }

    #[test]
    fn config_is_repeatable() {
        let cli = parse(&["logweave", "-c", "a.yaml", "-c", "conf.d/*.yaml"]);
        assert_eq!(cli.config, vec!["a.yaml", "conf.d/*.yaml"]);
    }

    #[test]
    fn underscore_flags_are_accepted() {
        let cli = parse(&[
            "logweave",
            "--plugin_dir",
            "/plugins",
            "--pprof_port",
            "6060",
            "--database",
            "/var/lib/logweave.db",
            "--debug",
        ]);
        assert_eq!(cli.plugin_dir, Some(PathBuf::from("/plugins")));
        assert_eq!(cli.pprof_port, Some(6060));
        assert_eq!(cli.database, Some(PathBuf::from("/var/lib/logweave.db")));
        assert!(cli.debug);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = parse(&["logweave", "graph", "-c", "pipeline.yaml"]);
        assert!(matches!(cli.command, Some(Commands::Graph)));
        assert_eq!(cli.config, vec!["pipeline.yaml"]);
    }

    #[test]
    fn offsets_clear_requires_ids_or_all() {
        assert!(Cli::try_parse_from(["logweave", "offsets", "clear"]).is_err());
        assert!(Cli::try_parse_from(["logweave", "offsets", "clear", "a", "--all"]).is_err());

        let cli = parse(&["logweave", "offsets", "clear", "a", "b"]);
        match cli.command {
            Some(Commands::Offsets(OffsetsArgs {
                action: OffsetsAction::Clear { ids, all },
            })) => {
                assert_eq!(ids, vec!["a", "b"]);
                assert!(!all);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = parse(&["logweave", "offsets", "clear", "--all"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Offsets(OffsetsArgs {
                action: OffsetsAction::Clear { all: true, .. }
            }))
        ));
    }
}
