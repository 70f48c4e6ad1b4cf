//! Integration tests for the agent commands.
//!
//! Configuration files are written to temp directories and driven through
//! the same code paths `main` uses, minus process-global logging setup.

use std::path::Path;
use std::time::{Duration, Instant};

use clap::Parser;
use tempfile::TempDir;

use logweave_agent::cli::Cli;
use logweave_agent::commands::{self, graph, offsets, run};
use logweave_agent::error::AgentError;
use logweave_core::persist::FileDatabase;

fn cli(args: &[&str]) -> Cli {
    let mut argv = vec!["logweave"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).expect("arguments should parse")
}

fn write(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("should write file");
    path.display().to_string()
}

async fn wait_for_lines(path: &Path, n: usize) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let lines: Vec<String> = std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::to_owned)
            .collect();
        if lines.len() >= n {
            return lines;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {n} lines");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn cli_flags_override_config_files() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "01.yaml",
        "pipeline:\n  - type: generate_input\n    entry: {record: x}\ndatabase_file: /from/file.db\n",
    );
    write(dir.path(), "02.yaml", "pipeline:\n  - type: drop_output\n");
    let pattern = dir.path().join("*.yaml").display().to_string();

    let args = cli(&["-c", &pattern, "--database", "/from/flag.db", "--debug"]);
    let config = commands::load_config(&args).await.unwrap();

    assert_eq!(config.pipeline.len(), 2);
    assert_eq!(config.database_file.as_deref(), Some(Path::new("/from/flag.db")));
    assert_eq!(config.logging.level, "debug");
}

#[tokio::test]
async fn missing_config_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let pattern = dir.path().join("*.yaml").display().to_string();
    let err = commands::load_config(&cli(&["-c", &pattern])).await.unwrap_err();
    assert!(matches!(err, AgentError::Config(_)), "{err}");
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn graph_prints_dot() {
    let dir = TempDir::new().unwrap();
    let path = write(
        dir.path(),
        "config.yaml",
        "pipeline:\n  - {id: gen, type: generate_input, entry: {record: x}}\n  - {id: out, type: drop_output}\n",
    );
    let config = commands::load_config(&cli(&["-c", &path])).await.unwrap();

    let mut buf = Vec::new();
    graph::execute(&config, &mut buf).unwrap();
    let dot = String::from_utf8(buf).unwrap();
    assert_eq!(
        dot,
        "digraph G {\n  \"gen\" [label=\"gen\\ngenerate_input\"];\n  \"out\" [label=\"out\\ndrop_output\"];\n  \"gen\" -> \"out\";\n}\n"
    );
}

#[tokio::test]
async fn graph_reports_build_errors() {
    let dir = TempDir::new().unwrap();
    let path = write(
        dir.path(),
        "config.yaml",
        "pipeline:\n  - {type: generate_input, entry: {record: x}, output: missing}\n",
    );
    let config = commands::load_config(&cli(&["-c", &path])).await.unwrap();
    let err = graph::execute(&config, &mut Vec::new()).unwrap_err();
    assert!(matches!(err, AgentError::Config(_)), "{err}");
}

#[tokio::test]
async fn plugins_load_from_plugin_dir_flag() {
    let dir = TempDir::new().unwrap();
    let plugins = dir.path().join("plugins");
    std::fs::create_dir(&plugins).unwrap();
    write(
        &plugins,
        "relay.yaml",
        "pipeline:\n  - {id: '{{ .input }}', type: noop, output: {{ .output }}}\n",
    );
    let path = write(
        dir.path(),
        "config.yaml",
        "pipeline:\n  - {type: generate_input, entry: {record: x}}\n  - {id: r, type: relay}\n  - {type: drop_output}\n",
    );
    let plugin_dir = plugins.display().to_string();
    let config = commands::load_config(&cli(&["-c", &path, "--plugin_dir", &plugin_dir]))
        .await
        .unwrap();

    let pipeline = commands::build(&config).unwrap();
    assert!(pipeline.get("r").is_some());
}

#[tokio::test]
async fn run_persists_offsets_for_offsets_commands() {
    let dir = TempDir::new().unwrap();
    let logs = dir.path().join("logs");
    std::fs::create_dir(&logs).unwrap();
    std::fs::write(logs.join("app.log"), "one\ntwo\n").unwrap();
    let out = dir.path().join("out.jsonl");
    let db = dir.path().join("offsets.db");

    let path = write(
        dir.path(),
        "config.yaml",
        &format!(
            "pipeline:\n  - id: tail\n    type: file_input\n    include: ['{}/*.log']\n    start_at: beginning\n    poll_interval: 20ms\n  - type: file_output\n    path: {}\ndatabase_file: {}\n",
            logs.display(),
            out.display(),
            db.display()
        ),
    );
    let args = cli(&["-c", &path]);
    let config = commands::load_config(&args).await.unwrap();

    let out_path = out.clone();
    run::run_until(config, async move {
        wait_for_lines(&out_path, 2).await;
    })
    .await
    .unwrap();

    let database = FileDatabase::open(&db).unwrap();
    let mut buf = Vec::new();
    offsets::list(&database, &mut buf).unwrap();
    assert_eq!(String::from_utf8(buf).unwrap(), "tail: knownFiles\n");

    // --database works without any configuration file.
    let db_arg = db.display().to_string();
    let args = cli(&["--database", &db_arg, "offsets", "clear", "tail"]);
    let logweave_agent::cli::Commands::Offsets(offsets_args) = args.command.as_ref().unwrap() else {
        panic!("expected offsets command");
    };
    offsets::execute(&args, &offsets_args.action, &mut Vec::new())
        .await
        .unwrap();

    let database = FileDatabase::open(&db).unwrap();
    let mut buf = Vec::new();
    offsets::list(&database, &mut buf).unwrap();
    assert!(buf.is_empty());
}

#[tokio::test]
async fn start_failure_is_reported() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap();

    let dir = TempDir::new().unwrap();
    let path = write(
        dir.path(),
        "config.yaml",
        &format!("pipeline:\n  - type: tcp_input\n    listen_address: {addr}\n  - type: drop_output\n"),
    );
    let config = commands::load_config(&cli(&["-c", &path])).await.unwrap();

    let err = run::run_until(config, async {}).await.unwrap_err();
    assert!(matches!(err, AgentError::Start(_)), "{err}");
    assert_eq!(err.exit_code(), 1);
}
