//! 파이프라인 통합 테스트
//!
//! 설정 명세 → 빌드 → 시작/정지까지 공개 API로 검증합니다.
//! 결과는 `file_output`이 쓴 JSON 줄로 확인합니다.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use logweave_core::persist::{Database, FileDatabase, MemoryDatabase};
use logweave_pipeline::{Pipeline, Registry, build_pipeline};

fn specs(yaml: &str) -> Vec<serde_yaml::Value> {
    serde_yaml::from_str(yaml).unwrap()
}

fn build(yaml: &str) -> Pipeline {
    build_pipeline(&specs(yaml), &Registry::with_builtins()).unwrap()
}

fn append(path: &Path, data: &str) {
    let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
    file.write_all(data.as_bytes()).unwrap();
}

fn read_lines(path: &Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// 출력 파일에 `n`줄이 쌓일 때까지 최대 5초 기다립니다.
async fn wait_for_lines(path: &Path, n: usize) -> Vec<Value> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let lines = read_lines(path);
        if lines.len() >= n {
            return lines;
        }
        assert!(Instant::now() < deadline, "expected {n} lines, got {}", lines.len());
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn messages(lines: &[Value]) -> Vec<String> {
    lines
        .iter()
        .map(|line| line["record"]["message"].as_str().unwrap_or_default().to_owned())
        .collect()
}

fn memory() -> Arc<dyn Database> {
    Arc::new(MemoryDatabase::new())
}

fn file_pipeline(dir: &Path, out: &Path) -> String {
    format!(
        r#"
- id: tail
  type: file_input
  include: ["{}/*.log"]
  start_at: beginning
  poll_interval: 20ms
- id: sink
  type: file_output
  path: {}
"#,
        dir.display(),
        out.display()
    )
}

struct Workspace {
    _dir: tempfile::TempDir,
    logs: PathBuf,
    out: PathBuf,
    db: PathBuf,
}

fn workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let logs = dir.path().join("logs");
    std::fs::create_dir(&logs).unwrap();
    Workspace {
        logs,
        out: dir.path().join("out.jsonl"),
        db: dir.path().join("offsets.db"),
        _dir: dir,
    }
}

#[tokio::test]
async fn file_lines_resume_after_restart() {
    let ws = workspace();
    let log = ws.logs.join("app.log");
    append(&log, "a\nb\nc\n");

    let database: Arc<dyn Database> = Arc::new(FileDatabase::open(&ws.db).unwrap());
    let mut pipeline = build(&file_pipeline(&ws.logs, &ws.out));
    pipeline.start(Arc::clone(&database)).await.unwrap();
    let lines = wait_for_lines(&ws.out, 3).await;
    pipeline.stop().await.unwrap();
    assert_eq!(messages(&lines), vec!["a", "b", "c"]);

    append(&log, "d\n");
    // 새 프로세스처럼 저장소를 다시 엽니다.
    let database: Arc<dyn Database> = Arc::new(FileDatabase::open(&ws.db).unwrap());
    let mut pipeline = build(&file_pipeline(&ws.logs, &ws.out));
    pipeline.start(database).await.unwrap();
    let lines = wait_for_lines(&ws.out, 4).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    pipeline.stop().await.unwrap();

    assert_eq!(messages(&lines), vec!["a", "b", "c", "d"]);
    assert_eq!(read_lines(&ws.out).len(), 4);
}

#[tokio::test]
async fn rename_rotation_is_not_redelivered() {
    let ws = workspace();
    let log = ws.logs.join("app.log");
    append(&log, "1\n2\n");

    let mut pipeline = build(&file_pipeline(&ws.logs, &ws.out));
    pipeline.start(memory()).await.unwrap();
    wait_for_lines(&ws.out, 2).await;

    std::fs::rename(&log, ws.logs.join("app.1.log")).unwrap();
    append(&log, "3\n");

    let lines = wait_for_lines(&ws.out, 3).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    pipeline.stop().await.unwrap();

    assert_eq!(messages(&lines), vec!["1", "2", "3"]);
    assert_eq!(read_lines(&ws.out).len(), 3);
}

#[tokio::test]
async fn json_parser_sets_epoch_timestamp() {
    let ws = workspace();
    let mut pipeline = build(&format!(
        r#"
- type: generate_input
  count: 1
  entry:
    record: '{{"t":1136214245}}'
- type: json_parser
  parse_to: parsed
  timestamp:
    parse_from: parsed.t
    layout_type: epoch
    layout: s
- type: file_output
  path: {}
"#,
        ws.out.display()
    ));
    pipeline.start(memory()).await.unwrap();
    let lines = wait_for_lines(&ws.out, 1).await;
    pipeline.stop().await.unwrap();

    assert_eq!(lines[0]["timestamp"], "2006-01-02T14:04:05Z");
    assert_eq!(lines[0]["record"], json!({"parsed": {}}));
}

#[tokio::test]
async fn router_falls_through_to_catch_all() {
    let ws = workspace();
    let errors = ws.out.with_file_name("errors.jsonl");
    let rest = ws.out.with_file_name("rest.jsonl");
    let mut pipeline = build(&format!(
        r#"
- id: info
  type: generate_input
  count: 1
  entry: {{record: {{level: info}}}}
  output: route
- id: error
  type: generate_input
  count: 1
  entry: {{record: {{level: error}}}}
  output: route
- id: route
  type: router
  routes:
    - expr: '$.level == "error"'
      output: E
    - expr: 'true'
      output: D
- id: E
  type: file_output
  path: {}
- id: D
  type: file_output
  path: {}
"#,
        errors.display(),
        rest.display()
    ));
    pipeline.start(memory()).await.unwrap();
    let e = wait_for_lines(&errors, 1).await;
    let d = wait_for_lines(&rest, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    pipeline.stop().await.unwrap();

    assert_eq!(e[0]["record"]["level"], "error");
    assert_eq!(d[0]["record"]["level"], "info");
    assert_eq!(read_lines(&errors).len(), 1);
    assert_eq!(read_lines(&rest).len(), 1);
}

#[tokio::test]
async fn rate_limit_spaces_entries_after_burst() {
    let ws = workspace();
    let mut pipeline = build(&format!(
        r#"
- type: generate_input
  count: 13
  entry: {{record: tick}}
- type: rate_limit
  rate: 10
  burst: 3
- type: file_output
  path: {}
"#,
        ws.out.display()
    ));
    let started = Instant::now();
    pipeline.start(memory()).await.unwrap();
    wait_for_lines(&ws.out, 3).await;
    let burst = started.elapsed();
    wait_for_lines(&ws.out, 13).await;
    let total = started.elapsed();
    pipeline.stop().await.unwrap();

    assert!(burst < Duration::from_millis(300), "burst took {burst:?}");
    assert!(total >= Duration::from_millis(850), "total {total:?}");
    assert!(total < Duration::from_millis(1500), "total {total:?}");
}

#[tokio::test]
async fn severity_mapping_by_status_class() {
    let ws = workspace();
    let mut yaml = String::new();
    for code in ["200", "404", "500"] {
        yaml.push_str(&format!(
            "- {{id: gen{code}, type: generate_input, count: 1, entry: {{record: '{code}'}}, output: severity}}\n"
        ));
    }
    yaml.push_str(&format!(
        "- id: severity\n  type: severity_parser\n  parse_from: $record\n  preserve: true\n  preset: none\n  mapping: {{error: 4xx}}\n- {{type: file_output, path: {}}}\n",
        ws.out.display()
    ));

    let mut pipeline = build(&yaml);
    pipeline.start(memory()).await.unwrap();
    let lines = wait_for_lines(&ws.out, 3).await;
    pipeline.stop().await.unwrap();

    let mut got: Vec<(String, u64)> = lines
        .iter()
        .map(|l| {
            (
                l["record"].as_str().unwrap().to_owned(),
                l["severity"].as_u64().unwrap(),
            )
        })
        .collect();
    got.sort();
    assert_eq!(
        got,
        vec![("200".into(), 0), ("404".into(), 60), ("500".into(), 0)]
    );
}

#[tokio::test]
async fn field_operators_chain() {
    let ws = workspace();
    let mut pipeline = build(&format!(
        r#"
- type: generate_input
  count: 1
  entry:
    record: 'user=kim password=hunter2 url=https://example.com:8443/api'
- type: key_value_parser
- type: regex_replace
  field: password
  regex: '.+'
  replace_with: '***'
- type: uri_parser
  parse_from: url
  parse_to: request
- type: move
  from: user
  to: $labels.user
- type: file_output
  path: {}
"#,
        ws.out.display()
    ));
    pipeline.start(memory()).await.unwrap();
    let lines = wait_for_lines(&ws.out, 1).await;
    pipeline.stop().await.unwrap();

    assert_eq!(
        lines[0]["record"],
        json!({
            "password": "***",
            "request": {"scheme": "https", "host": "example.com", "port": "8443", "path": "/api"}
        })
    );
    assert_eq!(lines[0]["labels"]["user"], "kim");
}

#[tokio::test]
async fn plugins_from_directory_are_namespaced() {
    let ws = workspace();
    let plugins = tempfile::tempdir().unwrap();
    std::fs::write(
        plugins.path().join("tagged.yaml"),
        r#"version: 0.0.1
title: Tag and forward
parameters:
  env:
    type: string
    default: dev
pipeline:
  - id: {{ .input }}
    type: metadata
    labels:
      env: {{ .env }}
  - id: relay
    type: noop
    output: {{ .output }}
"#,
    )
    .unwrap();

    let mut registry = Registry::with_builtins();
    assert_eq!(registry.load_plugins(plugins.path()).unwrap(), 1);

    let mut pipeline = build_pipeline(
        &specs(&format!(
            "- {{type: generate_input, count: 1, entry: {{record: x}}}}\n- {{id: edge, type: tagged, env: prod}}\n- {{id: sink, type: file_output, path: {}}}\n",
            ws.out.display()
        )),
        &registry,
    )
    .unwrap();
    let mut ids: Vec<&str> = pipeline.operators().iter().map(|op| op.id()).collect();
    ids.sort();
    assert_eq!(ids, vec!["edge", "edge.relay", "generate_input", "sink"]);

    pipeline.start(memory()).await.unwrap();
    let lines = wait_for_lines(&ws.out, 1).await;
    pipeline.stop().await.unwrap();
    assert_eq!(lines[0]["labels"]["env"], "prod");
}

#[test]
fn invalid_graphs_are_rejected() {
    let registry = Registry::with_builtins();
    let missing = build_pipeline(
        &specs("- {type: generate_input, entry: {record: x}, output: nowhere}"),
        &registry,
    );
    assert!(missing.is_err());

    let duplicate = build_pipeline(
        &specs("- {id: a, type: generate_input, entry: {record: x}}\n- {id: a, type: drop_output}"),
        &registry,
    );
    assert!(duplicate.is_err());

    let unknown = build_pipeline(&specs("- {type: kafka_output}"), &registry);
    assert!(unknown.unwrap_err().to_string().contains("kafka_output"));
}

#[test]
fn graph_renders_as_dot() {
    let pipeline = build("- {id: gen, type: generate_input, entry: {record: x}}\n- {id: out, type: drop_output}");
    let dot = pipeline.render_dot();
    assert!(dot.starts_with("digraph G {\n"));
    assert!(dot.contains(r#""gen" [label="gen\ngenerate_input"];"#), "{dot}");
    assert!(dot.contains(r#""gen" -> "out";"#), "{dot}");
    assert!(dot.trim_end().ends_with('}'));
}
