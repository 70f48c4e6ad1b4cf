//! 파이프라인 생명주기
//!
//! 오퍼레이터는 위상 순서(입력 → 출력)로 정렬됩니다. 같은 단계에서는 선언 순서를 따릅니다.
//! - 시작: 역순 (출력 먼저). 입력이 첫 엔트리를 보낼 때 하위가 모두 실행 중입니다.
//!   실패하면 이미 시작한 오퍼레이터를 역순으로 정지합니다.
//! - 정지: 정순 (입력 먼저). 각 오퍼레이터는 [`STOP_TIMEOUT`] 안에 끝나야 합니다.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use logweave_core::error::PipelineError;
use logweave_core::metrics::PIPELINE_OPERATORS;
use logweave_core::operator::{SharedOperator, StartContext};
use logweave_core::persist::{Database, ScopedPersister};

use crate::helper::workers::STOP_TIMEOUT;

/// 파이프라인 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// 빌드됨, 아직 시작하지 않음
    Built,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 연결된 오퍼레이터 그래프
pub struct Pipeline {
    /// 위상 순서
    operators: Vec<SharedOperator>,
    state: PipelineState,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field(
                "operators",
                &self.operators.iter().map(|op| op.id()).collect::<Vec<_>>(),
            )
            .field("state", &self.state)
            .finish()
    }
}

impl Pipeline {
    /// 연결이 끝난 오퍼레이터로 파이프라인을 만듭니다. 순환이 있으면 에러입니다.
    pub fn new(operators: Vec<SharedOperator>) -> Result<Self, PipelineError> {
        let operators = topological_order(operators)?;
        Ok(Self {
            operators,
            state: PipelineState::Built,
            cancel: CancellationToken::new(),
        })
    }

    /// 위상 순서의 오퍼레이터 목록
    pub fn operators(&self) -> &[SharedOperator] {
        &self.operators
    }

    pub fn get(&self, id: &str) -> Option<&SharedOperator> {
        self.operators.iter().find(|op| op.id() == id)
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn state_name(&self) -> &'static str {
        match self.state {
            PipelineState::Built => "built",
            PipelineState::Running => "running",
            PipelineState::Stopped => "stopped",
        }
    }

    /// 출력부터 역순으로 시작합니다.
    ///
    /// 하나라도 실패하면 이미 시작한 오퍼레이터를 정지하고 첫 에러를 반환합니다.
    pub async fn start(&mut self, database: Arc<dyn Database>) -> Result<(), PipelineError> {
        if self.state == PipelineState::Running {
            return Err(PipelineError::AlreadyRunning);
        }
        self.cancel = CancellationToken::new();

        tracing::info!(operators = self.operators.len(), "starting pipeline");
        let mut started: Vec<&SharedOperator> = Vec::with_capacity(self.operators.len());

        for op in self.operators.iter().rev() {
            let ctx = StartContext {
                cancel: self.cancel.child_token(),
                persister: Arc::new(ScopedPersister::new(Arc::clone(&database), op.id())),
            };
            let result = op.start(ctx).instrument(op.span().clone()).await;
            if let Err(e) = result {
                tracing::error!(operator = op.id(), error = %e, "operator failed to start");
                tracing::warn!(started = started.len(), "rolling back already-started operators");
                self.cancel.cancel();
                for prev in started.iter().rev() {
                    if let Err(stop_err) = stop_bounded(prev).await {
                        tracing::error!(
                            operator = prev.id(),
                            startup_error = %e,
                            rollback_error = %stop_err,
                            "rollback also failed during startup failure cleanup"
                        );
                    }
                }
                self.state = PipelineState::Stopped;
                return Err(PipelineError::StartFailed {
                    operator: op.id().to_owned(),
                    reason: e.to_string(),
                });
            }
            started.push(op);
        }

        metrics::gauge!(PIPELINE_OPERATORS).set(self.operators.len() as f64);
        self.state = PipelineState::Running;
        tracing::info!("pipeline started");
        Ok(())
    }

    /// 입력부터 정순으로 정지합니다. 에러는 모아서 반환합니다.
    pub async fn stop(&mut self) -> Result<(), PipelineError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotRunning);
        }

        tracing::info!("stopping pipeline");
        self.cancel.cancel();

        let mut errors = Vec::new();
        for op in &self.operators {
            if let Err(e) = stop_bounded(op).await {
                tracing::error!(operator = op.id(), error = %e, "failed to stop operator");
                errors.push(format!("{}: {e}", op.id()));
            }
        }

        metrics::gauge!(PIPELINE_OPERATORS).set(0.0);
        self.state = PipelineState::Stopped;
        if errors.is_empty() {
            tracing::info!("pipeline stopped");
            Ok(())
        } else {
            Err(PipelineError::StopFailed(errors.join("; ")))
        }
    }

    /// 그래프를 DOT 형식으로 렌더링합니다.
    pub fn render_dot(&self) -> String {
        let mut out = String::from("digraph G {\n");
        for op in &self.operators {
            let _ = writeln!(
                out,
                "  {} [label={}];",
                dot_quote(op.id()),
                dot_quote(&format!("{}\n{}", op.id(), op.type_name()))
            );
        }
        for op in &self.operators {
            for output in op.output_ids() {
                let _ = writeln!(out, "  {} -> {};", dot_quote(op.id()), dot_quote(&output));
            }
        }
        out.push_str("}\n");
        out
    }
}

async fn stop_bounded(op: &SharedOperator) -> Result<(), String> {
    match tokio::time::timeout(STOP_TIMEOUT, op.stop().instrument(op.span().clone())).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("did not stop within {}s", STOP_TIMEOUT.as_secs())),
    }
}

fn dot_quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

/// Kahn 알고리즘. 같은 단계에서는 선언 순서가 앞선 것을 먼저 둡니다.
fn topological_order(operators: Vec<SharedOperator>) -> Result<Vec<SharedOperator>, PipelineError> {
    let index: HashMap<String, usize> = operators
        .iter()
        .enumerate()
        .map(|(i, op)| (op.id().to_owned(), i))
        .collect();

    let mut indegree = vec![0usize; operators.len()];
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); operators.len()];
    for (i, op) in operators.iter().enumerate() {
        for output in op.output_ids() {
            if let Some(&j) = index.get(&output) {
                edges[i].push(j);
                indegree[j] += 1;
            }
        }
    }

    let mut ready: std::collections::BTreeSet<usize> =
        (0..operators.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(operators.len());
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &j in &edges[i] {
            indegree[j] -= 1;
            if indegree[j] == 0 {
                ready.insert(j);
            }
        }
    }

    if order.len() != operators.len() {
        let stuck: Vec<&str> = (0..operators.len())
            .filter(|i| !order.contains(i))
            .map(|i| operators[i].id())
            .collect();
        return Err(PipelineError::Cycle {
            path: stuck.join(", "),
        });
    }

    let mut slots: Vec<Option<SharedOperator>> = operators.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Collector, LifecycleProbe};
    use logweave_core::persist::MemoryDatabase;

    fn probe(id: &str, outputs: &[&str], log: &Arc<std::sync::Mutex<Vec<String>>>) -> Arc<LifecycleProbe> {
        Arc::new(LifecycleProbe::new(
            id,
            outputs.iter().map(|s| (*s).to_owned()).collect(),
            Arc::clone(log),
        ))
    }

    #[tokio::test]
    async fn start_is_reverse_topological_and_stop_is_forward() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        // 선언 순서와 위상 순서를 일부러 다르게 둡니다.
        let ops: Vec<SharedOperator> = vec![
            probe("sink", &[], &log),
            probe("mid", &["sink"], &log),
            probe("source", &["mid"], &log),
        ];
        let mut pipeline = Pipeline::new(ops).unwrap();
        let ids: Vec<&str> = pipeline.operators().iter().map(|op| op.id()).collect();
        assert_eq!(ids, vec!["source", "mid", "sink"]);

        pipeline.start(Arc::new(MemoryDatabase::new())).await.unwrap();
        assert_eq!(pipeline.state(), PipelineState::Running);
        pipeline.stop().await.unwrap();
        assert_eq!(pipeline.state_name(), "stopped");

        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                "start sink", "start mid", "start source",
                "stop source", "stop mid", "stop sink",
            ]
        );
    }

    #[tokio::test]
    async fn failed_start_rolls_back_started_operators() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let failing = Arc::new(
            LifecycleProbe::new("source", vec!["sink".into()], Arc::clone(&log)).failing_start(),
        );
        let ops: Vec<SharedOperator> = vec![failing, probe("sink", &[], &log)];
        let mut pipeline = Pipeline::new(ops).unwrap();

        let err = pipeline
            .start(Arc::new(MemoryDatabase::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StartFailed { ref operator, .. } if operator == "source"));

        let log = log.lock().unwrap().clone();
        assert_eq!(log, vec!["start sink", "start source", "stop sink"]);
        assert!(matches!(pipeline.stop().await, Err(PipelineError::NotRunning)));
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let mut pipeline = Pipeline::new(vec![Arc::new(Collector::new("out")) as SharedOperator]).unwrap();
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        pipeline.start(Arc::clone(&db)).await.unwrap();
        assert!(matches!(
            pipeline.start(db).await,
            Err(PipelineError::AlreadyRunning)
        ));
        pipeline.stop().await.unwrap();
    }

    #[test]
    fn dot_output_lists_nodes_and_edges() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let ops: Vec<SharedOperator> = vec![probe("in", &["out"], &log), probe("out", &[], &log)];
        let dot = Pipeline::new(ops).unwrap().render_dot();
        assert!(dot.starts_with("digraph G {\n"));
        assert!(dot.contains(r#"  "in" [label="in\nprobe"];"#), "{dot}");
        assert!(dot.contains(r#"  "in" -> "out";"#), "{dot}");
        assert!(dot.ends_with("}\n"));
    }

    #[test]
    fn cycles_are_rejected() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let ops: Vec<SharedOperator> = vec![probe("a", &["b"], &log), probe("b", &["a"], &log)];
        assert!(matches!(Pipeline::new(ops), Err(PipelineError::Cycle { .. })));
    }
}
