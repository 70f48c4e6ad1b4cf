//! 단위 테스트용 오퍼레이터

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::Span;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::operator::{Operator, StartContext, operator_span};

/// 받은 엔트리를 모아두는 출력
pub struct Collector {
    id: String,
    span: Span,
    entries: Mutex<Vec<Entry>>,
    notify: tokio::sync::Notify,
}

impl Collector {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            span: operator_span(id, "collector"),
            entries: Mutex::new(Vec::new()),
            notify: tokio::sync::Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.entries.lock().unwrap().clone()
    }

    /// `n`개가 모일 때까지 최대 5초 기다립니다.
    pub async fn wait_for(&self, n: usize) -> Vec<Entry> {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            let notified = self.notify.notified();
            if self.len() >= n {
                return self.entries();
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                panic!("expected {n} entries, got {}", self.len());
            }
        }
    }
}

impl Operator for Collector {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_name(&self) -> &str {
        "collector"
    }

    fn span(&self) -> &Span {
        &self.span
    }

    fn can_process(&self) -> bool {
        true
    }

    fn can_output(&self) -> bool {
        false
    }

    async fn process(&self, _cancel: &CancellationToken, entry: Entry) -> Result<(), OperatorError> {
        self.entries.lock().unwrap().push(entry);
        self.notify.notify_waiters();
        Ok(())
    }
}

/// 항상 에러를 반환하는 출력. 기본은 시스템 에러입니다.
pub struct FailingOutput {
    id: String,
    span: Span,
    reject_entries: bool,
}

impl FailingOutput {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            span: Span::none(),
            reject_entries: false,
        }
    }

    /// 시스템 에러 대신 엔트리 에러를 반환합니다.
    pub fn rejecting(id: &str) -> Self {
        Self {
            reject_entries: true,
            ..Self::new(id)
        }
    }
}

impl Operator for FailingOutput {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_name(&self) -> &str {
        "failing"
    }

    fn span(&self) -> &Span {
        &self.span
    }

    fn can_process(&self) -> bool {
        true
    }

    fn can_output(&self) -> bool {
        false
    }

    async fn process(&self, _cancel: &CancellationToken, _entry: Entry) -> Result<(), OperatorError> {
        if self.reject_entries {
            return Err(OperatorError::entry("malformed entry"));
        }
        Err(OperatorError::System("sink unavailable".into()))
    }
}

/// start/stop 호출 순서를 기록하는 오퍼레이터
pub struct LifecycleProbe {
    id: String,
    span: Span,
    outputs: Vec<String>,
    log: Arc<Mutex<Vec<String>>>,
    fail_start: bool,
}

impl LifecycleProbe {
    pub fn new(id: &str, outputs: Vec<String>, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            id: id.to_owned(),
            span: Span::none(),
            outputs,
            log,
            fail_start: false,
        }
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }
}

impl Operator for LifecycleProbe {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_name(&self) -> &str {
        "probe"
    }

    fn span(&self) -> &Span {
        &self.span
    }

    fn can_process(&self) -> bool {
        true
    }

    fn can_output(&self) -> bool {
        !self.outputs.is_empty()
    }

    fn output_ids(&self) -> Vec<String> {
        self.outputs.clone()
    }

    async fn start(&self, _ctx: StartContext) -> Result<(), OperatorError> {
        self.log.lock().unwrap().push(format!("start {}", self.id));
        if self.fail_start {
            return Err(OperatorError::System("port in use".into()));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), OperatorError> {
        self.log.lock().unwrap().push(format!("stop {}", self.id));
        Ok(())
    }

    async fn process(&self, _cancel: &CancellationToken, _entry: Entry) -> Result<(), OperatorError> {
        Ok(())
    }
}
