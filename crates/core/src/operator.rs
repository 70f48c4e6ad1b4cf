//! 오퍼레이터 trait
//!
//! 파이프라인의 모든 노드는 [`Operator`]를 구현합니다.
//! [`Operator`]는 RPITIT를 사용하므로 `dyn`으로 쓸 수 없습니다.
//! 그래프는 [`DynOperator`]를 `Arc<dyn DynOperator>`로 보관합니다.
//!
//! # 종류
//! - 입력: `can_process = false`, `can_output = true`. `start`에서 엔트리를 생성합니다.
//! - 그 외: `can_process = true`, `can_output`은 출력 오퍼레이터만 `false`입니다.
//!
//! # 생명주기
//! ```text
//! build → set_outputs → start(ctx) → process ... → stop
//! ```
//! `stop`은 두 번 호출되어도 안전해야 합니다.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::entry::Entry;
use crate::error::{OperatorError, PipelineError};
use crate::persist::Persister;

/// dyn-compatible 비동기 반환 타입
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 공유 오퍼레이터 핸들
pub type SharedOperator = Arc<dyn DynOperator>;

/// `start`에 전달되는 실행 컨텍스트
#[derive(Clone)]
pub struct StartContext {
    /// 파이프라인 전체 취소 토큰의 자식
    pub cancel: CancellationToken,
    /// 오퍼레이터 ID로 스코프된 영속화 핸들
    pub persister: Arc<dyn Persister>,
}

/// 모든 오퍼레이터가 구현하는 trait
pub trait Operator: Send + Sync + 'static {
    /// 네임스페이스가 적용된 고유 ID
    fn id(&self) -> &str;

    /// 오퍼레이터 타입 이름 (예: `"json_parser"`)
    fn type_name(&self) -> &str;

    /// `{operator_id, operator_type}`로 스코프된 span
    fn span(&self) -> &Span;

    fn can_process(&self) -> bool;

    fn can_output(&self) -> bool;

    /// 설정에 선언된 출력 ID 목록
    fn output_ids(&self) -> Vec<String> {
        Vec::new()
    }

    /// 연결된 하위 오퍼레이터
    fn outputs(&self) -> Vec<SharedOperator> {
        Vec::new()
    }

    /// 해석된 하위 오퍼레이터를 연결합니다.
    fn set_outputs(&self, outputs: Vec<SharedOperator>) -> Result<(), PipelineError> {
        if outputs.is_empty() {
            return Ok(());
        }
        Err(PipelineError::CannotOutput {
            operator: self.id().to_owned(),
        })
    }

    /// 오퍼레이터를 시작합니다. 입력은 여기서 워커 태스크를 띄웁니다.
    fn start(&self, ctx: StartContext) -> impl Future<Output = Result<(), OperatorError>> + Send {
        let _ = ctx;
        async { Ok(()) }
    }

    /// 오퍼레이터를 정지합니다.
    fn stop(&self) -> impl Future<Output = Result<(), OperatorError>> + Send {
        async { Ok(()) }
    }

    /// 엔트리 하나를 처리합니다.
    fn process(
        &self,
        cancel: &CancellationToken,
        entry: Entry,
    ) -> impl Future<Output = Result<(), OperatorError>> + Send;
}

/// dyn-compatible 오퍼레이터 trait
///
/// [`Operator`]를 구현한 타입은 자동으로 `DynOperator`도 구현됩니다.
pub trait DynOperator: Send + Sync {
    fn id(&self) -> &str;
    fn type_name(&self) -> &str;
    fn span(&self) -> &Span;
    fn can_process(&self) -> bool;
    fn can_output(&self) -> bool;
    fn output_ids(&self) -> Vec<String>;
    fn outputs(&self) -> Vec<SharedOperator>;
    fn set_outputs(&self, outputs: Vec<SharedOperator>) -> Result<(), PipelineError>;
    fn start(&self, ctx: StartContext) -> BoxFuture<'_, Result<(), OperatorError>>;
    fn stop(&self) -> BoxFuture<'_, Result<(), OperatorError>>;
    fn process<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        entry: Entry,
    ) -> BoxFuture<'a, Result<(), OperatorError>>;
}

impl<T: Operator> DynOperator for T {
    fn id(&self) -> &str {
        Operator::id(self)
    }

    fn type_name(&self) -> &str {
        Operator::type_name(self)
    }

    fn span(&self) -> &Span {
        Operator::span(self)
    }

    fn can_process(&self) -> bool {
        Operator::can_process(self)
    }

    fn can_output(&self) -> bool {
        Operator::can_output(self)
    }

    fn output_ids(&self) -> Vec<String> {
        Operator::output_ids(self)
    }

    fn outputs(&self) -> Vec<SharedOperator> {
        Operator::outputs(self)
    }

    fn set_outputs(&self, outputs: Vec<SharedOperator>) -> Result<(), PipelineError> {
        Operator::set_outputs(self, outputs)
    }

    fn start(&self, ctx: StartContext) -> BoxFuture<'_, Result<(), OperatorError>> {
        Box::pin(Operator::start(self, ctx))
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), OperatorError>> {
        Box::pin(Operator::stop(self))
    }

    fn process<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        entry: Entry,
    ) -> BoxFuture<'a, Result<(), OperatorError>> {
        Box::pin(Operator::process(self, cancel, entry))
    }
}

/// 오퍼레이터 span을 생성합니다.
pub fn operator_span(id: &str, type_name: &str) -> Span {
    tracing::info_span!("operator", operator_id = %id, operator_type = %type_name)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::persist::{MemoryDatabase, ScopedPersister};

    struct Collect {
        span: Span,
        seen: Mutex<Vec<Entry>>,
    }

    impl Operator for Collect {
        fn id(&self) -> &str {
            "collect"
        }
        fn type_name(&self) -> &str {
            "test_output"
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
        async fn process(
            &self,
            _cancel: &CancellationToken,
            entry: Entry,
        ) -> Result<(), OperatorError> {
            self.seen.lock().unwrap().push(entry);
            Ok(())
        }
    }

    #[tokio::test]
    async fn dyn_operator_forwards_to_operator() {
        let op: SharedOperator = Arc::new(Collect {
            span: operator_span("collect", "test_output"),
            seen: Mutex::new(Vec::new()),
        });
        let ctx = StartContext {
            cancel: CancellationToken::new(),
            persister: Arc::new(ScopedPersister::new(
                Arc::new(MemoryDatabase::new()),
                "collect",
            )),
        };
        op.start(ctx.clone()).await.unwrap();
        op.process(&ctx.cancel, Entry::with_record("x")).await.unwrap();
        op.stop().await.unwrap();
        op.stop().await.unwrap();

        assert_eq!(op.id(), "collect");
        assert!(op.outputs().is_empty());
    }

    #[test]
    fn non_writer_rejects_outputs() {
        let op: SharedOperator = Arc::new(Collect {
            span: Span::none(),
            seen: Mutex::new(Vec::new()),
        });
        let other = Arc::clone(&op);
        assert!(op.set_outputs(vec![other]).is_err());
        assert!(op.set_outputs(Vec::new()).is_ok());
    }
}
