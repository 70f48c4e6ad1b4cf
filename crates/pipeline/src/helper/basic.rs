//! 모든 오퍼레이터가 공유하는 ID/타입/span

use serde::{Deserialize, Serialize};
use tracing::Span;

use logweave_core::operator::operator_span;

use crate::registry::BuildContext;

/// 모든 오퍼레이터 설정의 공통 필드
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BasicConfig {
    /// 지정하지 않으면 타입 이름을 ID로 사용합니다.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl BasicConfig {
    pub fn new(id: &str, type_name: &str) -> Self {
        Self {
            id: Some(id.to_owned()),
            type_name: type_name.to_owned(),
        }
    }

    /// 네임스페이스 적용 전 ID
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.type_name)
    }

    pub fn build(&self, ctx: &BuildContext<'_>) -> BasicOperator {
        BasicOperator::new(ctx.prepend_namespace(self.id()), self.type_name.clone())
    }
}

/// 빌드된 오퍼레이터의 식별 정보
#[derive(Debug, Clone)]
pub struct BasicOperator {
    id: String,
    type_name: String,
    span: Span,
}

impl BasicOperator {
    pub fn new(id: String, type_name: String) -> Self {
        let span = operator_span(&id, &type_name);
        Self {
            id,
            type_name,
            span,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

/// `Operator`의 식별 메서드를 내부 필드에 위임합니다.
macro_rules! delegate_basic {
    ($($field:ident).+) => {
        fn id(&self) -> &str {
            self.$($field).+.id()
        }

        fn type_name(&self) -> &str {
            self.$($field).+.type_name()
        }

        fn span(&self) -> &tracing::Span {
            self.$($field).+.span()
        }
    };
}

/// `Operator`의 출력 연결 메서드를 내부 [`Writer`](super::writer::Writer)에 위임합니다.
macro_rules! delegate_writer {
    ($($field:ident).+) => {
        fn output_ids(&self) -> Vec<String> {
            self.$($field).+.output_ids().to_vec()
        }

        fn outputs(&self) -> Vec<logweave_core::operator::SharedOperator> {
            self.$($field).+.outputs().to_vec()
        }

        fn set_outputs(
            &self,
            outputs: Vec<logweave_core::operator::SharedOperator>,
        ) -> Result<(), logweave_core::error::PipelineError> {
            self.$($field).+.set_outputs(self.id(), outputs)
        }
    };
}

/// `OperatorBuilder`의 식별 메서드를 설정의 [`BasicConfig`]에 위임합니다.
macro_rules! delegate_builder {
    ($($field:ident).+) => {
        fn id(&self) -> &str {
            self.$($field).+.id()
        }

        fn type_name(&self) -> &str {
            &self.$($field).+.type_name
        }
    };
}

pub(crate) use delegate_basic;
pub(crate) use delegate_builder;
pub(crate) use delegate_writer;
