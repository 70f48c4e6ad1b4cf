//! 하위 오퍼레이터로 엔트리를 전달하는 writer 믹스인
//!
//! 팬아웃 시 마지막 수신자를 제외한 각 수신자에게 엔트리를 복제해 보냅니다.
//! 한 수신자의 에러가 나머지 전달을 막지 않습니다.

use std::sync::OnceLock;

use serde::{Deserialize, Deserializer, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use logweave_core::entry::Entry;
use logweave_core::error::{OperatorError, PipelineError};
use logweave_core::operator::SharedOperator;

use super::basic::BasicConfig;
use crate::registry::BuildContext;

/// 출력 ID 목록. 설정에서는 문자열 하나 또는 배열입니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutputIds(pub Vec<String>);

impl<'de> Deserialize<'de> for OutputIds {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }

        Ok(match Option::<Raw>::deserialize(deserializer)? {
            None => OutputIds::default(),
            Some(Raw::One(id)) => OutputIds(vec![id]),
            Some(Raw::Many(ids)) => OutputIds(ids),
        })
    }
}

impl OutputIds {
    /// 각 ID에 네임스페이스를 붙입니다.
    pub fn namespaced(&self, ctx: &BuildContext<'_>) -> Vec<String> {
        self.0.iter().map(|id| ctx.prepend_namespace(id)).collect()
    }
}

/// writer 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriterConfig {
    #[serde(flatten)]
    pub basic: BasicConfig,
    #[serde(default)]
    pub output: OutputIds,
}

impl WriterConfig {
    /// 출력이 없으면 컨텍스트의 기본 출력을 사용합니다.
    pub fn build_writer(&self, ctx: &BuildContext<'_>) -> Writer {
        let ids = if self.output.0.is_empty() {
            ctx.default_outputs.clone()
        } else {
            self.output.namespaced(ctx)
        };
        Writer::new(ids)
    }
}

/// 하위 오퍼레이터 연결과 전달
#[derive(Default)]
pub struct Writer {
    output_ids: Vec<String>,
    outputs: OnceLock<Vec<SharedOperator>>,
}

impl Writer {
    pub fn new(output_ids: Vec<String>) -> Self {
        Self {
            output_ids,
            outputs: OnceLock::new(),
        }
    }

    pub fn output_ids(&self) -> &[String] {
        &self.output_ids
    }

    pub fn outputs(&self) -> &[SharedOperator] {
        self.outputs.get().map(Vec::as_slice).unwrap_or(&[])
    }

    /// 해석된 하위 오퍼레이터를 연결합니다. 한 번만 가능합니다.
    pub fn set_outputs(
        &self,
        operator: &str,
        outputs: Vec<SharedOperator>,
    ) -> Result<(), PipelineError> {
        self.outputs
            .set(outputs)
            .map_err(|_| PipelineError::InitFailed(format!("outputs of '{operator}' already set")))
    }

    /// 모든 하위 오퍼레이터에 엔트리를 전달합니다.
    ///
    /// 개별 수신자의 에러는 로그로 남기고 계속 진행하며, 첫 번째 에러를 반환합니다.
    pub async fn write(&self, cancel: &CancellationToken, entry: Entry) -> Result<(), OperatorError> {
        let outputs = self.outputs();
        let Some((last, rest)) = outputs.split_last() else {
            return Ok(());
        };

        let mut first_error = None;
        for output in rest {
            if let Err(e) = deliver(output, cancel, entry.clone()).await {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = deliver(last, cancel, entry).await {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn deliver(
    output: &SharedOperator,
    cancel: &CancellationToken,
    entry: Entry,
) -> Result<(), OperatorError> {
    let result = output
        .process(cancel, entry)
        .instrument(output.span().clone())
        .await;
    if let Err(e) = &result {
        if !matches!(e, OperatorError::Cancelled) {
            tracing::warn!(output = output.id(), error = %e, "downstream operator returned an error");
        }
    }
    result
}
