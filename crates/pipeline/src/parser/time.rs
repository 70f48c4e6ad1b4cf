//! 타임스탬프 파서 오퍼레이터
//!
//! 레코드를 구조화하지 않고 `entry.timestamp`만 설정합니다.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::operator::{Operator, SharedOperator};

use crate::error::BuildError;
use crate::helper::{
    TimeParser, TimeParserConfig, TransformerConfig, TransformerOperator, delegate_basic,
    delegate_builder, delegate_writer,
};
use crate::registry::{BuildContext, OperatorBuilder};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeParserOperatorConfig {
    #[serde(flatten)]
    pub transformer: TransformerConfig,
    #[serde(flatten)]
    pub time: TimeParserConfig,
}

impl OperatorBuilder for TimeParserOperatorConfig {
    delegate_builder!(transformer.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        Ok(vec![Arc::new(TimeParserOperator {
            transformer: self.transformer.build(ctx),
            time: self.time.build()?,
        })])
    }
}

pub struct TimeParserOperator {
    transformer: TransformerOperator,
    time: TimeParser,
}

impl Operator for TimeParserOperator {
    delegate_basic!(transformer.basic);
    delegate_writer!(transformer.writer);

    fn can_process(&self) -> bool {
        true
    }

    fn can_output(&self) -> bool {
        true
    }

    async fn process(&self, cancel: &CancellationToken, entry: Entry) -> Result<(), OperatorError> {
        self.transformer
            .process_with(cancel, entry, |entry| self.time.parse(entry))
            .await
    }
}
