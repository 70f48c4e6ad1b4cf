//! 심각도 파서 오퍼레이터

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::operator::{Operator, SharedOperator};

use crate::error::BuildError;
use crate::helper::{
    SeverityParser, SeverityParserConfig, TransformerConfig, TransformerOperator, delegate_basic,
    delegate_builder, delegate_writer,
};
use crate::registry::{BuildContext, OperatorBuilder};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityParserOperatorConfig {
    #[serde(flatten)]
    pub transformer: TransformerConfig,
    #[serde(flatten)]
    pub severity: SeverityParserConfig,
}

impl OperatorBuilder for SeverityParserOperatorConfig {
    delegate_builder!(transformer.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        Ok(vec![Arc::new(SeverityParserOperator {
            transformer: self.transformer.build(ctx),
            severity: self.severity.build()?,
        })])
    }
}

pub struct SeverityParserOperator {
    transformer: TransformerOperator,
    severity: SeverityParser,
}

impl Operator for SeverityParserOperator {
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
            .process_with(cancel, entry, |entry| self.severity.parse(entry))
            .await
    }
}
