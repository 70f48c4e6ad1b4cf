//! 엔트리를 그대로 전달하는 변환

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::operator::{Operator, SharedOperator};

use crate::error::BuildError;
use crate::helper::{TransformerConfig, TransformerOperator, delegate_basic, delegate_builder, delegate_writer};
use crate::registry::{BuildContext, OperatorBuilder};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoopConfig {
    #[serde(flatten)]
    pub transformer: TransformerConfig,
}

impl OperatorBuilder for NoopConfig {
    delegate_builder!(transformer.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        Ok(vec![Arc::new(NoopOperator {
            transformer: self.transformer.build(ctx),
        })])
    }
}

pub struct NoopOperator {
    transformer: TransformerOperator,
}

impl Operator for NoopOperator {
    delegate_basic!(transformer.basic);
    delegate_writer!(transformer.writer);

    fn can_process(&self) -> bool {
        true
    }

    fn can_output(&self) -> bool {
        true
    }

    async fn process(&self, cancel: &CancellationToken, entry: Entry) -> Result<(), OperatorError> {
        self.transformer.writer.write(cancel, entry).await
    }
}
