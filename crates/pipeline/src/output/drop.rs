//! 엔트리를 버리는 출력

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::operator::{Operator, SharedOperator};

use crate::error::BuildError;
use crate::helper::{OutputConfig, OutputOperator, delegate_basic, delegate_builder};
use crate::registry::{BuildContext, OperatorBuilder};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DropOutputConfig {
    #[serde(flatten)]
    pub output: OutputConfig,
}

impl OperatorBuilder for DropOutputConfig {
    delegate_builder!(output.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        Ok(vec![Arc::new(DropOutput {
            output: self.output.build(ctx),
        })])
    }
}

pub struct DropOutput {
    output: OutputOperator,
}

impl Operator for DropOutput {
    delegate_basic!(output.basic);

    fn can_process(&self) -> bool {
        true
    }

    fn can_output(&self) -> bool {
        false
    }

    async fn process(&self, _cancel: &CancellationToken, _entry: Entry) -> Result<(), OperatorError> {
        self.output.record_delivered();
        Ok(())
    }
}
