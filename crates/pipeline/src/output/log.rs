//! 에이전트 자체 로그로 엔트리를 내보내는 출력
//!
//! 엔트리 심각도에 맞는 tracing 레벨로 기록하며 엔트리 JSON은 `entry` 필드에 담습니다.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Level;

use logweave_core::entry::{Entry, Severity};
use logweave_core::error::OperatorError;
use logweave_core::operator::{Operator, SharedOperator};

use crate::error::BuildError;
use crate::helper::{OutputConfig, OutputOperator, delegate_basic, delegate_builder};
use crate::registry::{BuildContext, OperatorBuilder};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogOutputConfig {
    #[serde(flatten)]
    pub output: OutputConfig,
}

impl OperatorBuilder for LogOutputConfig {
    delegate_builder!(output.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        Ok(vec![Arc::new(LogOutput {
            output: self.output.build(ctx),
        })])
    }
}

pub struct LogOutput {
    output: OutputOperator,
}

/// 심각도 → tracing 레벨. 심각도가 없으면 INFO입니다.
pub fn level_for(severity: Severity) -> Level {
    if severity >= Severity::ERROR {
        Level::ERROR
    } else if severity >= Severity::WARNING {
        Level::WARN
    } else if severity >= Severity::INFO || severity == Severity::DEFAULT {
        Level::INFO
    } else if severity >= Severity::DEBUG {
        Level::DEBUG
    } else {
        Level::TRACE
    }
}

impl Operator for LogOutput {
    delegate_basic!(output.basic);

    fn can_process(&self) -> bool {
        true
    }

    fn can_output(&self) -> bool {
        false
    }

    async fn process(&self, _cancel: &CancellationToken, entry: Entry) -> Result<(), OperatorError> {
        let json = serde_json::to_string(&entry)
            .map_err(|e| OperatorError::entry(format!("failed to serialize entry: {e}")))?;

        let level = level_for(entry.severity);
        if level == Level::ERROR {
            tracing::error!(entry = %json, "log entry");
        } else if level == Level::WARN {
            tracing::warn!(entry = %json, "log entry");
        } else if level == Level::INFO {
            tracing::info!(entry = %json, "log entry");
        } else if level == Level::DEBUG {
            tracing::debug!(entry = %json, "log entry");
        } else {
            tracing::trace!(entry = %json, "log entry");
        }
        self.output.record_delivered();
        Ok(())
    }
}
