//! 표준 출력
//!
//! 프로세스 표준 출력은 모든 stdout 오퍼레이터가 공유합니다.
//! 한 줄은 한 번의 `write_all`로 쓰고 잠금 안에서 flush합니다.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::operator::{Operator, SharedOperator};

use crate::error::BuildError;
use crate::helper::{OutputConfig, OutputOperator, delegate_basic, delegate_builder};
use crate::output::serialize_line;
use crate::registry::{BuildContext, OperatorBuilder};

/// 여러 오퍼레이터가 공유하는 줄 단위 writer
pub type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StdoutConfig {
    #[serde(flatten)]
    pub output: OutputConfig,
}

impl OperatorBuilder for StdoutConfig {
    delegate_builder!(output.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        Ok(vec![Arc::new(StdoutOperator::new(
            self.output.build(ctx),
            process_stdout(),
        ))])
    }
}

fn process_stdout() -> SharedWriter {
    static STDOUT: std::sync::OnceLock<SharedWriter> = std::sync::OnceLock::new();
    Arc::clone(STDOUT.get_or_init(|| Arc::new(Mutex::new(Box::new(tokio::io::stdout())))))
}

pub struct StdoutOperator {
    output: OutputOperator,
    writer: SharedWriter,
}

impl StdoutOperator {
    pub fn new(output: OutputOperator, writer: SharedWriter) -> Self {
        Self { output, writer }
    }
}

impl Operator for StdoutOperator {
    delegate_basic!(output.basic);

    fn can_process(&self) -> bool {
        true
    }

    fn can_output(&self) -> bool {
        false
    }

    async fn process(&self, _cancel: &CancellationToken, entry: Entry) -> Result<(), OperatorError> {
        let line = serialize_line(&entry, None)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        drop(writer);

        self.output.record_delivered();
        Ok(())
    }
}
