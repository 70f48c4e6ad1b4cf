//! 설정된 엔트리를 반복해서 내보내는 입력
//!
//! `count`가 0이면 정지될 때까지 계속 생성합니다. `static`이 아니면 매번 현재 시각을 씁니다.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use logweave_core::entry::{Entry, Severity};
use logweave_core::error::OperatorError;
use logweave_core::field::Field;
use logweave_core::operator::{Operator, SharedOperator, StartContext};
use logweave_core::value::Value;

use crate::error::BuildError;
use crate::helper::{InputConfig, InputOperator, Workers, delegate_basic, delegate_builder, delegate_writer};
use crate::registry::{BuildContext, OperatorBuilder};

/// 생성할 엔트리 템플릿
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratedEntry {
    #[serde(default)]
    pub record: Value,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl GeneratedEntry {
    fn to_entry(&self) -> Entry {
        let mut entry = Entry::with_record(self.record.clone());
        entry.labels = self.labels.clone();
        entry.tags = self.tags.clone();
        entry.severity = self.severity;
        if let Some(timestamp) = self.timestamp {
            entry.timestamp = timestamp;
        }
        entry
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateInputConfig {
    #[serde(flatten)]
    pub input: InputConfig,
    #[serde(default)]
    pub entry: GeneratedEntry,
    #[serde(default)]
    pub count: u64,
    #[serde(default, rename = "static")]
    pub is_static: bool,
}

impl OperatorBuilder for GenerateInputConfig {
    delegate_builder!(input.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        Ok(vec![Arc::new(GenerateInput {
            shared: Arc::new(Shared {
                input: self.input.build(ctx, Field::root()),
                template: self.entry.to_entry(),
                count: self.count,
                is_static: self.is_static,
            }),
            workers: Workers::new(),
        })])
    }
}

struct Shared {
    input: InputOperator,
    template: Entry,
    count: u64,
    is_static: bool,
}

pub struct GenerateInput {
    shared: Arc<Shared>,
    workers: Workers,
}

impl Operator for GenerateInput {
    delegate_basic!(shared.input.basic);
    delegate_writer!(shared.input.writer);

    fn can_process(&self) -> bool {
        false
    }

    fn can_output(&self) -> bool {
        true
    }

    async fn start(&self, ctx: StartContext) -> Result<(), OperatorError> {
        let cancel = self.workers.start(&ctx.cancel);
        self.workers
            .spawn(self.span(), generate(Arc::clone(&self.shared), cancel));
        Ok(())
    }

    async fn stop(&self) -> Result<(), OperatorError> {
        self.workers.stop(self.span()).await;
        Ok(())
    }

    async fn process(&self, _cancel: &CancellationToken, _entry: Entry) -> Result<(), OperatorError> {
        Err(self.shared.input.cannot_process())
    }
}

async fn generate(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut sent = 0u64;
    while !cancel.is_cancelled() {
        let mut entry = shared.template.clone();
        if !shared.is_static {
            entry.timestamp = Utc::now();
        }
        if let Err(e) = shared.input.write(&cancel, entry).await {
            tracing::warn!(error = %e, "failed to deliver generated entry");
        }

        sent += 1;
        if sent == shared.count {
            tracing::debug!(count = sent, "generated all entries");
            return;
        }
        tokio::task::yield_now().await;
    }
}
