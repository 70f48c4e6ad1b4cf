//! 입력 오퍼레이터 믹스인
//!
//! 입력은 `start`에서 워커를 띄우고, 읽은 값을 `write_to` 필드에 넣은 엔트리를 하위로 보냅니다.
//! 입력은 엔트리를 처리할 수 없습니다.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::field::Field;
use logweave_core::metrics::{ENTRIES_INGESTED_TOTAL, LABEL_OPERATOR};
use logweave_core::value::Value;

use super::basic::BasicOperator;
use super::writer::{Writer, WriterConfig};
use crate::registry::BuildContext;

/// 입력 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(flatten)]
    pub writer: WriterConfig,
    /// 읽은 값을 쓸 필드. 지정하지 않으면 입력별 기본값을 사용합니다.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_to: Option<Field>,
}

impl InputConfig {
    pub fn build(&self, ctx: &BuildContext<'_>, default_write_to: Field) -> InputOperator {
        InputOperator {
            basic: self.writer.basic.build(ctx),
            writer: self.writer.build_writer(ctx),
            write_to: self.write_to.clone().unwrap_or(default_write_to),
        }
    }
}

/// 빌드된 입력 공통부
pub struct InputOperator {
    pub basic: BasicOperator,
    pub writer: Writer,
    pub write_to: Field,
}

impl InputOperator {
    pub fn id(&self) -> &str {
        self.basic.id()
    }

    /// `write_to`에 값을 넣은 새 엔트리를 만듭니다.
    pub fn new_entry(&self, value: impl Into<Value>) -> Result<Entry, OperatorError> {
        let mut entry = Entry::new();
        entry.set(&self.write_to, value)?;
        Ok(entry)
    }

    /// 엔트리를 하위로 보냅니다.
    pub async fn write(&self, cancel: &CancellationToken, entry: Entry) -> Result<(), OperatorError> {
        metrics::counter!(ENTRIES_INGESTED_TOTAL, LABEL_OPERATOR => self.basic.id().to_owned())
            .increment(1);
        self.writer.write(cancel, entry).await
    }

    /// 입력에 `process`가 호출되면 반환하는 에러
    pub fn cannot_process(&self) -> OperatorError {
        OperatorError::CannotProcess {
            operator: self.basic.id().to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    #[test]
    fn write_to_uses_input_default() {
        let config: InputConfig = serde_yaml::from_str("type: tcp_input").unwrap();
        let registry = Registry::empty();
        let op = config.build(&BuildContext::new(&registry), Field::record(["message"]));
        let entry = op.new_entry("line").unwrap();
        assert_eq!(
            serde_json::to_value(&entry.record).unwrap(),
            serde_json::json!({"message": "line"})
        );
    }

    #[test]
    fn explicit_write_to_wins() {
        let config: InputConfig =
            serde_yaml::from_str("type: tcp_input\nwrite_to: $record").unwrap();
        let registry = Registry::empty();
        let op = config.build(&BuildContext::new(&registry), Field::record(["message"]));
        let entry = op.new_entry("line").unwrap();
        assert_eq!(entry.record, Value::from("line"));
    }
}
