//! 변환 오퍼레이터 믹스인과 `on_error` 정책
//!
//! 사용자 에러([`OperatorError::Entry`])만 정책의 대상입니다.
//! - `send`: 경고 후 원래 엔트리를 하위로 전달
//! - `drop`: 경고 후 버림
//! - `fail`: 호출자에게 에러 반환
//!
//! 시스템 에러는 정책과 무관하게 호출자에게 반환됩니다.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::metrics::{
    ENTRIES_DROPPED_TOTAL, LABEL_OPERATOR, LABEL_REASON, PROCESS_ERRORS_TOTAL,
};

use super::basic::BasicOperator;
use super::writer::{Writer, WriterConfig};
use crate::registry::BuildContext;

/// 엔트리 에러 처리 정책
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    #[default]
    Send,
    Drop,
    Fail,
}

impl fmt::Display for OnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnError::Send => f.write_str("send"),
            OnError::Drop => f.write_str("drop"),
            OnError::Fail => f.write_str("fail"),
        }
    }
}

/// 변환 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformerConfig {
    #[serde(flatten)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub on_error: OnError,
}

impl TransformerConfig {
    pub fn build(&self, ctx: &BuildContext<'_>) -> TransformerOperator {
        TransformerOperator {
            basic: self.writer.basic.build(ctx),
            writer: self.writer.build_writer(ctx),
            on_error: self.on_error,
        }
    }
}

/// 빌드된 변환 공통부
pub struct TransformerOperator {
    pub basic: BasicOperator,
    pub writer: Writer,
    pub on_error: OnError,
}

impl TransformerOperator {
    pub fn id(&self) -> &str {
        self.basic.id()
    }

    /// 엔트리를 변환한 뒤 하위로 보냅니다.
    ///
    /// 변환 함수가 실패하면 정책에 따라 처리합니다.
    /// 변환 함수는 실패 시 엔트리를 바꾸지 않아야 합니다.
    pub async fn process_with<F>(
        &self,
        cancel: &CancellationToken,
        mut entry: Entry,
        transform: F,
    ) -> Result<(), OperatorError>
    where
        F: FnOnce(&mut Entry) -> Result<(), OperatorError>,
    {
        match transform(&mut entry) {
            Ok(()) => self.writer.write(cancel, entry).await,
            Err(e) => self.handle_entry_error(cancel, entry, e).await,
        }
    }

    /// `on_error` 정책을 적용합니다.
    pub async fn handle_entry_error(
        &self,
        cancel: &CancellationToken,
        entry: Entry,
        err: OperatorError,
    ) -> Result<(), OperatorError> {
        metrics::counter!(PROCESS_ERRORS_TOTAL, LABEL_OPERATOR => self.id().to_owned())
            .increment(1);

        if !err.is_user() {
            return Err(err);
        }

        tracing::warn!(error = %err, on_error = %self.on_error, "failed to process entry");
        match self.on_error {
            OnError::Send => self.writer.write(cancel, entry).await,
            OnError::Drop => {
                metrics::counter!(
                    ENTRIES_DROPPED_TOTAL,
                    LABEL_OPERATOR => self.id().to_owned(),
                    LABEL_REASON => "on_error"
                )
                .increment(1);
                Ok(())
            }
            OnError::Fail => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Collector;
    use std::sync::Arc;

    fn transformer(on_error: OnError) -> (TransformerOperator, Arc<Collector>) {
        let out = Arc::new(Collector::new("out"));
        let op = TransformerOperator {
            basic: BasicOperator::new("t".into(), "test".into()),
            writer: Writer::new(vec!["out".into()]),
            on_error,
        };
        op.writer.set_outputs("t", vec![out.clone()]).unwrap();
        (op, out)
    }

    #[tokio::test]
    async fn send_forwards_unchanged_entry() {
        let (op, out) = transformer(OnError::Send);
        op.process_with(&CancellationToken::new(), Entry::with_record("raw"), |_| {
            Err(OperatorError::entry("bad"))
        })
        .await
        .unwrap();
        assert_eq!(out.entries()[0].record, "raw".into());
    }

    #[tokio::test]
    async fn drop_discards() {
        let (op, out) = transformer(OnError::Drop);
        op.process_with(&CancellationToken::new(), Entry::new(), |_| {
            Err(OperatorError::entry("bad"))
        })
        .await
        .unwrap();
        assert_eq!(out.len(), 0);
    }

    #[tokio::test]
    async fn fail_returns_error() {
        let (op, out) = transformer(OnError::Fail);
        let err = op
            .process_with(&CancellationToken::new(), Entry::new(), |_| {
                Err(OperatorError::entry("bad"))
            })
            .await
            .unwrap_err();
        assert!(err.is_user());
        assert_eq!(out.len(), 0);
    }

    #[tokio::test]
    async fn system_errors_bypass_policy() {
        let (op, out) = transformer(OnError::Send);
        let err = op
            .process_with(&CancellationToken::new(), Entry::new(), |_| {
                Err(OperatorError::System("disk full".into()))
            })
            .await
            .unwrap_err();
        assert!(!err.is_user());
        assert_eq!(out.len(), 0);
    }

    #[test]
    fn on_error_parses_lowercase() {
        let cfg: TransformerConfig = serde_yaml::from_str("type: noop\non_error: drop").unwrap();
        assert_eq!(cfg.on_error, OnError::Drop);
        assert!(serde_yaml::from_str::<TransformerConfig>("type: noop\non_error: retry").is_err());
    }
}
