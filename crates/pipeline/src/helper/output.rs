//! 출력 오퍼레이터 믹스인
//!
//! 출력은 하위 오퍼레이터를 갖지 않습니다.

use serde::{Deserialize, Serialize};

use logweave_core::metrics::{ENTRIES_PROCESSED_TOTAL, LABEL_OPERATOR};

use super::basic::{BasicConfig, BasicOperator};
use crate::registry::BuildContext;

/// 출력 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(flatten)]
    pub basic: BasicConfig,
}

impl OutputConfig {
    pub fn build(&self, ctx: &BuildContext<'_>) -> OutputOperator {
        OutputOperator {
            basic: self.basic.build(ctx),
        }
    }
}

/// 빌드된 출력 공통부
pub struct OutputOperator {
    pub basic: BasicOperator,
}

impl OutputOperator {
    pub fn id(&self) -> &str {
        self.basic.id()
    }

    /// 처리 완료를 기록합니다.
    pub fn record_delivered(&self) {
        metrics::counter!(ENTRIES_PROCESSED_TOTAL, LABEL_OPERATOR => self.id().to_owned())
            .increment(1);
    }
}
