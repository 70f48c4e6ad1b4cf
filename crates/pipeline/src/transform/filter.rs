//! 표현식과 일치하는 엔트리를 버리는 변환
//!
//! `drop_ratio`가 1보다 작으면 일치한 엔트리 중 그 비율만큼만 확률적으로 버립니다.

use std::sync::Arc;

use rand::Rng as _;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::metrics::{ENTRIES_DROPPED_TOTAL, LABEL_OPERATOR, LABEL_REASON};
use logweave_core::operator::{Operator, SharedOperator};

use crate::error::BuildError;
use crate::expr::Expression;
use crate::helper::{TransformerConfig, TransformerOperator, delegate_basic, delegate_builder, delegate_writer};
use crate::registry::{BuildContext, OperatorBuilder};

fn default_drop_ratio() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(flatten)]
    pub transformer: TransformerConfig,
    pub expr: Expression,
    #[serde(default = "default_drop_ratio")]
    pub drop_ratio: f64,
}

impl OperatorBuilder for FilterConfig {
    delegate_builder!(transformer.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        if !(0.0..=1.0).contains(&self.drop_ratio) {
            return Err(BuildError::config(
                "drop_ratio",
                format!("must be between 0.0 and 1.0, got {}", self.drop_ratio),
            ));
        }
        Ok(vec![Arc::new(FilterOperator {
            transformer: self.transformer.build(ctx),
            expr: self.expr.clone(),
            drop_ratio: self.drop_ratio,
        })])
    }
}

pub struct FilterOperator {
    transformer: TransformerOperator,
    expr: Expression,
    drop_ratio: f64,
}

impl FilterOperator {
    fn should_drop(&self) -> bool {
        self.drop_ratio >= 1.0 || rand::rng().random::<f64>() < self.drop_ratio
    }
}

impl Operator for FilterOperator {
    delegate_basic!(transformer.basic);
    delegate_writer!(transformer.writer);

    fn can_process(&self) -> bool {
        true
    }

    fn can_output(&self) -> bool {
        true
    }

    async fn process(&self, cancel: &CancellationToken, entry: Entry) -> Result<(), OperatorError> {
        let matched = match self.expr.evaluate_bool(&entry) {
            Ok(matched) => matched,
            Err(e) => {
                return self
                    .transformer
                    .handle_entry_error(cancel, entry, e.into())
                    .await;
            }
        };

        if matched && self.should_drop() {
            metrics::counter!(
                ENTRIES_DROPPED_TOTAL,
                LABEL_OPERATOR => self.transformer.id().to_owned(),
                LABEL_REASON => "filter"
            )
            .increment(1);
            return Ok(());
        }
        self.transformer.writer.write(cancel, entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::testutil::Collector;
    use logweave_core::value::Value;
    use serde_json::json;

    fn filter(yaml: &str) -> (SharedOperator, Arc<Collector>) {
        let config: FilterConfig = serde_yaml::from_str(yaml).unwrap();
        let registry = Registry::empty();
        let op = config.build(&BuildContext::new(&registry)).unwrap().remove(0);
        let out = Arc::new(Collector::new("out"));
        op.set_outputs(vec![out.clone()]).unwrap();
        (op, out)
    }

    #[tokio::test]
    async fn matching_entries_are_dropped() {
        let (op, out) = filter("type: filter\noutput: out\nexpr: '$.level == \"debug\"'");
        let cancel = CancellationToken::new();
        op.process(&cancel, Entry::with_record(Value::from(json!({"level": "debug"}))))
            .await
            .unwrap();
        op.process(&cancel, Entry::with_record(Value::from(json!({"level": "info"}))))
            .await
            .unwrap();

        let seen = out.entries();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].record, Value::from(json!({"level": "info"})));
    }

    #[tokio::test]
    async fn zero_ratio_keeps_everything() {
        let (op, out) = filter("type: filter\noutput: out\nexpr: 'true'\ndrop_ratio: 0.0");
        for _ in 0..20 {
            op.process(&CancellationToken::new(), Entry::new()).await.unwrap();
        }
        assert_eq!(out.len(), 20);
    }

    #[tokio::test]
    async fn non_bool_result_follows_on_error() {
        let (op, out) = filter("type: filter\noutput: out\nexpr: '$.level'\non_error: drop");
        op.process(&CancellationToken::new(), Entry::with_record(Value::from(json!({"level": "x"}))))
            .await
            .unwrap();
        assert_eq!(out.len(), 0);
    }

    #[test]
    fn ratio_out_of_range_is_rejected() {
        let config: FilterConfig =
            serde_yaml::from_str("type: filter\nexpr: 'true'\ndrop_ratio: 1.5").unwrap();
        let registry = Registry::empty();
        assert!(config.build(&BuildContext::new(&registry)).is_err());
    }
}
