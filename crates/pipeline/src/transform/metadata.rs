//! 레이블과 태그를 추가하는 변환
//!
//! 값은 `{{ 표현식 }}` 템플릿이며 엔트리마다 평가됩니다.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::operator::{Operator, SharedOperator};

use crate::error::BuildError;
use crate::expr::ExprString;
use crate::helper::{TransformerConfig, TransformerOperator, delegate_basic, delegate_builder, delegate_writer};
use crate::registry::{BuildContext, OperatorBuilder};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(flatten)]
    pub transformer: TransformerConfig,
    #[serde(default)]
    pub labels: BTreeMap<String, ExprString>,
    #[serde(default)]
    pub tags: Vec<ExprString>,
}

impl OperatorBuilder for MetadataConfig {
    delegate_builder!(transformer.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        Ok(vec![Arc::new(MetadataOperator {
            transformer: self.transformer.build(ctx),
            labels: self.labels.clone(),
            tags: self.tags.clone(),
        })])
    }
}

pub struct MetadataOperator {
    transformer: TransformerOperator,
    labels: BTreeMap<String, ExprString>,
    tags: Vec<ExprString>,
}

impl MetadataOperator {
    /// 모든 템플릿을 먼저 평가한 뒤 한 번에 적용합니다.
    fn apply(&self, entry: &mut Entry) -> Result<(), OperatorError> {
        let mut labels = Vec::with_capacity(self.labels.len());
        for (key, template) in &self.labels {
            labels.push((key.clone(), template.render(entry)?));
        }
        let mut tags = Vec::with_capacity(self.tags.len());
        for template in &self.tags {
            tags.push(template.render(entry)?);
        }

        for (key, value) in labels {
            entry.add_label(key, value);
        }
        for tag in tags {
            if !entry.tags.contains(&tag) {
                entry.tags.push(tag);
            }
        }
        Ok(())
    }
}

impl Operator for MetadataOperator {
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
            .process_with(cancel, entry, |entry| self.apply(entry))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use logweave_core::value::Value;
    use serde_json::json;

    fn metadata(yaml: &str) -> MetadataOperator {
        let config: MetadataConfig = serde_yaml::from_str(yaml).unwrap();
        let registry = Registry::empty();
        MetadataOperator {
            transformer: config.transformer.build(&BuildContext::new(&registry)),
            labels: config.labels,
            tags: config.tags,
        }
    }

    #[test]
    fn templated_labels_and_tags() {
        let op = metadata(
            "type: metadata\nlabels:\n  env: prod\n  host: 'web-{{ $.host }}'\ntags: ['{{ $.kind }}', static]",
        );
        let mut entry = Entry::with_record(Value::from(json!({"host": "7", "kind": "audit"})));
        op.apply(&mut entry).unwrap();

        assert_eq!(entry.labels["env"], "prod");
        assert_eq!(entry.labels["host"], "web-7");
        assert_eq!(entry.tags, vec!["audit", "static"]);
    }

    #[test]
    fn failed_template_leaves_entry_untouched() {
        let op = metadata("type: metadata\nlabels:\n  a: ok\n  b: '{{ $.n + true }}'");
        let original = Entry::with_record(Value::from(json!({"n": 1})));
        let mut entry = original.clone();
        assert!(op.apply(&mut entry).is_err());
        assert_eq!(entry, original);
    }
}
