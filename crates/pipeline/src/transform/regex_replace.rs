//! 정규식 치환
//!
//! 문자열 필드에서 패턴과 일치하는 모든 부분을 `replace_with`로 바꿉니다.
//! `replace_with` 안의 `$name`, `${1}`은 캡처 그룹으로 확장됩니다.
//!
//! ```yaml
//! - type: regex_replace
//!   field: message
//!   regex: 'password=\S+'
//!   replace_with: 'password=***'
//! ```

use std::sync::Arc;

use ::regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::field::Field;
use logweave_core::operator::{Operator, SharedOperator};
use logweave_core::value::Value;

use crate::error::BuildError;
use crate::helper::{TransformerConfig, TransformerOperator, delegate_basic, delegate_builder, delegate_writer};
use crate::registry::{BuildContext, OperatorBuilder};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegexReplaceConfig {
    #[serde(flatten)]
    pub transformer: TransformerConfig,
    #[serde(default)]
    pub field: Field,
    #[serde(default)]
    pub regex: String,
    #[serde(default)]
    pub replace_with: String,
}

impl OperatorBuilder for RegexReplaceConfig {
    delegate_builder!(transformer.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        if self.regex.is_empty() {
            return Err(BuildError::config("regex", "missing required field"));
        }
        Ok(vec![Arc::new(RegexReplace {
            transformer: self.transformer.build(ctx),
            field: self.field.clone(),
            regex: Regex::new(&self.regex)?,
            replace_with: self.replace_with.clone(),
        })])
    }
}

pub struct RegexReplace {
    transformer: TransformerOperator,
    field: Field,
    regex: Regex,
    replace_with: String,
}

impl RegexReplace {
    fn apply(&self, entry: &mut Entry) -> Result<(), OperatorError> {
        let value = entry.get(&self.field).ok_or_else(|| {
            OperatorError::entry(format!("regex_replace: field '{}' does not exist", self.field))
        })?;
        let text = match &value {
            Value::String(s) => s.as_str(),
            Value::Bytes(b) => std::str::from_utf8(b)
                .map_err(|e| OperatorError::entry(format!("value is not valid UTF-8: {e}")))?,
            other => {
                return Err(OperatorError::entry(format!(
                    "regex_replace: field '{}' is a {} not a string",
                    self.field,
                    other.type_name()
                )));
            }
        };

        let replaced = self.regex.replace_all(text, self.replace_with.as_str());
        entry.set(&self.field, Value::from(replaced.into_owned()))?;
        Ok(())
    }
}

impl Operator for RegexReplace {
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
