//! 정규식 파서
//!
//! 이름 있는 캡처 그룹마다 필드 하나를 만듭니다. 처음 일치한 결과만 사용하며,
//! 일치하지 않거나 참여하지 않은 그룹은 건너뜁니다.

use std::sync::Arc;

use ::regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::operator::{Operator, SharedOperator};
use logweave_core::value::{Map, Value};

use crate::error::BuildError;
use crate::helper::{ParserConfig, ParserOperator, delegate_basic, delegate_builder, delegate_writer};
use crate::registry::{BuildContext, OperatorBuilder};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegexParserConfig {
    #[serde(flatten)]
    pub parser: ParserConfig,
    pub regex: String,
}

impl OperatorBuilder for RegexParserConfig {
    delegate_builder!(parser.transformer.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        let regex = compile_named(&self.regex)?;
        Ok(vec![Arc::new(RegexParser {
            parser: self.parser.build(ctx)?,
            regex,
        })])
    }
}

/// 이름 있는 그룹이 하나 이상인 정규식만 허용합니다.
pub fn compile_named(pattern: &str) -> Result<Regex, BuildError> {
    if pattern.is_empty() {
        return Err(BuildError::config("regex", "missing required field"));
    }
    let regex = Regex::new(pattern)?;
    if regex.capture_names().flatten().next().is_none() {
        return Err(BuildError::config(
            "regex",
            "must contain at least one named capture group",
        ));
    }
    Ok(regex)
}

pub struct RegexParser {
    parser: ParserOperator,
    regex: Regex,
}

impl RegexParser {
    pub fn parse(&self, value: Value) -> Result<Value, OperatorError> {
        let text = match &value {
            Value::String(s) => s.as_str(),
            Value::Bytes(b) => std::str::from_utf8(b)
                .map_err(|e| OperatorError::entry(format!("value is not valid UTF-8: {e}")))?,
            other => {
                return Err(OperatorError::entry(format!(
                    "type {} cannot be parsed with a regex",
                    other.type_name()
                )));
            }
        };

        let captures = self
            .regex
            .captures(text)
            .ok_or_else(|| OperatorError::entry("regex pattern does not match"))?;

        let mut fields = Map::new();
        for name in self.regex.capture_names().flatten() {
            if let Some(m) = captures.name(name) {
                fields.insert(name.to_owned(), Value::from(m.as_str()));
            }
        }
        Ok(Value::Map(fields))
    }
}

impl Operator for RegexParser {
    delegate_basic!(parser.transformer.basic);
    delegate_writer!(parser.transformer.writer);

    fn can_process(&self) -> bool {
        true
    }

    fn can_output(&self) -> bool {
        true
    }

    async fn process(&self, cancel: &CancellationToken, entry: Entry) -> Result<(), OperatorError> {
        self.parser
            .process_with(cancel, entry, |value| self.parse(value))
            .await
    }
}
