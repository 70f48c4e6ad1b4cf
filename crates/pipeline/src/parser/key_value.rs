//! 키-값 파서
//!
//! `key=value` 쌍을 공백으로 구분해 읽습니다. 큰따옴표 안의 공백은 구분자가 아니며,
//! 키와 값 양끝의 따옴표는 제거됩니다.
//!
//! ```text
//! name=kim "msg=hello world" code=200
//! → {"name": "kim", "msg": "hello world", "code": "200"}
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::operator::{Operator, SharedOperator};
use logweave_core::value::{Map, Value};

use crate::error::BuildError;
use crate::helper::{ParserConfig, ParserOperator, delegate_basic, delegate_builder, delegate_writer};
use crate::registry::{BuildContext, OperatorBuilder};

pub const DEFAULT_DELIMITER: &str = "=";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyValueParserConfig {
    #[serde(flatten)]
    pub parser: ParserConfig,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

fn default_delimiter() -> String {
    DEFAULT_DELIMITER.to_owned()
}

impl OperatorBuilder for KeyValueParserConfig {
    delegate_builder!(parser.transformer.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        if self.delimiter.is_empty() {
            return Err(BuildError::config("delimiter", "missing required parameter"));
        }
        Ok(vec![Arc::new(KeyValueParser {
            parser: self.parser.build(ctx)?,
            delimiter: self.delimiter.clone(),
        })])
    }
}

pub struct KeyValueParser {
    parser: ParserOperator,
    delimiter: String,
}

impl KeyValueParser {
    pub fn parse(&self, value: Value) -> Result<Value, OperatorError> {
        let text = match &value {
            Value::String(s) => s.as_str(),
            Value::Bytes(b) => std::str::from_utf8(b)
                .map_err(|e| OperatorError::entry(format!("value is not valid UTF-8: {e}")))?,
            other => {
                return Err(OperatorError::entry(format!(
                    "type {} cannot be parsed as key value pairs",
                    other.type_name()
                )));
            }
        };
        if text.is_empty() {
            return Err(OperatorError::entry(format!(
                "parse_from field '{}' is empty",
                self.parser.parse_from()
            )));
        }

        let mut fields = Map::new();
        let mut failures = Vec::new();
        for pair in split_unquoted_spaces(text) {
            let parts: Vec<&str> = pair.split(self.delimiter.as_str()).collect();
            let [key, value] = parts.as_slice() else {
                failures.push(format!(
                    "expected '{pair}' to split by '{}' into two items, got {}",
                    self.delimiter,
                    parts.len()
                ));
                continue;
            };
            fields.insert(clean(key).to_owned(), Value::from(clean(value)));
        }

        if !failures.is_empty() {
            return Err(OperatorError::entry(failures.join("; ")));
        }
        Ok(Value::Map(fields))
    }
}

/// 큰따옴표 밖의 공백으로 나눕니다. 빈 조각은 버립니다.
fn split_unquoted_spaces(input: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ' ' if !quoted => {
                if start < i {
                    pieces.push(&input[start..i]);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < input.len() {
        pieces.push(&input[start..]);
    }
    pieces
}

fn clean(s: &str) -> &str {
    let s = s.strip_prefix('"').unwrap_or(s);
    let s = s.strip_suffix('"').unwrap_or(s);
    s.trim()
}

impl Operator for KeyValueParser {
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
