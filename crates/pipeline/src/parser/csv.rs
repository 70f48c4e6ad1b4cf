//! CSV 파서
//!
//! `header`의 열 이름을 키로, 한 줄의 값을 값으로 하는 맵을 만듭니다.
//! 값 개수가 열 개수와 다르면 엔트리 오류입니다. 큰따옴표로 감싼 값 안의
//! 구분자와 줄바꿈은 값의 일부이고, `""`는 따옴표 하나입니다.

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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvParserConfig {
    #[serde(flatten)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub header: String,
    /// 기본값은 `delimiter`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_delimiter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
}

/// 정확히 한 글자인 구분자만 허용합니다.
fn single_char(field: &str, value: &str) -> Result<char, BuildError> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c != '"' && c != '\n' && c != '\r' => Ok(c),
        _ => Err(BuildError::config(field, format!("invalid delimiter '{value}'"))),
    }
}

impl OperatorBuilder for CsvParserConfig {
    delegate_builder!(parser.transformer.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        Ok(vec![Arc::new(self.build_parser(ctx)?)])
    }
}

impl CsvParserConfig {
    pub fn build_parser(&self, ctx: &BuildContext<'_>) -> Result<CsvParser, BuildError> {
        if self.header.is_empty() {
            return Err(BuildError::config("header", "missing required field"));
        }
        let delimiter = single_char("delimiter", self.delimiter.as_deref().unwrap_or(","))?;
        let header_delimiter = match &self.header_delimiter {
            Some(d) => single_char("header_delimiter", d)?,
            None => delimiter,
        };
        if !self.header.contains(header_delimiter) {
            return Err(BuildError::config("header", "missing header delimiter in header"));
        }

        Ok(CsvParser {
            parser: self.parser.build(ctx)?,
            columns: self.header.split(header_delimiter).map(str::to_owned).collect(),
            delimiter,
        })
    }
}

pub struct CsvParser {
    parser: ParserOperator,
    columns: Vec<String>,
    delimiter: char,
}

impl CsvParser {
    pub fn parse(&self, value: Value) -> Result<Value, OperatorError> {
        let text = match &value {
            Value::String(s) => s.as_str(),
            Value::Bytes(b) => std::str::from_utf8(b)
                .map_err(|e| OperatorError::entry(format!("value is not valid UTF-8: {e}")))?,
            other => {
                return Err(OperatorError::entry(format!(
                    "type {} cannot be parsed as csv",
                    other.type_name()
                )));
            }
        };

        // 여러 줄이면 마지막 레코드가 남습니다.
        let mut fields = Map::new();
        for (line, record) in read_records(text, self.delimiter)?.into_iter().enumerate() {
            if record.len() != self.columns.len() {
                return Err(OperatorError::entry(format!(
                    "record {}: wrong number of fields, expected {} got {}",
                    line + 1,
                    self.columns.len(),
                    record.len()
                )));
            }
            for (column, value) in self.columns.iter().zip(record) {
                fields.insert(column.clone(), Value::from(value));
            }
        }
        Ok(Value::Map(fields))
    }
}

/// 텍스트를 레코드 목록으로 나눕니다. 빈 줄은 건너뜁니다.
fn read_records(text: &str, delimiter: char) -> Result<Vec<Vec<String>>, OperatorError> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut chars = text.chars().peekable();
    // 현재 필드가 따옴표로 시작했는지, 필드에 글자가 있었는지
    let mut quoted = false;
    let mut started = false;

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => {
                    quoted = false;
                    match chars.peek() {
                        None | Some('\n' | '\r') => {}
                        Some(&next) if next == delimiter => {}
                        Some(_) => {
                            return Err(OperatorError::entry(
                                "extraneous or missing \" in quoted-field",
                            ));
                        }
                    }
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if !started => {
                quoted = true;
                started = true;
            }
            '"' => return Err(OperatorError::entry("bare \" in non-quoted-field")),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                if started || !record.is_empty() {
                    record.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut record));
                }
                started = false;
            }
            c if c == delimiter => {
                record.push(std::mem::take(&mut field));
                started = false;
            }
            _ => {
                field.push(c);
                started = true;
            }
        }
    }

    if quoted {
        return Err(OperatorError::entry("extraneous or missing \" in quoted-field"));
    }
    if started || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

impl Operator for CsvParser {
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
