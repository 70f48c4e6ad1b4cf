//! JSON 파서
//!
//! 문자열 또는 바이트 값을 JSON 객체로 디코딩합니다. 객체가 아니면 엔트리 오류입니다.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::operator::{Operator, SharedOperator};
use logweave_core::value::Value;

use crate::error::BuildError;
use crate::helper::{ParserConfig, ParserOperator, delegate_basic, delegate_builder, delegate_writer};
use crate::registry::{BuildContext, OperatorBuilder};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonParserConfig {
    #[serde(flatten)]
    pub parser: ParserConfig,
}

impl OperatorBuilder for JsonParserConfig {
    delegate_builder!(parser.transformer.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        Ok(vec![Arc::new(JsonParser {
            parser: self.parser.build(ctx)?,
        })])
    }
}

pub struct JsonParser {
    parser: ParserOperator,
}

/// 값을 JSON 객체로 디코딩합니다.
pub fn parse_json(value: Value) -> Result<Value, OperatorError> {
    let decoded: serde_json::Value = match &value {
        Value::String(s) => serde_json::from_str(s),
        Value::Bytes(b) => serde_json::from_slice(b),
        other => {
            return Err(OperatorError::entry(format!(
                "type {} cannot be parsed as JSON",
                other.type_name()
            )));
        }
    }
    .map_err(|e| OperatorError::entry(format!("failed to decode JSON: {e}")))?;

    if !decoded.is_object() {
        return Err(OperatorError::entry("decoded JSON is not an object"));
    }
    Ok(Value::from(decoded))
}

impl Operator for JsonParser {
    delegate_basic!(parser.transformer.basic);
    delegate_writer!(parser.transformer.writer);

    fn can_process(&self) -> bool {
        true
    }

    fn can_output(&self) -> bool {
        true
    }

    async fn process(&self, cancel: &CancellationToken, entry: Entry) -> Result<(), OperatorError> {
        self.parser.process_with(cancel, entry, parse_json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::testutil::Collector;
    use serde_json::json;

    fn build(yaml: &str) -> (SharedOperator, Arc<Collector>) {
        let config: JsonParserConfig = serde_yaml::from_str(yaml).unwrap();
        let registry = Registry::empty();
        let op = config.build(&BuildContext::new(&registry)).unwrap().remove(0);
        let out = Arc::new(Collector::new("out"));
        op.set_outputs(vec![out.clone()]).unwrap();
        (op, out)
    }

    #[test]
    fn object_is_decoded() {
        let parsed = parse_json(Value::from(r#"{"a": 1, "b": {"c": "x"}}"#)).unwrap();
        assert_eq!(parsed.to_json(), json!({"a": 1, "b": {"c": "x"}}));
    }

    #[test]
    fn bytes_are_accepted() {
        let parsed = parse_json(Value::Bytes(br#"{"k":true}"#.to_vec())).unwrap();
        assert_eq!(parsed.to_json(), json!({"k": true}));
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(parse_json(Value::from("[1,2]")).unwrap_err().is_user());
        assert!(parse_json(Value::from("not json")).unwrap_err().is_user());
        assert!(parse_json(Value::Int(3)).unwrap_err().is_user());
    }

    #[tokio::test]
    async fn parses_message_into_record() {
        let (op, out) = build("type: json_parser\nparse_from: message\noutput: out");
        let entry = Entry::with_record(Value::from(json!({"message": r#"{"user":"kim","n":2}"#})));
        op.process(&CancellationToken::new(), entry).await.unwrap();

        let got = out.entries();
        assert_eq!(got[0].record.to_json(), json!({"user": "kim", "n": 2}));
    }

    #[tokio::test]
    async fn invalid_json_is_sent_unchanged_by_default() {
        let (op, out) = build("type: json_parser\noutput: out");
        let entry = Entry::with_record("{broken");
        op.process(&CancellationToken::new(), entry.clone()).await.unwrap();
        assert_eq!(out.entries(), vec![entry]);
    }

    #[tokio::test]
    async fn invalid_json_is_dropped_when_configured() {
        let (op, out) = build("type: json_parser\non_error: drop\noutput: out");
        op.process(&CancellationToken::new(), Entry::with_record("{broken"))
            .await
            .unwrap();
        assert!(out.entries().is_empty());
    }
}
