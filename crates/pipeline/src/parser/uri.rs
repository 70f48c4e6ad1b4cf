//! URI 파서
//!
//! 절대 URI, `/`로 시작하는 요청 경로, `?`로 시작하는 쿼리 문자열을 받습니다.
//! 결과 키: `scheme`, `user`, `host`, `port`, `path`, `query`.
//! 비어 있는 구성 요소는 생략하고, 쿼리는 이름별 값 배열로 모읍니다.
//! 스킴의 기본 포트는 정규화되어 `port`에 나오지 않습니다.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::operator::{Operator, SharedOperator};
use logweave_core::value::{Map, Value};

use crate::error::BuildError;
use crate::helper::{ParserConfig, ParserOperator, delegate_basic, delegate_builder, delegate_writer};
use crate::registry::{BuildContext, OperatorBuilder};

/// 요청 경로를 해석할 때 쓰는 임시 기준 주소
const PATH_BASE: &str = "http://localhost";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UriParserConfig {
    #[serde(flatten)]
    pub parser: ParserConfig,
}

impl OperatorBuilder for UriParserConfig {
    delegate_builder!(parser.transformer.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        Ok(vec![Arc::new(UriParser {
            parser: self.parser.build(ctx)?,
        })])
    }
}

pub struct UriParser {
    parser: ParserOperator,
}

/// 값을 URI 구성 요소 맵으로 나눕니다.
pub fn parse_uri(value: Value) -> Result<Value, OperatorError> {
    let text = match &value {
        Value::String(s) => s.as_str(),
        Value::Bytes(b) => std::str::from_utf8(b)
            .map_err(|e| OperatorError::entry(format!("value is not valid UTF-8: {e}")))?,
        other => {
            return Err(OperatorError::entry(format!(
                "type {} cannot be parsed as URI",
                other.type_name()
            )));
        }
    };

    let mut fields = Map::new();
    if let Some(query) = text.strip_prefix('?') {
        insert_query(&mut fields, url::form_urlencoded::parse(query.as_bytes()));
        return Ok(Value::Map(fields));
    }

    let invalid = |e: url::ParseError| OperatorError::entry(format!("invalid URI '{text}': {e}"));
    if text.starts_with('/') {
        let base = Url::parse(PATH_BASE).map_err(invalid)?;
        let url = base.join(text).map_err(invalid)?;
        fields.insert("path".into(), Value::from(url.path()));
        insert_query(&mut fields, url.query_pairs());
        return Ok(Value::Map(fields));
    }

    let url = Url::parse(text).map_err(invalid)?;
    fields.insert("scheme".into(), Value::from(url.scheme()));
    if !url.username().is_empty() {
        fields.insert("user".into(), Value::from(url.username()));
    }
    if let Some(host) = url.host_str() {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if !host.is_empty() {
            fields.insert("host".into(), Value::from(host));
        }
    }
    if let Some(port) = url.port() {
        fields.insert("port".into(), Value::from(port.to_string()));
    }
    // 경로 없는 `scheme://host`는 `/`로 정규화되므로 입력에 경로가 있을 때만 씁니다.
    if has_explicit_path(text) && !url.path().is_empty() {
        fields.insert("path".into(), Value::from(url.path()));
    }
    insert_query(&mut fields, url.query_pairs());
    Ok(Value::Map(fields))
}

fn has_explicit_path(text: &str) -> bool {
    let Some((_, rest)) = text.split_once("://") else {
        return true;
    };
    let authority_and_path = rest.split(['?', '#']).next().unwrap_or_default();
    authority_and_path.contains('/')
}

fn insert_query<'a, I>(fields: &mut Map, pairs: I)
where
    I: Iterator<Item = (std::borrow::Cow<'a, str>, std::borrow::Cow<'a, str>)>,
{
    let mut query = Map::new();
    for (name, value) in pairs {
        let slot = query
            .entry(name.into_owned())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(values) = slot {
            values.push(Value::from(value.into_owned()));
        }
    }
    if !query.is_empty() {
        fields.insert("query".into(), Value::Map(query));
    }
}

impl Operator for UriParser {
    delegate_basic!(parser.transformer.basic);
    delegate_writer!(parser.transformer.writer);

    fn can_process(&self) -> bool {
        true
    }

    fn can_output(&self) -> bool {
        true
    }

    async fn process(&self, cancel: &CancellationToken, entry: Entry) -> Result<(), OperatorError> {
        self.parser.process_with(cancel, entry, parse_uri).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::testutil::Collector;
    use serde_json::json;

    fn parsed(text: &str) -> serde_json::Value {
        parse_uri(Value::from(text)).unwrap().to_json()
    }

    #[test]
    fn absolute_uri() {
        assert_eq!(
            parsed("https://dev:pw@example.com:8443/app/login?user=kim&tag=a&tag=b"),
            json!({
                "scheme": "https",
                "user": "dev",
                "host": "example.com",
                "port": "8443",
                "path": "/app/login",
                "query": {"user": ["kim"], "tag": ["a", "b"]}
            })
        );
    }

    #[test]
    fn host_only_has_no_path() {
        assert_eq!(
            parsed("http://[::1]:9000"),
            json!({"scheme": "http", "host": "::1", "port": "9000"})
        );
        assert_eq!(
            parsed("http://example.com?q=/x"),
            json!({"scheme": "http", "host": "example.com", "query": {"q": ["/x"]}})
        );
    }

    #[test]
    fn request_path_and_query_string() {
        assert_eq!(
            parsed("/api/v1/items?id=3&id=4"),
            json!({"path": "/api/v1/items", "query": {"id": ["3", "4"]}})
        );
        assert_eq!(
            parsed("?name=a%20b&empty="),
            json!({"query": {"name": ["a b"], "empty": [""]}})
        );
    }

    #[test]
    fn invalid_input_is_entry_error() {
        assert!(parse_uri(Value::from("not a uri")).unwrap_err().is_user());
        assert!(parse_uri(Value::Bool(true)).unwrap_err().is_user());
    }

    #[tokio::test]
    async fn parses_request_field() {
        let config: UriParserConfig = serde_yaml::from_str(
            "type: uri_parser\nparse_from: request\nparse_to: url\noutput: out",
        )
        .unwrap();
        let registry = Registry::empty();
        let op = config.build(&BuildContext::new(&registry)).unwrap().remove(0);
        let out = Arc::new(Collector::new("out"));
        op.set_outputs(vec![out.clone()]).unwrap();

        let entry = Entry::with_record(Value::from(json!({"request": "/health?verbose=1"})));
        op.process(&CancellationToken::new(), entry).await.unwrap();
        assert_eq!(
            out.entries()[0].record.to_json(),
            json!({"url": {"path": "/health", "query": {"verbose": ["1"]}}})
        );
    }
}
