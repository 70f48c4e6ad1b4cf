//! 출력 오퍼레이터
//!
//! 기본 직렬화는 엔트리 하나당 JSON 객체 한 줄입니다.

pub mod drop;
pub mod file;
pub mod log;
pub mod stdout;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;

use crate::expr::ExprString;

/// 엔트리를 한 줄로 직렬화합니다. 줄바꿈을 포함합니다.
///
/// `format`이 있으면 JSON 대신 템플릿을 렌더링합니다.
pub(crate) fn serialize_line(entry: &Entry, format: Option<&ExprString>) -> Result<Vec<u8>, OperatorError> {
    let mut line = match format {
        Some(template) => template.render(entry)?.into_bytes(),
        None => serde_json::to_vec(entry)
            .map_err(|e| OperatorError::entry(format!("failed to serialize entry: {e}")))?,
    };
    line.push(b'\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use logweave_core::value::Value;
    use serde_json::json;

    #[test]
    fn json_line_contains_record() {
        let entry = Entry::with_record(Value::from(json!({"message": "a"})));
        let line = String::from_utf8(serialize_line(&entry, None).unwrap()).unwrap();
        assert!(line.ends_with('\n'));
        assert!(line.contains(r#""record":{"message":"a"}"#), "{line}");
    }

    #[test]
    fn template_replaces_json() {
        let entry = Entry::with_record(Value::from(json!({"message": "a"})));
        let format = ExprString::compile("msg={{ $.message }}").unwrap();
        let line = serialize_line(&entry, Some(&format)).unwrap();
        assert_eq!(line, b"msg=a\n");
    }
}
