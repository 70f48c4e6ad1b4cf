//! `{{ 표현식 }}` 구간이 섞인 문자열 템플릿
//!
//! `"host-{{ $labels.host }}"`처럼 리터럴과 표현식을 번갈아 씁니다.
//! 표현식 결과는 텍스트로 변환되며 null은 빈 문자열이 됩니다.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use logweave_core::entry::Entry;

use super::{EvalError, Expression};
use crate::error::BuildError;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone)]
enum Part {
    Literal(String),
    Expr(Expression),
}

/// 컴파일된 문자열 템플릿
#[derive(Debug, Clone)]
pub struct ExprString {
    source: String,
    parts: Vec<Part>,
}

impl ExprString {
    pub fn compile(source: &str) -> Result<Self, BuildError> {
        let mut parts = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                parts.push(Part::Literal(rest[..start].to_owned()));
            }
            let after_open = &rest[start + OPEN.len()..];
            let end = after_open.find(CLOSE).ok_or_else(|| BuildError::Expr {
                expr: source.to_owned(),
                reason: "unterminated '{{'".to_owned(),
            })?;
            let inner = after_open[..end].trim();
            if inner.is_empty() {
                return Err(BuildError::Expr {
                    expr: source.to_owned(),
                    reason: "empty '{{ }}'".to_owned(),
                });
            }
            parts.push(Part::Expr(Expression::compile(inner)?));
            rest = &after_open[end + CLOSE.len()..];
        }
        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_owned()));
        }

        Ok(Self {
            source: source.to_owned(),
            parts,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// 표현식이 없으면 `true`
    pub fn is_static(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, Part::Literal(_)))
    }

    pub fn render(&self, entry: &Entry) -> Result<String, EvalError> {
        let mut out = String::with_capacity(self.source.len());
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Expr(expr) => out.push_str(&expr.evaluate(entry)?.to_text()),
            }
        }
        Ok(out)
    }
}

impl fmt::Display for ExprString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for ExprString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for ExprString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_yaml::Value::deserialize(deserializer)?;
        let source = match raw {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "expected a string template, got {other:?}"
                )));
            }
        };
        ExprString::compile(&source).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logweave_core::value::Value;

    #[test]
    fn renders_literals_and_expressions() {
        let mut entry = Entry::with_record(Value::from(serde_json::json!({"n": 3})));
        entry.add_label("host", "web-1");
        let t = ExprString::compile("{{ $labels.host }}:{{$.n + 1}}/{{ $.missing }}").unwrap();
        assert_eq!(t.render(&entry).unwrap(), "web-1:4/");
        assert!(!t.is_static());
    }

    #[test]
    fn plain_strings_are_static() {
        let t = ExprString::compile("just text").unwrap();
        assert!(t.is_static());
        assert_eq!(t.render(&Entry::new()).unwrap(), "just text");
    }

    #[test]
    fn unterminated_or_empty_segments_fail() {
        assert!(ExprString::compile("a {{ $.x").is_err());
        assert!(ExprString::compile("a {{ }}").is_err());
        assert!(ExprString::compile("{{ $.a == }}").is_err());
    }
}
