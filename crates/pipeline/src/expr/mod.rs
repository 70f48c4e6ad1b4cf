//! 엔트리 표현식 언어
//!
//! 라우터 조건, `restructure`의 `value_expr`, 메타데이터 템플릿이 사용합니다.
//! 표현식은 빌드 시 한 번 컴파일되고, 정규식 패턴도 이때 컴파일됩니다.
//!
//! # 문법
//! ```text
//! $ / $record / $.a.b / $record["a b"]   레코드 필드 (없으면 null)
//! $labels.host / $labels["k8s.pod"]      레이블
//! $timestamp / $severity / $tags         엔트리 메타데이터
//! "str" 'str' 42 1.5 true false null     리터럴
//! [a, b, c]                              목록
//! == != < <= > >=                        비교
//! and or not && || !                     논리
//! matches "re" / contains / in           문자열, 목록, 맵 검사
//! +                                      덧셈, 문자열 연결
//! env("NAME") len(x) lower(x) upper(x)   함수
//! ```

mod lexer;
mod parser;
pub mod template;

use std::cmp::Ordering;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::field::Field;
use logweave_core::value::Value;

use crate::error::BuildError;

pub use template::ExprString;

/// 표현식 파싱 에러
#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    #[error("unexpected character '{ch}' at offset {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string starting at offset {pos}")]
    UnterminatedString { pos: usize },

    #[error("invalid number '{text}' at offset {pos}")]
    InvalidNumber { text: String, pos: usize },

    #[error("unexpected {found} at offset {pos}, expected {expected}")]
    Unexpected {
        found: String,
        pos: usize,
        expected: &'static str,
    },

    #[error("unexpected end of expression, expected {expected}")]
    UnexpectedEnd { expected: &'static str },

    #[error("unknown variable '${name}' at offset {pos}")]
    UnknownVariable { name: String, pos: usize },

    #[error("label reference at offset {pos} must name exactly one label")]
    LabelPath { pos: usize },

    #[error("unknown function '{name}' at offset {pos}")]
    UnknownFunction { name: String, pos: usize },

    #[error("function '{name}' takes {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),
}

/// 평가 에러. 엔트리 단위 사용자 에러가 됩니다.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct EvalError(pub String);

impl From<EvalError> for OperatorError {
    fn from(err: EvalError) -> Self {
        OperatorError::entry(err.0)
    }
}

// ─── AST ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    In,
    Add,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Env,
    Len,
    Lower,
    Upper,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "env" => Some(Function::Env),
            "len" => Some(Function::Len),
            "lower" => Some(Function::Lower),
            "upper" => Some(Function::Upper),
            _ => None,
        }
    }

    fn arity(self) -> usize {
        1
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Field(Field),
    Timestamp,
    Severity,
    Tags,
    List(Vec<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Matches(Box<Expr>, Regex),
    Call(Function, Vec<Expr>),
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        use Expr::*;
        match (self, other) {
            (Literal(a), Literal(b)) => a == b,
            (Field(a), Field(b)) => a == b,
            (Timestamp, Timestamp) | (Severity, Severity) | (Tags, Tags) => true,
            (List(a), List(b)) => a == b,
            (Not(a), Not(b)) | (Neg(a), Neg(b)) => a == b,
            (And(a1, a2), And(b1, b2)) | (Or(a1, a2), Or(b1, b2)) => a1 == b1 && a2 == b2,
            (Binary(op1, a1, a2), Binary(op2, b1, b2)) => op1 == op2 && a1 == b1 && a2 == b2,
            (Matches(a, ra), Matches(b, rb)) => a == b && ra.as_str() == rb.as_str(),
            (Call(f1, a1), Call(f2, a2)) => f1 == f2 && a1 == a2,
            _ => false,
        }
    }
}

// ─── 평가 ───────────────────────────────────────────────────────────

impl Expr {
    pub fn eval(&self, entry: &Entry) -> Result<Value, EvalError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Field(field) => Ok(entry.get(field).unwrap_or(Value::Null)),
            Expr::Timestamp => Ok(Value::Time(entry.timestamp)),
            Expr::Severity => Ok(Value::Int(i64::from(entry.severity.level()))),
            Expr::Tags => Ok(Value::Array(
                entry.tags.iter().cloned().map(Value::String).collect(),
            )),
            Expr::List(items) => items
                .iter()
                .map(|item| item.eval(entry))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expr::Not(inner) => Ok(Value::Bool(!expect_bool(&inner.eval(entry)?, "not")?)),
            Expr::Neg(inner) => match inner.eval(entry)? {
                Value::Int(i) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| EvalError("integer overflow".to_owned())),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(EvalError(format!("cannot negate a {}", other.type_name()))),
            },
            Expr::And(lhs, rhs) => {
                if !expect_bool(&lhs.eval(entry)?, "and")? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(expect_bool(&rhs.eval(entry)?, "and")?))
            }
            Expr::Or(lhs, rhs) => {
                if expect_bool(&lhs.eval(entry)?, "or")? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(expect_bool(&rhs.eval(entry)?, "or")?))
            }
            Expr::Binary(op, lhs, rhs) => binary(*op, lhs.eval(entry)?, rhs.eval(entry)?),
            Expr::Matches(lhs, regex) => match lhs.eval(entry)? {
                Value::Null => Ok(Value::Bool(false)),
                Value::Map(_) | Value::Array(_) => Ok(Value::Bool(false)),
                other => Ok(Value::Bool(regex.is_match(&other.to_text()))),
            },
            Expr::Call(function, args) => {
                let arg = match args.first() {
                    Some(arg) => arg.eval(entry)?,
                    None => Value::Null,
                };
                call(*function, arg)
            }
        }
    }
}

fn expect_bool(value: &Value, op: &str) -> Result<bool, EvalError> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(EvalError(format!(
            "'{op}' requires bool operands, got {}",
            other.type_name()
        ))),
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    let result = match op {
        BinaryOp::Eq => values_equal(&lhs, &rhs),
        BinaryOp::Ne => !values_equal(&lhs, &rhs),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&lhs, &rhs)?;
            match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }
        }
        BinaryOp::Contains => contains(&lhs, &rhs),
        BinaryOp::In => contains(&rhs, &lhs),
        BinaryOp::Add => return add(lhs, rhs),
    };
    Ok(Value::Bool(result))
}

/// 숫자는 정수/실수 구분 없이, 문자열과 바이트는 텍스트로 비교합니다.
pub fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
        (Value::String(a), Value::Bytes(b)) | (Value::Bytes(b), Value::String(a)) => {
            a.as_bytes() == b.as_slice()
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        _ => lhs == rhs,
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Result<Ordering, EvalError> {
    let ordering = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    ordering.ok_or_else(|| {
        EvalError(format!(
            "cannot compare {} with {}",
            lhs.type_name(),
            rhs.type_name()
        ))
    })
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => s.contains(needle.to_text().as_str()),
        Value::Bytes(b) => String::from_utf8_lossy(b).contains(needle.to_text().as_str()),
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::Map(map) => needle.as_str().is_some_and(|key| map.contains_key(key)),
        _ => false,
    }
}

fn add(lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    match (&lhs, &rhs) {
        (Value::Int(a), Value::Int(b)) => a
            .checked_add(*b)
            .map(Value::Int)
            .ok_or_else(|| EvalError("integer overflow".to_owned())),
        (Value::String(_), _) | (_, Value::String(_)) => {
            Ok(Value::String(lhs.to_text() + &rhs.to_text()))
        }
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(a + b)),
            _ => Err(EvalError(format!(
                "cannot add {} and {}",
                lhs.type_name(),
                rhs.type_name()
            ))),
        },
    }
}

fn call(function: Function, arg: Value) -> Result<Value, EvalError> {
    match function {
        Function::Env => {
            let name = arg
                .as_str()
                .ok_or_else(|| EvalError("env() requires a string argument".to_owned()))?;
            Ok(std::env::var(name).map(Value::String).unwrap_or(Value::Null))
        }
        Function::Len => match &arg {
            Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::Bytes(b) => Ok(Value::Int(b.len() as i64)),
            Value::Array(items) => Ok(Value::Int(items.len() as i64)),
            Value::Map(map) => Ok(Value::Int(map.len() as i64)),
            Value::Null => Ok(Value::Int(0)),
            other => Err(EvalError(format!("len() is not defined for {}", other.type_name()))),
        },
        Function::Lower => Ok(Value::String(arg.to_text().to_lowercase())),
        Function::Upper => Ok(Value::String(arg.to_text().to_uppercase())),
    }
}

// ─── 컴파일된 표현식 ────────────────────────────────────────────────

/// 컴파일된 표현식과 원문
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    pub fn compile(source: &str) -> Result<Self, BuildError> {
        let root = parser::parse(source).map_err(|e| BuildError::Expr {
            expr: source.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: source.to_owned(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, entry: &Entry) -> Result<Value, EvalError> {
        self.root.eval(entry)
    }

    /// 결과가 bool이어야 하는 평가. 라우터와 필터가 사용합니다.
    pub fn evaluate_bool(&self, entry: &Entry) -> Result<bool, EvalError> {
        match self.evaluate(entry)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError(format!(
                "expression '{}' returned {} instead of bool",
                self.source,
                other.type_name()
            ))),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for Expression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // YAML의 `true` 같은 스칼라도 표현식으로 받습니다.
        let raw = serde_yaml::Value::deserialize(deserializer)?;
        let source = match raw {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "expected an expression string, got {other:?}"
                )));
            }
        };
        Expression::compile(&source).map_err(serde::de::Error::custom)
    }
}
