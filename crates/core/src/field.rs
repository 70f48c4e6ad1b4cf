//! 필드 셀렉터
//!
//! [`Field`]는 엔트리 내부를 가리키는 주소입니다. 루트는 `record` 또는 `labels`입니다.
//!
//! # 문법
//! ```text
//! $ | $record | record          레코드 전체
//! $.a.b | $record.a.b | a.b    레코드 경로 (루트 생략 시 record)
//! $labels.x | labels.x         레이블 x
//! ```
//!
//! # Set 규칙
//! - 중간 경로가 없으면 맵을 생성합니다.
//! - 중간 경로가 맵이 아니면 빈 맵으로 승격합니다 (기존 값은 사라집니다).
//! - 루트에 대한 Set은 레코드 전체를 교체합니다.
//! - 같은 값의 반복 Set은 멱등입니다.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::entry::Entry;
use crate::error::FieldError;
use crate::value::{Map, Value};

/// 엔트리 필드 주소
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    /// 레코드 경로. 빈 경로는 레코드 전체입니다.
    Record(Vec<String>),
    /// 레이블 키
    Label(String),
}

impl Default for Field {
    fn default() -> Self {
        Field::root()
    }
}

impl Field {
    /// 레코드 전체
    pub fn root() -> Self {
        Field::Record(Vec::new())
    }

    /// 레코드 경로 필드를 생성합니다.
    pub fn record<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Field::Record(keys.into_iter().map(Into::into).collect())
    }

    /// 레이블 필드를 생성합니다.
    pub fn label(key: impl Into<String>) -> Self {
        Field::Label(key.into())
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Field::Record(keys) if keys.is_empty())
    }

    /// 하위 키를 덧붙인 레코드 필드를 반환합니다. 레이블 필드는 그대로입니다.
    pub fn child(&self, key: impl Into<String>) -> Self {
        match self {
            Field::Record(keys) => {
                let mut keys = keys.clone();
                keys.push(key.into());
                Field::Record(keys)
            }
            Field::Label(_) => self.clone(),
        }
    }

    /// 경로 앞부분이 `other`와 일치하면 `true`를 반환합니다.
    pub fn starts_with(&self, other: &Field) -> bool {
        match (self, other) {
            (Field::Record(a), Field::Record(b)) => a.starts_with(b),
            (Field::Label(a), Field::Label(b)) => a == b,
            _ => false,
        }
    }

    /// 값을 조회합니다.
    pub fn get(&self, entry: &Entry) -> Option<Value> {
        match self {
            Field::Label(key) => entry.labels.get(key).cloned().map(Value::String),
            Field::Record(keys) => {
                let mut current = &entry.record;
                for key in keys {
                    current = current.as_map()?.get(key)?;
                }
                Some(current.clone())
            }
        }
    }

    /// 레코드 값의 가변 참조를 반환합니다. 레이블 필드는 `None`입니다.
    pub fn get_mut<'e>(&self, entry: &'e mut Entry) -> Option<&'e mut Value> {
        let Field::Record(keys) = self else {
            return None;
        };
        let mut current = &mut entry.record;
        for key in keys {
            current = current.as_map_mut()?.get_mut(key)?;
        }
        Some(current)
    }

    /// 값을 설정합니다.
    pub fn set(&self, entry: &mut Entry, value: Value) -> Result<(), FieldError> {
        match self {
            Field::Label(key) => {
                let text = match value {
                    Value::String(s) => s,
                    Value::Map(_) | Value::Array(_) => {
                        return Err(FieldError::LabelType {
                            label: key.clone(),
                            type_name: value.type_name().to_owned(),
                        });
                    }
                    other => other.to_text(),
                };
                entry.labels.insert(key.clone(), text);
                Ok(())
            }
            Field::Record(keys) => {
                let Some((last, parents)) = keys.split_last() else {
                    entry.record = value;
                    return Ok(());
                };
                let mut current = promote(&mut entry.record);
                for key in parents {
                    let child = current.entry(key.clone()).or_insert_with(Value::map);
                    current = promote(child);
                }
                current.insert(last.clone(), value);
                Ok(())
            }
        }
    }

    /// 값을 삭제하고 이전 값을 반환합니다.
    ///
    /// 루트 삭제는 레코드를 빈 맵으로 바꿉니다.
    pub fn delete(&self, entry: &mut Entry) -> Option<Value> {
        match self {
            Field::Label(key) => entry.labels.remove(key).map(Value::String),
            Field::Record(keys) => {
                let Some((last, parents)) = keys.split_last() else {
                    return Some(std::mem::replace(&mut entry.record, Value::map()));
                };
                let mut current = &mut entry.record;
                for key in parents {
                    current = current.as_map_mut()?.get_mut(key)?;
                }
                current.as_map_mut()?.remove(last)
            }
        }
    }
}

/// 맵이 아닌 값을 빈 맵으로 승격하고 내부 맵을 반환합니다.
fn promote(value: &mut Value) -> &mut Map {
    if !matches!(value, Value::Map(_)) {
        *value = Value::map();
    }
    match value {
        Value::Map(m) => m,
        // 바로 위에서 맵으로 바꿨으므로 도달하지 않습니다.
        _ => unreachable!("value was promoted to a map"),
    }
}

// ─── 파싱/표시 ──────────────────────────────────────────────────────

impl FromStr for Field {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| FieldError::Invalid {
            field: s.to_owned(),
            reason: reason.to_owned(),
        };

        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Field::root());
        }

        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("empty path segment"));
        }

        match parts[0] {
            "$" | "$record" | "record" => Ok(Field::record(parts[1..].iter().copied())),
            "$labels" | "labels" if parts.len() > 1 => Ok(Field::Label(parts[1..].join("."))),
            "$labels" => Err(invalid("a label key is required")),
            first if first.starts_with('$') => Err(invalid("unknown root")),
            _ => Ok(Field::record(parts.iter().copied())),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Record(keys) if keys.is_empty() => f.write_str("$record"),
            Field::Record(keys) => write!(f, "$record.{}", keys.join(".")),
            Field::Label(key) => write!(f, "$labels.{key}"),
        }
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
