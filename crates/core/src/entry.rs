//! 로그 엔트리와 심각도
//!
//! [`Entry`]는 파이프라인의 작업 단위입니다. 입력이 생성하고 값으로 하위 오퍼레이터에 전달됩니다.
//! 팬아웃 시에는 추가 수신자마다 깊은 복사(`clone`)가 필요합니다.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::FieldError;
use crate::field::Field;
use crate::value::Value;

// ─── Severity ───────────────────────────────────────────────────────

/// 심각도 (0..=100)
///
/// 이름이 붙은 레벨은 10 단위이며, 사이 값도 유효합니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Severity(u8);

impl Severity {
    pub const DEFAULT: Severity = Severity(0);
    pub const TRACE: Severity = Severity(10);
    pub const DEBUG: Severity = Severity(20);
    pub const INFO: Severity = Severity(30);
    pub const NOTICE: Severity = Severity(40);
    pub const WARNING: Severity = Severity(50);
    pub const ERROR: Severity = Severity(60);
    pub const CRITICAL: Severity = Severity(70);
    pub const ALERT: Severity = Severity(80);
    pub const EMERGENCY: Severity = Severity(90);
    pub const CATASTROPHE: Severity = Severity(100);

    /// 이름이 붙은 모든 레벨 (오름차순)
    pub const NAMED: [(&'static str, Severity); 11] = [
        ("default", Self::DEFAULT),
        ("trace", Self::TRACE),
        ("debug", Self::DEBUG),
        ("info", Self::INFO),
        ("notice", Self::NOTICE),
        ("warning", Self::WARNING),
        ("error", Self::ERROR),
        ("critical", Self::CRITICAL),
        ("alert", Self::ALERT),
        ("emergency", Self::EMERGENCY),
        ("catastrophe", Self::CATASTROPHE),
    ];

    /// 0..=100 범위의 정수로 심각도를 생성합니다.
    pub fn new(level: i64) -> Option<Self> {
        u8::try_from(level)
            .ok()
            .filter(|l| *l <= 100)
            .map(Severity)
    }

    /// 숫자 레벨
    pub fn level(self) -> u8 {
        self.0
    }

    /// 레벨 이름 (대소문자 무시)으로 조회합니다.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        Self::NAMED
            .iter()
            .find(|(n, _)| *n == lower)
            .map(|(_, s)| *s)
    }

    /// 이름이 붙은 레벨이면 이름을 반환합니다.
    pub fn name(self) -> Option<&'static str> {
        Self::NAMED
            .iter()
            .find(|(_, s)| *s == self)
            .map(|(n, _)| *n)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(sev) = Self::from_name(s) {
            return Ok(sev);
        }
        s.trim()
            .parse::<i64>()
            .ok()
            .and_then(Severity::new)
            .ok_or_else(|| format!("'{s}' is not a severity name or an integer between 0 and 100"))
    }
}

impl Serialize for Severity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.0)
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Int(i) => Severity::new(i)
                .ok_or_else(|| serde::de::Error::custom(format!("severity {i} out of range"))),
            Value::String(s) => s.parse().map_err(serde::de::Error::custom),
            other => Err(serde::de::Error::custom(format!(
                "invalid severity type {}",
                other.type_name()
            ))),
        }
    }
}

// ─── Entry ──────────────────────────────────────────────────────────

/// 로그 엔트리
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// 수집 시각. 타임스탬프 파서가 덮어씁니다.
    pub timestamp: DateTime<Utc>,
    /// 심각도
    #[serde(default)]
    pub severity: Severity,
    /// 레코드 본문
    #[serde(default)]
    pub record: Value,
    /// 평면 문자열 레이블
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// 태그
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Default for Entry {
    fn default() -> Self {
        Self::new()
    }
}

impl Entry {
    /// 현재 시각과 빈 레코드로 엔트리를 생성합니다.
    pub fn new() -> Self {
        Self {
            timestamp: Utc::now(),
            severity: Severity::DEFAULT,
            record: Value::Null,
            labels: BTreeMap::new(),
            tags: Vec::new(),
        }
    }

    /// 주어진 레코드로 엔트리를 생성합니다.
    pub fn with_record(record: impl Into<Value>) -> Self {
        Self {
            record: record.into(),
            ..Self::new()
        }
    }

    /// 필드 값을 조회합니다.
    pub fn get(&self, field: &Field) -> Option<Value> {
        field.get(self)
    }

    /// 필드 값을 설정합니다.
    pub fn set(&mut self, field: &Field, value: impl Into<Value>) -> Result<(), FieldError> {
        field.set(self, value.into())
    }

    /// 필드를 삭제하고 이전 값을 반환합니다.
    pub fn delete(&mut self, field: &Field) -> Option<Value> {
        field.delete(self)
    }

    /// 레이블을 추가합니다.
    pub fn add_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.labels.insert(key.into(), value.into());
    }
}
