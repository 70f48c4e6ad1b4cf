//! 심각도 하위 파서
//!
//! 필드 값을 소문자 문자열로 정규화해 매핑 테이블에서 찾습니다.
//! 테이블에 없는 값은 `default` 심각도가 됩니다.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;

use logweave_core::entry::{Entry, Severity};
use logweave_core::error::OperatorError;
use logweave_core::field::Field;
use logweave_core::value::Value;

use crate::error::BuildError;

/// HTTP 상태 클래스 키
const HTTP_CLASSES: [(&str, i64); 4] = [("2xx", 200), ("3xx", 300), ("4xx", 400), ("5xx", 500)];

/// `default` 프리셋이 추가하는 축약형
const SHORTHANDS: [(&str, Severity); 3] = [
    ("warn", Severity::WARNING),
    ("err", Severity::ERROR),
    ("crit", Severity::CRITICAL),
];

/// 매핑 테이블의 시작점
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// 빈 테이블
    None,
    /// 레벨 이름만
    Aliases,
    /// 레벨 이름과 축약형
    #[default]
    Default,
}

/// 심각도 하위 파서 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityParserConfig {
    #[serde(default = "default_parse_from")]
    pub parse_from: Field,
    #[serde(default)]
    pub preset: Preset,
    /// 심각도 → 값, 범위 또는 그 목록. 뒤의 매핑이 앞을 덮어씁니다.
    #[serde(default)]
    pub mapping: serde_yaml::Mapping,
    #[serde(default)]
    pub preserve: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_to: Option<Field>,
}

fn default_parse_from() -> Field {
    Field::record(["severity"])
}

impl Default for SeverityParserConfig {
    fn default() -> Self {
        Self {
            parse_from: default_parse_from(),
            preset: Preset::Default,
            mapping: serde_yaml::Mapping::new(),
            preserve: false,
            preserve_to: None,
        }
    }
}

impl SeverityParserConfig {
    pub fn build(&self) -> Result<SeverityParser, BuildError> {
        let mut table = preset_table(self.preset);

        for (severity, values) in &self.mapping {
            let severity = parse_severity_key(severity)?;
            match values {
                YamlValue::Sequence(items) => {
                    for item in items {
                        for key in parseable_values(item)? {
                            table.insert(key, severity);
                        }
                    }
                }
                single => {
                    for key in parseable_values(single)? {
                        table.insert(key, severity);
                    }
                }
            }
        }

        Ok(SeverityParser {
            parse_from: self.parse_from.clone(),
            preserve: self.preserve,
            preserve_to: self.preserve_to.clone(),
            table,
        })
    }
}

fn preset_table(preset: Preset) -> HashMap<String, Severity> {
    let mut table = HashMap::new();
    if preset == Preset::None {
        return table;
    }
    for (name, severity) in Severity::NAMED {
        table.insert(name.to_owned(), severity);
    }
    if preset == Preset::Default {
        for (name, severity) in SHORTHANDS {
            table.insert(name.to_owned(), severity);
        }
    }
    table
}

/// 매핑 키: 레벨 이름 또는 0..=100 정수
fn parse_severity_key(key: &YamlValue) -> Result<Severity, BuildError> {
    let parsed = match key {
        YamlValue::String(s) => s.parse::<Severity>().ok(),
        YamlValue::Number(n) => n.as_i64().and_then(Severity::new),
        _ => None,
    };
    parsed.ok_or_else(|| {
        BuildError::config(
            "severity.mapping",
            format!(
                "{} cannot be used as a severity, expected a level name or an integer between 0 and 100",
                yaml_display(key)
            ),
        )
    })
}

/// 매핑 값을 비교용 문자열 목록으로 펼칩니다.
fn parseable_values(value: &YamlValue) -> Result<Vec<String>, BuildError> {
    match value {
        YamlValue::Number(n) => match n.as_i64() {
            Some(i) => Ok(vec![i.to_string()]),
            None => Err(BuildError::config(
                "severity.mapping",
                format!("{n} is not an integer"),
            )),
        },
        YamlValue::String(s) => {
            let lower = s.to_ascii_lowercase();
            if let Some((_, base)) = HTTP_CLASSES.iter().find(|(class, _)| *class == lower) {
                return Ok(expand_range(*base, base + 99));
            }
            Ok(vec![lower])
        }
        YamlValue::Mapping(map) => {
            let bound = |name: &str| map.get(name).and_then(YamlValue::as_i64);
            match (bound("min"), bound("max")) {
                (Some(min), Some(max)) => Ok(expand_range(min, max)),
                _ => Err(BuildError::config(
                    "severity.mapping",
                    "a range must have integer 'min' and 'max' keys",
                )),
            }
        }
        other => Err(BuildError::config(
            "severity.mapping",
            format!("{} cannot be parsed as a severity value", yaml_display(other)),
        )),
    }
}

fn expand_range(a: i64, b: i64) -> Vec<String> {
    let (min, max) = if a <= b { (a, b) } else { (b, a) };
    (min..=max).map(|i| i.to_string()).collect()
}

fn yaml_display(value: &YamlValue) -> String {
    serde_yaml::to_string(value)
        .map(|s| s.trim_end().to_owned())
        .unwrap_or_else(|_| format!("{value:?}"))
}

/// 빌드된 심각도 파서
#[derive(Debug, Clone)]
pub struct SeverityParser {
    parse_from: Field,
    preserve: bool,
    preserve_to: Option<Field>,
    table: HashMap<String, Severity>,
}

impl SeverityParser {
    pub fn parse_from(&self) -> &Field {
        &self.parse_from
    }

    /// 엔트리의 심각도를 설정합니다.
    pub fn parse(&self, entry: &mut Entry) -> Result<(), OperatorError> {
        let value = entry.get(&self.parse_from).ok_or_else(|| {
            OperatorError::entry(format!(
                "entry is missing the expected parse_from field '{}'",
                self.parse_from
            ))
        })?;

        entry.severity = self.lookup(&value).map_err(OperatorError::entry)?;

        if !self.preserve {
            entry.delete(&self.parse_from);
        }
        if let Some(to) = &self.preserve_to {
            entry.set(to, value)?;
        }
        Ok(())
    }

    /// 값에 대응하는 심각도. 매핑이 없으면 `default`입니다.
    pub fn lookup(&self, value: &Value) -> Result<Severity, String> {
        let key = match value {
            Value::Int(i) => i.to_string(),
            Value::Float(f) if f.fract() == 0.0 => (*f as i64).to_string(),
            Value::String(s) => s.to_ascii_lowercase(),
            Value::Bytes(b) => String::from_utf8_lossy(b).to_ascii_lowercase(),
            other => return Err(format!("type {} cannot be a severity", other.type_name())),
        };
        Ok(self.table.get(&key).copied().unwrap_or(Severity::DEFAULT))
    }
}
