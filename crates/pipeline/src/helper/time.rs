//! 타임스탬프 하위 파서
//!
//! 필드 값을 읽어 `entry.timestamp`를 설정합니다.
//!
//! | layout_type | layout |
//! |---|---|
//! | `strptime` | `%Y-%m-%d %H:%M:%S` 형식. 빌드 시 chrono 형식으로 변환 |
//! | `gotime` | `2006-01-02T15:04:05Z07:00` 기준 시각 형식. 빌드 시 chrono 형식으로 변환 |
//! | `epoch` | `s`, `ms`, `us`, `ns`, `s.ms`, `s.us`, `s.ns` |
//! | `native` | 없음. 필드가 이미 시각 값이어야 함 |
//!
//! 연도가 없는 형식은 현재 연도를 쓰되, 결과가 7일 넘게 미래이면 작년으로 봅니다.

use chrono::format::ParseErrorKind;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::field::Field;
use logweave_core::value::Value;

use crate::error::BuildError;

/// 레이아웃 종류
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutType {
    #[default]
    Strptime,
    Gotime,
    Epoch,
    Native,
}

/// 허용되는 epoch 레이아웃
pub const EPOCH_LAYOUTS: [&str; 7] = ["s", "ms", "us", "ns", "s.ms", "s.us", "s.ns"];

/// 연도 없는 타임스탬프가 미래로 허용되는 한도 (일)
const FUTURE_TOLERANCE_DAYS: i64 = 7;

/// 타임스탬프 하위 파서 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeParserConfig {
    #[serde(default = "default_parse_from")]
    pub parse_from: Field,
    #[serde(default)]
    pub layout_type: LayoutType,
    #[serde(default)]
    pub layout: String,
    /// 파싱 후에도 원본 필드를 남깁니다.
    #[serde(default)]
    pub preserve: bool,
    /// 원본 값을 옮겨 둘 필드
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_to: Option<Field>,
}

fn default_parse_from() -> Field {
    Field::record(["timestamp"])
}

impl Default for TimeParserConfig {
    fn default() -> Self {
        Self {
            parse_from: default_parse_from(),
            layout_type: LayoutType::Strptime,
            layout: String::new(),
            preserve: false,
            preserve_to: None,
        }
    }
}

impl TimeParserConfig {
    pub fn build(&self) -> Result<TimeParser, BuildError> {
        let layout = match self.layout_type {
            LayoutType::Native => Layout::Native,
            LayoutType::Epoch => {
                if !EPOCH_LAYOUTS.contains(&self.layout.as_str()) {
                    return Err(BuildError::config(
                        "timestamp.layout",
                        format!(
                            "invalid epoch layout '{}', must be one of: {}",
                            self.layout,
                            EPOCH_LAYOUTS.join(", ")
                        ),
                    ));
                }
                Layout::Epoch(epoch_unit_nanos(&self.layout))
            }
            LayoutType::Strptime | LayoutType::Gotime => {
                if self.layout.is_empty() {
                    return Err(BuildError::config(
                        "timestamp.layout",
                        "layout is required for strptime and gotime",
                    ));
                }
                let format = match self.layout_type {
                    LayoutType::Strptime => strptime_to_chrono(&self.layout),
                    _ => gotime_to_chrono(&self.layout),
                };
                validate_format(&format)?;
                Layout::Format {
                    needs_year: !has_year_directive(&format),
                    format,
                }
            }
        };

        Ok(TimeParser {
            parse_from: self.parse_from.clone(),
            preserve: self.preserve,
            preserve_to: self.preserve_to.clone(),
            layout,
        })
    }
}

#[derive(Debug, Clone)]
enum Layout {
    Format { format: String, needs_year: bool },
    Epoch(i128),
    Native,
}

/// 빌드된 타임스탬프 파서
#[derive(Debug, Clone)]
pub struct TimeParser {
    parse_from: Field,
    preserve: bool,
    preserve_to: Option<Field>,
    layout: Layout,
}

impl TimeParser {
    pub fn parse_from(&self) -> &Field {
        &self.parse_from
    }

    /// 엔트리의 타임스탬프를 설정합니다. 실패하면 엔트리는 그대로입니다.
    pub fn parse(&self, entry: &mut Entry) -> Result<(), OperatorError> {
        let value = entry.get(&self.parse_from).ok_or_else(|| {
            OperatorError::entry(format!(
                "entry is missing the expected parse_from field '{}'",
                self.parse_from
            ))
        })?;

        let timestamp = self.parse_value(&value).map_err(OperatorError::entry)?;
        entry.timestamp = timestamp;

        if !self.preserve {
            entry.delete(&self.parse_from);
        }
        if let Some(to) = &self.preserve_to {
            entry.set(to, value)?;
        }
        Ok(())
    }

    /// 값 하나를 시각으로 해석합니다.
    pub fn parse_value(&self, value: &Value) -> Result<DateTime<Utc>, String> {
        match &self.layout {
            Layout::Native => match value {
                Value::Time(t) => Ok(*t),
                other => Err(format!(
                    "native layout requires a time value, got {}",
                    other.type_name()
                )),
            },
            Layout::Epoch(unit) => parse_epoch(value, *unit),
            Layout::Format { format, needs_year } => {
                let text = match value {
                    Value::String(s) => s.clone(),
                    Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
                    other => {
                        return Err(format!(
                            "type {} cannot be parsed as a time",
                            other.type_name()
                        ));
                    }
                };
                if *needs_year {
                    parse_without_year(&text, format, Utc::now())
                } else {
                    parse_with_format(&text, format)
                }
            }
        }
    }
}

// ─── 형식 파싱 ──────────────────────────────────────────────────────

fn parse_with_format(text: &str, format: &str) -> Result<DateTime<Utc>, String> {
    match DateTime::parse_from_str(text, format) {
        Ok(dt) => return Ok(dt.with_timezone(&Utc)),
        Err(e) if e.kind() != ParseErrorKind::NotEnough => {
            // 형식은 `Z07:00`을 `%:z`로 바꾸므로 `Z` 접미사를 다시 시도합니다.
            if let Some(stripped) = text.strip_suffix('Z') {
                if let Ok(dt) = DateTime::parse_from_str(&format!("{stripped}+00:00"), format) {
                    return Ok(dt.with_timezone(&Utc));
                }
            }
            return Err(format!("failed to parse '{text}' with layout '{format}': {e}"));
        }
        Err(_) => {}
    }

    match NaiveDateTime::parse_from_str(text, format) {
        Ok(naive) => return Ok(naive.and_utc()),
        Err(e) if e.kind() != ParseErrorKind::NotEnough => {
            return Err(format!("failed to parse '{text}' with layout '{format}': {e}"));
        }
        Err(_) => {}
    }

    NaiveDate::parse_from_str(text, format)
        .map_err(|e| format!("failed to parse '{text}' with layout '{format}': {e}"))
        .and_then(|date| {
            date.and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
                .ok_or_else(|| format!("invalid date '{text}'"))
        })
}

/// 연도가 없는 타임스탬프를 `now` 기준으로 해석합니다.
pub(crate) fn parse_without_year(
    text: &str,
    format: &str,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, String> {
    let year = now.year();
    let parsed = parse_with_format(&format!("{year} {text}"), &format!("%Y {format}"))?;
    if parsed > now + ChronoDuration::days(FUTURE_TOLERANCE_DAYS) {
        return parsed
            .with_year(year - 1)
            .ok_or_else(|| format!("'{text}' does not exist in {}", year - 1));
    }
    Ok(parsed)
}

fn validate_format(format: &str) -> Result<(), BuildError> {
    use chrono::format::{Item, StrftimeItems};
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(BuildError::config(
            "timestamp.layout",
            format!("invalid time layout '{format}'"),
        ));
    }
    Ok(())
}

fn has_year_directive(format: &str) -> bool {
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            continue;
        }
        // 플래그(`-`, `_`, `0`, `:`, `#`, 숫자, `.`)를 건너뜁니다.
        while let Some(&next) = chars.peek() {
            if matches!(next, '-' | '_' | '0'..='9' | ':' | '#' | '.') {
                chars.next();
            } else {
                break;
            }
        }
        if let Some(directive) = chars.next() {
            if matches!(
                directive,
                'Y' | 'y' | 'C' | 'G' | 'g' | 's' | 'c' | 'D' | 'F' | 'x' | '+' | 'v'
            ) {
                return true;
            }
        }
    }
    false
}

// ─── 레이아웃 변환 ──────────────────────────────────────────────────

/// strptime 지시자를 chrono 지시자로 바꿉니다.
///
/// 대부분은 같고, `%L`(밀리초)과 `%f`(마이크로초)만 다릅니다.
pub fn strptime_to_chrono(layout: &str) -> String {
    let mut out = String::with_capacity(layout.len());
    let mut chars = layout.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('L') => out.push_str("%3f"),
            Some('f') => out.push_str("%6f"),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push_str("%%"),
        }
    }
    out
}

/// Go 기준 시각 레이아웃 토큰 (긴 것부터)
const GOTIME_TOKENS: &[(&str, &str)] = &[
    (".000000000", "%.9f"),
    (".999999999", "%.f"),
    (".000000", "%.6f"),
    (".999999", "%.f"),
    ("January", "%B"),
    ("Monday", "%A"),
    ("Z07:00", "%:z"),
    ("-07:00", "%:z"),
    ("-0700", "%z"),
    (".000", "%.3f"),
    (".999", "%.f"),
    ("2006", "%Y"),
    ("Jan", "%b"),
    ("Mon", "%a"),
    ("MST", "%Z"),
    ("-07", "%#z"),
    ("01", "%m"),
    ("02", "%d"),
    ("_2", "%e"),
    ("15", "%H"),
    ("03", "%I"),
    ("04", "%M"),
    ("05", "%S"),
    ("06", "%y"),
    ("PM", "%p"),
    ("pm", "%P"),
    ("1", "%-m"),
    ("2", "%-d"),
    ("3", "%-I"),
    ("4", "%-M"),
    ("5", "%-S"),
];

/// Go 기준 시각 레이아웃을 chrono 형식으로 바꿉니다.
pub fn gotime_to_chrono(layout: &str) -> String {
    let mut out = String::with_capacity(layout.len() * 2);
    let mut rest = layout;
    'outer: while !rest.is_empty() {
        for (token, replacement) in GOTIME_TOKENS {
            if let Some(after) = rest.strip_prefix(token) {
                out.push_str(replacement);
                rest = after;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            if c == '%' {
                out.push_str("%%");
            } else {
                out.push(c);
            }
        }
        rest = chars.as_str();
    }
    out
}

// ─── epoch ──────────────────────────────────────────────────────────

fn epoch_unit_nanos(layout: &str) -> i128 {
    match layout {
        "ms" => 1_000_000,
        "us" => 1_000,
        "ns" => 1,
        _ => 1_000_000_000,
    }
}

fn parse_epoch(value: &Value, unit_nanos: i128) -> Result<DateTime<Utc>, String> {
    let nanos = match value {
        Value::Int(i) => i128::from(*i) * unit_nanos,
        Value::Float(f) if f.is_finite() => (*f * unit_nanos as f64) as i128,
        Value::String(s) => decimal_to_nanos(s.trim(), unit_nanos)
            .ok_or_else(|| format!("'{s}' is not a numeric epoch value"))?,
        Value::Bytes(b) => {
            let s = String::from_utf8_lossy(b);
            decimal_to_nanos(s.trim(), unit_nanos)
                .ok_or_else(|| format!("'{s}' is not a numeric epoch value"))?
        }
        other => {
            return Err(format!(
                "type {} cannot be parsed as an epoch timestamp",
                other.type_name()
            ));
        }
    };

    let secs = i64::try_from(nanos.div_euclid(1_000_000_000))
        .map_err(|_| "epoch value out of range".to_owned())?;
    let subsec = nanos.rem_euclid(1_000_000_000) as u32;
    DateTime::from_timestamp(secs, subsec).ok_or_else(|| "epoch value out of range".to_owned())
}

/// 십진 문자열을 정밀도 손실 없이 나노초로 바꿉니다.
fn decimal_to_nanos(text: &str, unit_nanos: i128) -> Option<i128> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let whole: i128 = if int_part.is_empty() { 0 } else { int_part.parse().ok()? };
    let mut total = whole.checked_mul(unit_nanos)?;
    if !frac_part.is_empty() {
        let frac_digits = frac_part.len().min(18);
        let frac: i128 = frac_part[..frac_digits].parse().ok()?;
        let scale = 10i128.checked_pow(frac_digits as u32)?;
        total = total.checked_add(frac.checked_mul(unit_nanos)? / scale)?;
    }
    Some(if negative { -total } else { total })
}
