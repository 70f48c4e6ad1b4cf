//! syslog 파서 (RFC 3164 / RFC 5424)
//!
//! 결과 키: `priority`, `facility`, `severity`, `timestamp`, `hostname`, `appname`,
//! `proc_id`, `msg_id`, `message`. RFC 5424는 `version`과 `structured_data`가 추가됩니다.
//! NILVALUE(`-`) 필드는 결과에서 빠집니다.
//!
//! 하위 파서를 지정하지 않으면 `timestamp` 키로 엔트리 시각을, syslog 심각도로
//! 엔트리 심각도를 설정합니다.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use tokio_util::sync::CancellationToken;

use logweave_core::entry::{Entry, Severity};
use logweave_core::error::OperatorError;
use logweave_core::operator::{Operator, SharedOperator};
use logweave_core::value::{Map, Value};

use crate::error::BuildError;
use crate::helper::parser::ParserConfig;
use crate::helper::severity::{Preset, SeverityParserConfig};
use crate::helper::time::{LayoutType, TimeParserConfig, parse_without_year};
use crate::helper::{ParserOperator, delegate_basic, delegate_builder, delegate_writer};
use crate::registry::{BuildContext, OperatorBuilder};

/// PRI 최댓값 (facility 23, severity 7)
const MAX_SYSLOG_PRI: u8 = 191;

/// syslog 심각도 0..=7 에 대응하는 엔트리 심각도
const SEVERITY_MAP: [Severity; 8] = [
    Severity::EMERGENCY,
    Severity::ALERT,
    Severity::CRITICAL,
    Severity::ERROR,
    Severity::WARNING,
    Severity::NOTICE,
    Severity::INFO,
    Severity::DEBUG,
];

/// RFC 3164 타임스탬프 형식
const BSD_TIMESTAMP: &str = "%b %d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Rfc3164,
    Rfc5424,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyslogParserConfig {
    #[serde(flatten)]
    pub parser: ParserConfig,
    pub protocol: Protocol,
    /// RFC 3164 타임스탬프의 시간대. `UTC`만 지원합니다.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl SyslogParserConfig {
    /// 하위 파서 기본값을 채운 설정
    fn effective_parser(&self) -> ParserConfig {
        let mut parser = self.parser.clone();
        if parser.timestamp.is_none() {
            parser.timestamp = Some(TimeParserConfig {
                parse_from: parser.parse_to.child("timestamp"),
                layout_type: LayoutType::Native,
                ..TimeParserConfig::default()
            });
        }
        if parser.severity.is_none() {
            let mut mapping = serde_yaml::Mapping::new();
            for (code, severity) in SEVERITY_MAP.iter().enumerate() {
                mapping.insert(
                    YamlValue::Number(u64::from(severity.level()).into()),
                    YamlValue::Number((code as u64).into()),
                );
            }
            parser.severity = Some(SeverityParserConfig {
                parse_from: parser.parse_to.child("severity"),
                preset: Preset::None,
                mapping,
                preserve: true,
                preserve_to: None,
            });
        }
        parser
    }
}

impl OperatorBuilder for SyslogParserConfig {
    delegate_builder!(parser.transformer.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        if let Some(location) = &self.location {
            if !location.eq_ignore_ascii_case("utc") {
                return Err(BuildError::config(
                    "location",
                    format!("unsupported location '{location}', only UTC is available"),
                ));
            }
        }
        Ok(vec![Arc::new(SyslogParser {
            parser: self.effective_parser().build(ctx)?,
            protocol: self.protocol,
        })])
    }
}

pub struct SyslogParser {
    parser: ParserOperator,
    protocol: Protocol,
}

impl SyslogParser {
    pub fn parse(&self, value: Value) -> Result<Value, OperatorError> {
        let text = match &value {
            Value::String(s) => s.as_str(),
            Value::Bytes(b) => std::str::from_utf8(b)
                .map_err(|e| OperatorError::entry(format!("syslog message is not UTF-8: {e}")))?,
            other => {
                return Err(OperatorError::entry(format!(
                    "type {} cannot be parsed as syslog",
                    other.type_name()
                )));
            }
        };
        parse_message(self.protocol, text, Utc::now()).map(Value::Map)
    }
}

impl Operator for SyslogParser {
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

// ─── 메시지 파싱 ────────────────────────────────────────────────────

fn syntax(reason: impl Into<String>) -> OperatorError {
    OperatorError::entry(format!("invalid syslog message: {}", reason.into()))
}

/// 메시지 한 줄을 결과 맵으로 바꿉니다. `now`는 연도 추론과 빈 시각에 씁니다.
pub fn parse_message(protocol: Protocol, text: &str, now: DateTime<Utc>) -> Result<Map, OperatorError> {
    let text = text.trim_end_matches(['\r', '\n']);
    let (pri, body) = split_pri(text)?;

    let mut out = Map::new();
    out.insert("priority".into(), Value::Int(i64::from(pri)));
    out.insert("facility".into(), Value::Int(i64::from(pri / 8)));
    out.insert("severity".into(), Value::Int(i64::from(pri % 8)));

    match protocol {
        Protocol::Rfc5424 => parse_rfc5424_body(body, now, &mut out)?,
        Protocol::Rfc3164 => parse_rfc3164_body(body, now, &mut out)?,
    }
    Ok(out)
}

/// `<PRI>`를 떼어 냅니다.
fn split_pri(text: &str) -> Result<(u8, &str), OperatorError> {
    let rest = text
        .strip_prefix('<')
        .ok_or_else(|| syntax("expecting a priority value within angle brackets"))?;
    let end = rest
        .find('>')
        .filter(|end| (1..=3).contains(end))
        .ok_or_else(|| syntax("expecting a priority value within angle brackets"))?;
    let pri: u8 = rest[..end]
        .parse()
        .map_err(|_| syntax(format!("priority '{}' is not a number", &rest[..end])))?;
    if pri > MAX_SYSLOG_PRI {
        return Err(syntax(format!("priority {pri} exceeds {MAX_SYSLOG_PRI}")));
    }
    Ok((pri, &rest[end + 1..]))
}

/// 공백 하나로 구분된 다음 토큰을 잘라 냅니다.
fn next_token(input: &str) -> Option<(&str, &str)> {
    if input.is_empty() {
        return None;
    }
    Some(input.split_once(' ').unwrap_or((input, "")))
}

fn insert_unless_nil(out: &mut Map, key: &str, token: &str) {
    if token != "-" && !token.is_empty() {
        out.insert(key.into(), Value::from(token));
    }
}

/// `VERSION SP TIMESTAMP SP HOSTNAME SP APP-NAME SP PROCID SP MSGID SP SD [SP MSG]`
fn parse_rfc5424_body(body: &str, now: DateTime<Utc>, out: &mut Map) -> Result<(), OperatorError> {
    let mut rest = body;
    let mut header = [""; 6];
    for (i, slot) in header.iter_mut().enumerate() {
        let (token, tail) =
            next_token(rest).ok_or_else(|| syntax(format!("header is missing field {}", i + 1)))?;
        *slot = token;
        rest = tail;
    }
    let [version, timestamp, hostname, appname, proc_id, msg_id] = header;

    let version: i64 = version
        .parse()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| syntax(format!("unsupported version '{version}'")))?;
    out.insert("version".into(), Value::Int(version));

    let timestamp = if timestamp == "-" {
        now
    } else {
        DateTime::parse_from_rfc3339(timestamp)
            .map_err(|e| syntax(format!("timestamp '{timestamp}': {e}")))?
            .with_timezone(&Utc)
    };
    out.insert("timestamp".into(), Value::Time(timestamp));

    insert_unless_nil(out, "hostname", hostname);
    insert_unless_nil(out, "appname", appname);
    insert_unless_nil(out, "proc_id", proc_id);
    insert_unless_nil(out, "msg_id", msg_id);

    if rest.is_empty() {
        return Err(syntax("structured data is missing"));
    }
    let message = if let Some(tail) = rest.strip_prefix('-') {
        tail
    } else if rest.starts_with('[') {
        let (sd, tail) = split_sd_and_message(rest)?;
        out.insert("structured_data".into(), Value::Map(parse_structured_data(sd)?));
        tail
    } else {
        return Err(syntax("structured data must be '-' or start with '['"));
    };

    let message = message.strip_prefix(' ').unwrap_or(message);
    // BOM이 붙은 UTF-8 메시지
    let message = message.strip_prefix('\u{feff}').unwrap_or(message);
    if !message.is_empty() {
        out.insert("message".into(), Value::from(message));
    }
    Ok(())
}

/// `[...]` 블록이 끝나는 위치에서 나눕니다. 따옴표 안의 이스케이프와 `]`는 무시합니다.
fn split_sd_and_message(input: &str) -> Result<(&str, &str), OperatorError> {
    let mut in_element = false;
    let mut in_quotes = false;
    let mut escaped = false;

    for (idx, ch) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escaped = true,
            '"' if in_element => in_quotes = !in_quotes,
            '[' if !in_element => in_element = true,
            ']' if in_element && !in_quotes => in_element = false,
            ' ' if !in_element => return Ok((&input[..idx], &input[idx..])),
            _ if !in_element => return Err(syntax("unexpected text after structured data")),
            _ => {}
        }
    }
    if in_element {
        return Err(syntax("unterminated structured data element"));
    }
    Ok((input, ""))
}

/// `[id k="v" ...][id2 ...]` → `{id: {k: v}, id2: {...}}`
fn parse_structured_data(sd: &str) -> Result<Map, OperatorError> {
    let mut elements = Map::new();
    let mut chars = sd.chars().peekable();

    while chars.next() == Some('[') {
        let mut sd_id = String::new();
        while let Some(&ch) = chars.peek() {
            if ch == ']' || ch == ' ' {
                break;
            }
            sd_id.push(ch);
            chars.next();
        }
        if sd_id.is_empty() {
            return Err(syntax("empty SD-ID in structured data"));
        }

        let mut params = Map::new();
        loop {
            match chars.next() {
                Some(']') => break,
                Some(' ') => continue,
                Some(first) => {
                    let mut name = String::from(first);
                    for ch in chars.by_ref() {
                        if ch == '=' {
                            break;
                        }
                        name.push(ch);
                    }
                    if chars.next() != Some('"') {
                        return Err(syntax(format!("value of '{name}' must be quoted")));
                    }
                    let mut value = String::new();
                    let mut escaped = false;
                    for ch in chars.by_ref() {
                        if escaped {
                            value.push(ch);
                            escaped = false;
                        } else if ch == '\\' {
                            escaped = true;
                        } else if ch == '"' {
                            break;
                        } else {
                            value.push(ch);
                        }
                    }
                    params.insert(name, Value::from(value));
                }
                None => return Err(syntax("unterminated structured data element")),
            }
        }
        elements.insert(sd_id, Value::Map(params));
    }
    Ok(elements)
}

/// `Mmm dd hh:mm:ss HOSTNAME TAG[PID]: MSG`
fn parse_rfc3164_body(body: &str, now: DateTime<Utc>, out: &mut Map) -> Result<(), OperatorError> {
    // 한 자리 일자는 공백 두 개로 채워지므로 토큰 단위로 읽습니다.
    let mut stamp = Vec::with_capacity(3);
    let mut rest = body;
    while stamp.len() < 3 {
        let trimmed = rest.trim_start_matches(' ');
        let (token, tail) = next_token(trimmed).ok_or_else(|| syntax("timestamp is incomplete"))?;
        stamp.push(token);
        rest = tail;
    }

    let stamp = stamp.join(" ");
    let timestamp = parse_without_year(&stamp, BSD_TIMESTAMP, now)
        .map_err(|e| syntax(format!("timestamp: {e}")))?;
    out.insert("timestamp".into(), Value::Time(timestamp));

    let rest = rest.trim_start_matches(' ');
    let (hostname, rest) = next_token(rest).ok_or_else(|| syntax("hostname is missing"))?;
    out.insert("hostname".into(), Value::from(hostname));

    let (tag, message) = match rest.find(": ").or_else(|| rest.strip_suffix(':').map(|s| s.len())) {
        Some(end) if !rest[..end].contains(' ') => (&rest[..end], rest[end + 1..].trim_start()),
        _ => ("", rest),
    };
    if !tag.is_empty() {
        match tag.split_once('[') {
            Some((app, pid)) => {
                insert_unless_nil(out, "appname", app);
                insert_unless_nil(out, "proc_id", pid.trim_end_matches(']'));
            }
            None => insert_unless_nil(out, "appname", tag),
        }
    }
    if !message.is_empty() {
        out.insert("message".into(), Value::from(message));
    }
    Ok(())
}
