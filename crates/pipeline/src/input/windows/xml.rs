//! 렌더링된 Windows 이벤트 XML 디코딩

use chrono::{DateTime, Utc};
use serde::Deserialize;

use logweave_core::entry::{Entry, Severity};
use logweave_core::value::{Map, Value};

/// `<Event>` 요소
#[derive(Debug, Default, Deserialize)]
pub struct EventXml {
    #[serde(rename = "System", default)]
    pub system: System,
    #[serde(rename = "RenderingInfo", default)]
    pub rendering_info: RenderingInfo,
}

#[derive(Debug, Default, Deserialize)]
pub struct System {
    #[serde(rename = "Provider", default)]
    pub provider: Provider,
    #[serde(rename = "EventID", default)]
    pub event_id: EventId,
    #[serde(rename = "TimeCreated", default)]
    pub time_created: TimeCreated,
    #[serde(rename = "EventRecordID", default)]
    pub record_id: u64,
    #[serde(rename = "Channel", default)]
    pub channel: String,
    #[serde(rename = "Computer", default)]
    pub computer: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Provider {
    #[serde(rename = "@Name", default)]
    pub name: String,
    #[serde(rename = "@Guid", default)]
    pub guid: String,
    #[serde(rename = "@EventSourceName", default)]
    pub event_source_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventId {
    #[serde(rename = "@Qualifiers", default)]
    pub qualifiers: Option<String>,
    #[serde(rename = "$text", default)]
    pub id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TimeCreated {
    #[serde(rename = "@SystemTime", default)]
    pub system_time: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RenderingInfo {
    #[serde(rename = "Message", default)]
    pub message: String,
    #[serde(rename = "Level", default)]
    pub level: String,
    #[serde(rename = "Task", default)]
    pub task: String,
    #[serde(rename = "Opcode", default)]
    pub opcode: String,
    #[serde(rename = "Keywords", default)]
    pub keywords: Keywords,
}

#[derive(Debug, Default, Deserialize)]
pub struct Keywords {
    #[serde(rename = "Keyword", default)]
    pub keyword: Vec<String>,
}

impl EventXml {
    pub fn parse(xml: &str) -> Result<Self, quick_xml::DeError> {
        quick_xml::de::from_str(xml)
    }

    /// 생성 시각. 파싱할 수 없으면 현재 시각입니다.
    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&self.system.time_created.system_time)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    pub fn severity(&self) -> Severity {
        match self.rendering_info.level.as_str() {
            "Critical" => Severity::CRITICAL,
            "Error" => Severity::ERROR,
            "Warning" => Severity::WARNING,
            "Information" => Severity::INFO,
            _ => Severity::DEFAULT,
        }
    }

    pub fn record(&self) -> Value {
        let system = &self.system;
        let info = &self.rendering_info;
        let parse_int = |text: &Option<String>| {
            text.as_deref()
                .and_then(|t| t.trim().parse::<i64>().ok())
                .unwrap_or(0)
        };

        let mut event_id = Map::new();
        event_id.insert("qualifiers".into(), Value::Int(parse_int(&system.event_id.qualifiers)));
        event_id.insert("id".into(), Value::Int(parse_int(&system.event_id.id)));

        let mut provider = Map::new();
        provider.insert("name".into(), Value::from(system.provider.name.as_str()));
        provider.insert("guid".into(), Value::from(system.provider.guid.as_str()));
        provider.insert(
            "event_source".into(),
            Value::from(system.provider.event_source_name.as_str()),
        );

        let (message, details) = if system.channel == "Security" {
            parse_security_message(&info.message)
        } else {
            (info.message.clone(), None)
        };

        let mut record = Map::new();
        record.insert("event_id".into(), Value::Map(event_id));
        record.insert("provider".into(), Value::Map(provider));
        record.insert(
            "system_time".into(),
            Value::from(system.time_created.system_time.as_str()),
        );
        record.insert("computer".into(), Value::from(system.computer.as_str()));
        record.insert("channel".into(), Value::from(system.channel.as_str()));
        record.insert(
            "record_id".into(),
            Value::Int(i64::try_from(system.record_id).unwrap_or(i64::MAX)),
        );
        record.insert("level".into(), Value::from(info.level.as_str()));
        record.insert("message".into(), Value::from(message));
        record.insert("task".into(), Value::from(info.task.as_str()));
        record.insert("opcode".into(), Value::from(info.opcode.as_str()));
        record.insert(
            "keywords".into(),
            Value::Array(info.keywords.keyword.iter().map(|k| Value::from(k.as_str())).collect()),
        );
        if let Some(details) = details {
            record.insert("details".into(), Value::Map(details));
        }
        Value::Map(record)
    }

    pub fn to_entry(&self) -> Entry {
        let mut entry = Entry::with_record(self.record());
        entry.timestamp = self.timestamp();
        entry.severity = self.severity();
        entry
    }
}

/// `wevtutil` 출력에서 `<Event>` 요소들을 잘라냅니다.
pub fn split_events(output: &str) -> Vec<&str> {
    const CLOSE: &str = "</Event>";
    let mut events = Vec::new();
    let mut rest = output;
    while let Some(start) = rest.find("<Event") {
        let Some(end) = rest[start..].find(CLOSE) else {
            break;
        };
        let end = start + end + CLOSE.len();
        events.push(&rest[start..end]);
        rest = &rest[end..];
    }
    events
}

// ─── Security message ───────────────────────────────────────────────

/// Security 채널 메시지를 요약과 상세로 나눕니다.
///
/// 빈 줄로 구분된 첫 구역이 요약이고, 나머지는 `키: 값`, 하위 맵, 목록으로 해석합니다.
/// 해석할 수 없는 줄은 `Unparsed`, 설명 문장은 `Additional Context`에 모읍니다.
pub fn parse_security_message(message: &str) -> (String, Option<Map>) {
    let message = message.replace("\r\n", "\n");
    let mut sections = message.split("\n\n");
    let summary = sections.next().unwrap_or_default().to_owned();
    let sections: Vec<&str> = sections.collect();
    if sections.is_empty() {
        return (summary, None);
    }

    let mut details = Map::new();
    let mut more_info = Vec::new();
    let mut unparsed = Vec::new();

    for section in sections {
        let lines: Vec<&str> = section.split('\n').collect();
        let first = lines[0];

        if lines.len() == 1 {
            let parts: Vec<&str> = first.split(':').collect();
            match parts.as_slice() {
                [text] => more_info.push(text.trim().to_owned()),
                [key, value] => {
                    details.insert(key.trim().to_owned(), Value::from(value.trim()));
                }
                _ => unparsed.push(first.trim().to_owned()),
            }
            continue;
        }

        if !first.contains(':') {
            more_info.extend(lines.iter().map(|l| l.trim().to_owned()));
            continue;
        }

        let parts: Vec<&str> = first.trim().split(':').collect();
        let key = parts[0].trim().to_owned();
        if parts.len() == 1 || parts[1].trim().is_empty() {
            // 키 아래에 들여쓴 `키: 값` 줄들
            let mut nested = Map::new();
            for line in &lines[1..] {
                let kv: Vec<&str> = line.split(':').collect();
                let value = match kv.get(1).map(|v| v.trim()) {
                    Some(v) if !v.is_empty() => v,
                    _ => "-",
                };
                nested.insert(kv[0].trim().to_owned(), Value::from(value));
            }
            details.insert(key, Value::Map(nested));
        } else if parts.len() == 2 {
            // 첫 값 아래에 이어지는 목록
            let mut items = vec![Value::from(parts[1].trim())];
            items.extend(
                lines[1..]
                    .iter()
                    .map(|l| l.trim())
                    .filter(|l| !l.is_empty())
                    .map(Value::from),
            );
            details.insert(key, Value::Array(items));
        } else {
            unparsed.extend(lines.iter().map(|l| l.trim().to_owned()));
        }
    }

    if !more_info.is_empty() {
        details.insert(
            "Additional Context".into(),
            Value::Array(more_info.into_iter().map(Value::from).collect()),
        );
    }
    if !unparsed.is_empty() {
        details.insert(
            "Unparsed".into(),
            Value::Array(unparsed.into_iter().map(Value::from).collect()),
        );
    }
    (summary, Some(details))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const EVENT: &str = r#"<Event xmlns='http://schemas.microsoft.com/win/2004/08/events/event'>
  <System>
    <Provider Name='Microsoft-Windows-Security-SPP' Guid='{E23B33B0-C8C9-472C-A5F9-F2BDFEA0F156}' EventSourceName='Software Protection Platform Service'/>
    <EventID Qualifiers='16384'>16384</EventID>
    <Version>0</Version>
    <Level>4</Level>
    <TimeCreated SystemTime='2020-07-30T01:01:01.123456789Z'/>
    <EventRecordID>1</EventRecordID>
    <Channel>Application</Channel>
    <Computer>computer</Computer>
    <Security/>
  </System>
  <RenderingInfo Culture='en-US'>
    <Message>message</Message>
    <Level>Information</Level>
    <Task></Task>
    <Opcode>Info</Opcode>
    <Keywords>
      <Keyword>Classic</Keyword>
    </Keywords>
  </RenderingInfo>
</Event>"#;

    #[test]
    fn decodes_rendered_event() {
        let event = EventXml::parse(EVENT).unwrap();
        assert_eq!(event.system.record_id, 1);
        assert_eq!(event.severity(), Severity::INFO);
        assert_eq!(
            event.timestamp().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
            "2020-07-30T01:01:01.123456789Z"
        );
        assert_eq!(
            event.record().to_json(),
            json!({
                "event_id": {"qualifiers": 16384, "id": 16384},
                "provider": {
                    "name": "Microsoft-Windows-Security-SPP",
                    "guid": "{E23B33B0-C8C9-472C-A5F9-F2BDFEA0F156}",
                    "event_source": "Software Protection Platform Service"
                },
                "system_time": "2020-07-30T01:01:01.123456789Z",
                "computer": "computer",
                "channel": "Application",
                "record_id": 1,
                "level": "Information",
                "message": "message",
                "task": "",
                "opcode": "Info",
                "keywords": ["Classic"]
            })
        );
    }

    #[test]
    fn level_mapping() {
        for (level, severity) in [
            ("Critical", Severity::CRITICAL),
            ("Error", Severity::ERROR),
            ("Warning", Severity::WARNING),
            ("Information", Severity::INFO),
            ("Verbose", Severity::DEFAULT),
        ] {
            let event = EventXml {
                rendering_info: RenderingInfo {
                    level: level.into(),
                    ..Default::default()
                },
                ..Default::default()
            };
            assert_eq!(event.severity(), severity, "{level}");
        }
    }

    #[test]
    fn splits_concatenated_events() {
        let output = format!("{EVENT}\r\n{EVENT}\r\n<Event");
        assert_eq!(split_events(&output).len(), 2);
        assert!(split_events("").is_empty());
    }

    #[test]
    fn security_message_details() {
        let message = "An account was successfully logged on.\n\n\
Subject:\n\tSecurity ID:\t\tSYSTEM\n\tAccount Name:\t\t-\n\n\
Logon Type:\t\t5\n\n\
Privileges:\t\tSeAssignPrimaryTokenPrivilege\n\t\t\tSeTcbPrivilege\n\n\
This event is generated when a logon session is created.";
        let (summary, details) = parse_security_message(message);
        assert_eq!(summary, "An account was successfully logged on.");
        assert_eq!(
            Value::Map(details.unwrap()).to_json(),
            json!({
                "Subject": {"Security ID": "SYSTEM", "Account Name": "-"},
                "Logon Type": "5",
                "Privileges": ["SeAssignPrimaryTokenPrivilege", "SeTcbPrivilege"],
                "Additional Context": ["This event is generated when a logon session is created."]
            })
        );
    }

    #[test]
    fn single_section_message_has_no_details() {
        assert_eq!(parse_security_message("just text"), ("just text".to_owned(), None));
    }
}
