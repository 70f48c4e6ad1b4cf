//! 파서 오퍼레이터 믹스인
//!
//! `parse_from` 값을 읽어 타입별 추출 함수를 적용하고 결과를 `parse_to`에 씁니다.
//! 이후 타임스탬프, 심각도 하위 파서를 순서대로 적용합니다.
//! 어느 단계든 실패하면 엔트리는 원래 상태로 남고 `on_error` 정책을 따릅니다.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::field::Field;
use logweave_core::value::Value;

use super::severity::{SeverityParser, SeverityParserConfig};
use super::time::{TimeParser, TimeParserConfig};
use super::transformer::{TransformerConfig, TransformerOperator};
use crate::error::BuildError;
use crate::registry::BuildContext;

/// 파서 공통 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParserConfig {
    #[serde(flatten)]
    pub transformer: TransformerConfig,
    #[serde(default)]
    pub parse_from: Field,
    #[serde(default)]
    pub parse_to: Field,
    #[serde(default)]
    pub preserve: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<TimeParserConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<SeverityParserConfig>,
}

impl ParserConfig {
    pub fn build(&self, ctx: &BuildContext<'_>) -> Result<ParserOperator, BuildError> {
        let time = self.timestamp.as_ref().map(TimeParserConfig::build).transpose()?;
        let severity = self
            .severity
            .as_ref()
            .map(SeverityParserConfig::build)
            .transpose()?;

        Ok(ParserOperator {
            transformer: self.transformer.build(ctx),
            parse_from: self.parse_from.clone(),
            parse_to: self.parse_to.clone(),
            preserve: self.preserve,
            time,
            severity,
        })
    }
}

/// 빌드된 파서 공통부
pub struct ParserOperator {
    pub transformer: TransformerOperator,
    parse_from: Field,
    parse_to: Field,
    preserve: bool,
    time: Option<TimeParser>,
    severity: Option<SeverityParser>,
}

impl ParserOperator {
    pub fn id(&self) -> &str {
        self.transformer.id()
    }

    pub fn parse_from(&self) -> &Field {
        &self.parse_from
    }

    /// 엔트리를 파싱한 뒤 하위로 보냅니다.
    pub async fn process_with<F>(
        &self,
        cancel: &CancellationToken,
        entry: Entry,
        parse: F,
    ) -> Result<(), OperatorError>
    where
        F: FnOnce(Value) -> Result<Value, OperatorError>,
    {
        self.transformer
            .process_with(cancel, entry, |entry| self.parse_entry(entry, parse))
            .await
    }

    /// 파싱 결과를 엔트리에 적용합니다. 실패하면 엔트리를 바꾸지 않습니다.
    pub fn parse_entry<F>(&self, entry: &mut Entry, parse: F) -> Result<(), OperatorError>
    where
        F: FnOnce(Value) -> Result<Value, OperatorError>,
    {
        let value = entry.get(&self.parse_from).ok_or_else(|| {
            tracing::debug!(parse_from = %self.parse_from, "entry is missing parse_from field");
            OperatorError::entry(format!(
                "entry is missing the expected parse_from field '{}'",
                self.parse_from
            ))
        })?;
        let parsed = parse(value)?;

        let mut next = entry.clone();
        if !self.preserve {
            next.delete(&self.parse_from);
        }
        write_parsed(&mut next, &self.parse_to, parsed)?;

        if let Some(time) = &self.time {
            time.parse(&mut next)?;
        }
        if let Some(severity) = &self.severity {
            severity.parse(&mut next)?;
        }

        *entry = next;
        Ok(())
    }
}

/// 대상이 이미 맵이고 결과도 맵이면 키 단위로 병합합니다. 그 외에는 덮어씁니다.
fn write_parsed(entry: &mut Entry, to: &Field, parsed: Value) -> Result<(), OperatorError> {
    match (to.get_mut(entry), parsed) {
        (Some(Value::Map(existing)), Value::Map(parsed)) => {
            existing.extend(parsed);
            Ok(())
        }
        (_, parsed) => entry.set(to, parsed).map_err(Into::into),
    }
}
