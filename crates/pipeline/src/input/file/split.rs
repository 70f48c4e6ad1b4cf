//! 토큰 분할
//!
//! 버퍼에서 토큰 하나를 잘라냅니다. 토큰이 아직 완성되지 않았으면 `None`을 반환해
//! 더 읽도록 합니다. `at_eof`이면 남은 데이터를 마지막 토큰으로 내보냅니다.

use std::ops::Range;

use regex::bytes::Regex;
use serde::{Deserialize, Serialize};

use crate::error::BuildError;

/// 멀티라인 설정. 두 패턴 중 정확히 하나만 지정합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultilineConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_start_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end_pattern: Option<String>,
}

/// 잘라낸 토큰. `advance`만큼 버퍼를 소비하고 `token` 범위를 내보냅니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub advance: usize,
    pub token: Range<usize>,
}

#[derive(Debug, Clone)]
pub enum Splitter {
    Newline,
    LineStart(Regex),
    LineEnd(Regex),
}

impl Splitter {
    pub fn from_config(multiline: Option<&MultilineConfig>) -> Result<Self, BuildError> {
        let Some(multiline) = multiline else {
            return Ok(Splitter::Newline);
        };
        let start = multiline.line_start_pattern.as_deref().filter(|p| !p.is_empty());
        let end = multiline.line_end_pattern.as_deref().filter(|p| !p.is_empty());
        match (start, end) {
            (Some(_), Some(_)) => Err(BuildError::config(
                "multiline",
                "only one of line_start_pattern or line_end_pattern can be set",
            )),
            (None, None) => Err(BuildError::config(
                "multiline",
                "one of line_start_pattern or line_end_pattern must be set",
            )),
            (Some(pattern), None) => Ok(Splitter::LineStart(Regex::new(&format!("(?m){pattern}"))?)),
            (None, Some(pattern)) => Ok(Splitter::LineEnd(Regex::new(&format!("(?m){pattern}"))?)),
        }
    }

    /// 다음 토큰을 찾습니다.
    pub fn split(&self, data: &[u8], at_eof: bool) -> Option<Split> {
        if data.is_empty() {
            return None;
        }
        let found = match self {
            Splitter::Newline => split_newline(data),
            Splitter::LineStart(re) => split_line_start(re, data, at_eof),
            Splitter::LineEnd(re) => split_line_end(re, data, at_eof),
        };
        match found {
            Some(split) => Some(split),
            None if at_eof => Some(Split {
                advance: data.len(),
                token: trim_trailing_newline(data, 0..data.len()),
            }),
            None => None,
        }
    }
}

fn split_newline(data: &[u8]) -> Option<Split> {
    let end = data.iter().position(|b| *b == b'\n')?;
    Some(Split {
        advance: end + 1,
        token: trim_trailing_newline(data, 0..end + 1),
    })
}

fn split_line_start(re: &Regex, data: &[u8], at_eof: bool) -> Option<Split> {
    let first = re.find(data)?;
    if first.start() != 0 {
        // 패턴 앞부분도 잃지 않도록 첫 매치 전까지를 하나의 토큰으로 냅니다.
        return Some(Split {
            advance: first.start(),
            token: trim_trailing_newline(data, 0..first.start()),
        });
    }

    let search_from = first.end().max(1);
    if search_from >= data.len() {
        return None;
    }
    let second = re.find_at(data, search_from)?;
    if second.end() == data.len() && !at_eof {
        return None;
    }
    Some(Split {
        advance: second.start(),
        token: trim_trailing_newline(data, 0..second.start()),
    })
}

fn split_line_end(re: &Regex, data: &[u8], at_eof: bool) -> Option<Split> {
    let found = re.find(data)?;
    // 매치가 버퍼 끝까지 이어지면 더 긴 매치가 있을 수 있습니다.
    if found.end() == data.len() && !at_eof {
        return None;
    }
    let mut advance = found.end().max(1);
    if data.get(advance) == Some(&b'\n') {
        advance += 1;
    }
    Some(Split {
        advance,
        token: trim_trailing_newline(data, 0..found.end().max(1)),
    })
}

fn trim_trailing_newline(data: &[u8], range: Range<usize>) -> Range<usize> {
    let mut end = range.end;
    if end > range.start && data[end - 1] == b'\n' {
        end -= 1;
    }
    if end > range.start && data[end - 1] == b'\r' {
        end -= 1;
    }
    range.start..end
}
