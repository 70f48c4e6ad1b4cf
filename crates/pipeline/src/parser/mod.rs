//! 파서 오퍼레이터
//!
//! 모두 [`ParserConfig`](crate::helper::ParserConfig) 믹스인을 공유하며
//! `parse_from` 값을 구조화한 결과를 `parse_to`에 씁니다.
//! `time_parser`와 `severity_parser`는 하위 파서를 단독 오퍼레이터로 감쌉니다.

pub mod csv;
pub mod json;
pub mod key_value;
pub mod regex;
pub mod severity;
pub mod syslog;
pub mod time;
pub mod uri;
