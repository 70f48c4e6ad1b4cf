//! 오퍼레이터 공통 믹스인
//!
//! 각 오퍼레이터는 종류에 맞는 믹스인을 필드로 갖고 공통 동작을 위임합니다.
//!
//! | 믹스인 | 용도 |
//! |---|---|
//! | [`BasicOperator`] | ID, 타입, span |
//! | [`Writer`] | 하위 오퍼레이터 연결과 팬아웃 |
//! | [`InputOperator`] | `write_to`, 수집 메트릭 |
//! | [`TransformerOperator`] | `on_error` 정책 |
//! | [`ParserOperator`] | `parse_from`/`parse_to`, 하위 파서 |
//! | [`OutputOperator`] | 전달 메트릭 |
//! | [`Workers`] | 워커 태스크와 정지 제한 시간 |

pub mod basic;
pub mod duration;
pub mod input;
pub mod output;
pub mod parser;
pub mod severity;
pub mod time;
pub mod transformer;
pub mod workers;
pub mod writer;

pub(crate) use basic::{delegate_basic, delegate_builder, delegate_writer};

pub use basic::{BasicConfig, BasicOperator};
pub use duration::ConfigDuration;
pub use input::{InputConfig, InputOperator};
pub use output::{OutputConfig, OutputOperator};
pub use parser::{ParserConfig, ParserOperator};
pub use severity::{SeverityParser, SeverityParserConfig};
pub use time::{TimeParser, TimeParserConfig};
pub use transformer::{OnError, TransformerConfig, TransformerOperator};
pub use workers::{STOP_TIMEOUT, Workers};
pub use writer::{OutputIds, Writer, WriterConfig};
