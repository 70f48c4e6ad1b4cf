//! logweave 파이프라인 엔진
//!
//! 설정의 오퍼레이터 명세를 그래프로 빌드하고 실행합니다.
//!
//! # 구조
//! ```text
//! [입력] ──▶ [파서] ──▶ [변환] ──▶ [출력]
//!   file        json       router       file
//!   tcp/udp     regex      restructure  stdout
//!   http        syslog     rate_limit   log_output
//!   journald    time       filter       drop_output
//!   windows     severity   metadata/noop
//!   generate    key_value  regex_replace
//!               csv        host_metadata
//!               uri        add/copy/move/remove/retain/flatten
//! ```
//!
//! - [`registry`]: 타입 이름 → 빌더
//! - [`builder`]: 명세 → 연결된 오퍼레이터 그래프
//! - [`pipeline`]: 시작/정지 순서와 롤백
//! - [`plugin`]: 매개변수화된 서브 파이프라인 템플릿
//! - [`expr`]: 라우터/필터/메타데이터가 쓰는 표현식 언어

pub mod builder;
pub mod error;
pub mod expr;
pub mod helper;
pub mod input;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod plugin;
pub mod registry;
pub mod transform;

#[cfg(test)]
pub(crate) mod testutil;

pub use builder::build_pipeline;
pub use error::BuildError;
pub use expr::{ExprString, Expression};
pub use pipeline::{Pipeline, PipelineState};
pub use plugin::Plugin;
pub use registry::{BuildContext, OperatorBuilder, Registry};
