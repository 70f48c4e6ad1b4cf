//! logweave 공통 크레이트
//!
//! 파이프라인 엔진이 공유하는 데이터 모델과 인터페이스를 정의합니다.
//!
//! - [`entry`]: 로그 엔트리와 심각도
//! - [`value`]: 레코드 값 트리
//! - [`field`]: 엔트리 필드 셀렉터
//! - [`persist`]: 스코프 키-값 영속화
//! - [`operator`]: 오퍼레이터 trait
//! - [`config`]: 에이전트 설정
//! - [`error`]: 에러 타입
//! - [`metrics`]: 메트릭 이름

pub mod config;
pub mod entry;
pub mod error;
pub mod field;
pub mod metrics;
pub mod operator;
pub mod persist;
pub mod value;

// --- 주요 타입 re-export ---

pub use config::AgentConfig;
pub use entry::{Entry, Severity};
pub use error::{
    ConfigError, FieldError, LogweaveError, OperatorError, PersistError, PipelineError,
};
pub use field::Field;
pub use operator::{BoxFuture, DynOperator, Operator, SharedOperator, StartContext};
pub use persist::{Database, FileDatabase, MemoryDatabase, Persister, ScopedPersister};
pub use value::{Map, Value};
