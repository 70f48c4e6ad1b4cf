//! 변환 오퍼레이터
//!
//! 모두 엔트리를 받아 하위로 보내며, 호출자의 태스크에서 실행됩니다.
//! `rate_limit`만 자체 틱 태스크를 갖습니다.

pub mod field;
pub mod filter;
pub mod host_metadata;
pub mod metadata;
pub mod noop;
pub mod rate_limit;
pub mod regex_replace;
pub mod restructure;
pub mod router;
