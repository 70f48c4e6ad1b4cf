//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 레코더가 설치되지 않으면 `metrics` 매크로는 아무 일도 하지 않습니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `logweave_`
//! - 접미어: `_total` (counter), 없음 (gauge)
//!
//! ```ignore
//! metrics::counter!(logweave_core::metrics::ENTRIES_PROCESSED_TOTAL,
//!     logweave_core::metrics::LABEL_OPERATOR => "json_parser").increment(1);
//! ```

use metrics::{describe_counter, describe_gauge};

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 오퍼레이터 ID 레이블 키
pub const LABEL_OPERATOR: &str = "operator";

/// 드롭 사유 레이블 키 (on_error, filter, router)
pub const LABEL_REASON: &str = "reason";

/// HTTP 상태 코드 레이블 키
pub const LABEL_STATUS: &str = "status";

// ─── 엔진 메트릭 ───────────────────────────────────────────────────

/// 입력이 생성한 엔트리 수 (counter, label: operator)
pub const ENTRIES_INGESTED_TOTAL: &str = "logweave_entries_ingested_total";

/// 출력이 처리한 엔트리 수 (counter, label: operator)
pub const ENTRIES_PROCESSED_TOTAL: &str = "logweave_entries_processed_total";

/// 버려진 엔트리 수 (counter, labels: operator, reason)
pub const ENTRIES_DROPPED_TOTAL: &str = "logweave_entries_dropped_total";

/// 처리 에러 수 (counter, label: operator)
pub const PROCESS_ERRORS_TOTAL: &str = "logweave_process_errors_total";

/// 실행 중인 파일 리더 수 (gauge)
pub const FILE_READERS_ACTIVE: &str = "logweave_file_readers_active";

/// 체크포인트 저장 실패 수 (counter, label: operator)
pub const CHECKPOINT_FAILURES_TOTAL: &str = "logweave_checkpoint_failures_total";

/// HTTP 입력 요청 수 (counter, label: status)
pub const HTTP_REQUESTS_TOTAL: &str = "logweave_http_requests_total";

/// 파이프라인 오퍼레이터 수 (gauge)
pub const PIPELINE_OPERATORS: &str = "logweave_pipeline_operators";

/// 모든 메트릭의 설명을 등록합니다.
///
/// 레코더 설치 직후 한 번 호출합니다.
pub fn describe_all() {
    describe_counter!(ENTRIES_INGESTED_TOTAL, "Entries produced by input operators");
    describe_counter!(ENTRIES_PROCESSED_TOTAL, "Entries delivered by output operators");
    describe_counter!(ENTRIES_DROPPED_TOTAL, "Entries discarded by policy or routing");
    describe_counter!(PROCESS_ERRORS_TOTAL, "Errors returned while processing entries");
    describe_gauge!(FILE_READERS_ACTIVE, "File readers currently running");
    describe_counter!(CHECKPOINT_FAILURES_TOTAL, "Failed checkpoint writes");
    describe_counter!(HTTP_REQUESTS_TOTAL, "Requests handled by http inputs");
    describe_gauge!(PIPELINE_OPERATORS, "Operators in the running pipeline");
}
