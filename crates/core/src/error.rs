//! 에러 타입 — 도메인별 에러 정의
//!
//! 에러는 발생 시점에 따라 나뉩니다.
//! - 빌드 에러 ([`PipelineError`], [`ConfigError`]): 시작 전에 치명적
//! - 엔트리 단위 에러 ([`OperatorError`]): 사용자 에러만 `on_error` 정책 대상
//! - 영속화 에러 ([`PersistError`]): 로그 후 다음 주기에 재시도

/// logweave 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum LogweaveError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 그래프 빌드/생명주기 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 오퍼레이터 처리 에러
    #[error("operator error: {0}")]
    Operator(#[from] OperatorError),

    /// 영속화 에러
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// glob 패턴과 일치하는 설정 파일이 없음
    #[error("no config files matched '{pattern}'")]
    NoMatches { pattern: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 그래프 빌드 및 생명주기 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 등록되지 않은 오퍼레이터 타입
    #[error("unsupported operator type '{type_name}'")]
    UnsupportedType { type_name: String },

    /// `type` 필드 누락
    #[error("missing required field 'type' in operator spec #{index}")]
    MissingType { index: usize },

    /// 중복 타입 등록
    #[error("operator type '{type_name}' is already registered")]
    DuplicateType { type_name: String },

    /// 중복 오퍼레이터 ID
    #[error("operator with id '{id}' already exists")]
    DuplicateId { id: String },

    /// 출력 대상이 존재하지 않음
    #[error("operator '{operator}' references output '{output}' which does not exist")]
    MissingOutput { operator: String, output: String },

    /// 출력 대상이 엔트리를 처리할 수 없음
    #[error("operator '{operator}' outputs to '{output}' which cannot process entries")]
    OutputCannotProcess { operator: String, output: String },

    /// 같은 연결이 두 번 선언됨
    #[error("connection from '{operator}' to '{output}' already exists")]
    DuplicateConnection { operator: String, output: String },

    /// 출력을 선언하지 않았고 기본 출력도 없음
    #[error("operator '{operator}' declares no output and has no next operator")]
    NoDefaultOutput { operator: String },

    /// 출력을 가질 수 없는 오퍼레이터에 출력이 지정됨
    #[error("operator '{operator}' cannot have outputs")]
    CannotOutput { operator: String },

    /// 순환 참조
    #[error("pipeline has a circular dependency: {path}")]
    Cycle { path: String },

    /// 연결된 오퍼레이터 묶음에 입력 또는 출력이 없음
    #[error("operators [{operators}] are connected to each other but have no {missing}")]
    Disconnected { operators: String, missing: String },

    /// 개별 오퍼레이터 빌드 실패
    #[error("failed to build operator '{operator}': {reason}")]
    Build { operator: String, reason: String },

    /// 여러 빌드 에러를 한 번에 보고
    #[error("pipeline is invalid: {}", join_errors(.0))]
    Invalid(Vec<PipelineError>),

    /// 오퍼레이터 시작 실패
    #[error("failed to start operator '{operator}': {reason}")]
    StartFailed { operator: String, reason: String },

    /// 오퍼레이터 정지 실패 (집계)
    #[error("failed to stop pipeline: {0}")]
    StopFailed(String),

    /// 이미 실행 중
    #[error("pipeline is already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline is not running")]
    NotRunning,

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),
}

fn join_errors(errors: &[PipelineError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// 오퍼레이터가 엔트리를 처리하는 중 발생한 에러
///
/// [`OperatorError::Entry`]만 사용자 에러로 취급되어 `on_error` 정책을 따릅니다.
/// 나머지는 시스템 에러로 항상 호출자에게 전달됩니다.
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    /// 잘못된 데이터, 파싱 실패 등 엔트리에 기인한 에러
    #[error("{reason}")]
    Entry { reason: String },

    /// 엔트리를 처리할 수 없는 오퍼레이터에 전달됨
    #[error("operator '{operator}' cannot process entries")]
    CannotProcess { operator: String },

    /// 취소됨
    #[error("operation cancelled")]
    Cancelled,

    /// 오퍼레이터가 이미 정지됨
    #[error("operator '{operator}' is closed")]
    Closed { operator: String },

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 기타 시스템 에러
    #[error("{0}")]
    System(String),
}

impl OperatorError {
    /// 사용자 에러를 생성합니다.
    pub fn entry(reason: impl Into<String>) -> Self {
        Self::Entry {
            reason: reason.into(),
        }
    }

    /// `on_error` 정책 대상인지 확인합니다.
    pub fn is_user(&self) -> bool {
        matches!(self, Self::Entry { .. })
    }
}

/// 영속화 에러
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// 저장소 파일 I/O 실패
    #[error("database io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// 저장소 내용이 손상됨
    #[error("database is corrupt: {reason}")]
    Corrupt { reason: String },

    /// 값 인코딩/디코딩 실패
    #[error("failed to encode value for key '{key}': {reason}")]
    Encoding { key: String, reason: String },

    /// 잠금 획득 실패
    #[error("database lock poisoned")]
    Poisoned,
}

/// Entry 필드 조작 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    /// 필드 표현식 파싱 실패
    #[error("invalid field '{field}': {reason}")]
    Invalid { field: String, reason: String },

    /// 레이블에는 문자열만 저장 가능
    #[error("cannot set label '{label}' to a {type_name} value")]
    LabelType { label: String, type_name: String },
}

impl From<FieldError> for OperatorError {
    fn from(err: FieldError) -> Self {
        OperatorError::entry(err.to_string())
    }
}
