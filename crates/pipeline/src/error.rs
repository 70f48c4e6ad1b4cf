//! 오퍼레이터 빌드 에러 타입
//!
//! [`BuildError`]는 오퍼레이터 설정을 실행 가능한 오퍼레이터로 만드는 중 발생하는 에러입니다.
//! 그래프 빌더가 오퍼레이터 ID와 함께 [`PipelineError::Build`]로 감쌉니다.

use logweave_core::error::{LogweaveError, PipelineError};

/// 오퍼레이터 빌드 에러
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// 설정 값 에러
    #[error("{field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 설정 역직렬화 실패
    #[error("invalid operator config: {0}")]
    Decode(#[from] serde_yaml::Error),

    /// 정규식 컴파일 실패
    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),

    /// glob 패턴 에러
    #[error("invalid glob pattern: {0}")]
    Glob(#[from] glob::PatternError),

    /// 표현식 컴파일 실패
    #[error("invalid expression '{expr}': {reason}")]
    Expr { expr: String, reason: String },

    /// 서브 파이프라인 템플릿 에러
    #[error("plugin '{plugin}': {reason}")]
    Template { plugin: String, reason: String },

    /// TLS 설정 에러
    #[error("tls: {0}")]
    Tls(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 서브 파이프라인 빌드 실패
    #[error("{0}")]
    Pipeline(#[from] Box<PipelineError>),
}

impl BuildError {
    /// 설정 값 에러를 생성합니다.
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// 오퍼레이터 ID를 붙여 그래프 에러로 변환합니다.
    ///
    /// 서브 파이프라인 에러는 감싸지 않고 그대로 꺼냅니다.
    pub fn into_pipeline_error(self, operator: &str) -> PipelineError {
        match self {
            BuildError::Pipeline(inner) => *inner,
            other => PipelineError::Build {
                operator: operator.to_owned(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<PipelineError> for BuildError {
    fn from(err: PipelineError) -> Self {
        BuildError::Pipeline(Box::new(err))
    }
}

impl From<BuildError> for LogweaveError {
    fn from(err: BuildError) -> Self {
        LogweaveError::Pipeline(PipelineError::InitFailed(err.to_string()))
    }
}
