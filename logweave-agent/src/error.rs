//! Agent error type and exit code mapping

use logweave_core::error::{LogweaveError, PersistError, PipelineError};

/// Agent-level error.
///
/// Every variant maps to exit code 1; success is 0.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Configuration loading, validation or pipeline build failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// An operator or the agent environment failed to start.
    #[error("start failed: {0}")]
    Start(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// IO error (stdout write, signal handler install, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Map the error to a process exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Start(_) | Self::Command(_) | Self::Io(_) => 1,
        }
    }
}

impl From<LogweaveError> for AgentError {
    fn from(e: LogweaveError) -> Self {
        match e {
            LogweaveError::Io(io) => Self::Io(io),
            LogweaveError::Pipeline(p) => p.into(),
            LogweaveError::Persist(p) => p.into(),
            other => Self::Config(other.to_string()),
        }
    }
}

impl From<PipelineError> for AgentError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::StartFailed { .. } | PipelineError::StopFailed(_) => {
                Self::Start(e.to_string())
            }
            other => Self::Config(other.to_string()),
        }
    }
}

impl From<PersistError> for AgentError {
    fn from(e: PersistError) -> Self {
        Self::Command(format!("offsets database: {e}"))
    }
}
