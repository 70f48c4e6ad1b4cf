//! 에이전트 설정 — 설정 파일 로딩, 병합, 환경변수 오버라이드
//!
//! [`AgentConfig`]는 파이프라인 정의와 실행 환경 설정을 담습니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (`--database`, `--plugin_dir`, `--debug`)
//! 2. 환경변수 (`LOGWEAVE_DATABASE_FILE` 형식)
//! 3. 설정 파일 (YAML, JSON, TOML. 확장자로 판별)
//! 4. 기본값
//!
//! # 병합
//! `-c`는 여러 번 지정할 수 있고 각 값은 glob입니다.
//! 파이프라인은 파일 순서대로 이어 붙이고, 스칼라 설정은 마지막 파일이 우선합니다.
//!
//! ```no_run
//! # async fn example() -> Result<(), logweave_core::error::LogweaveError> {
//! use logweave_core::config::AgentConfig;
//!
//! let config = AgentConfig::load(&["/etc/logweave/*.yaml".to_owned()]).await?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, LogweaveError};

/// 허용되는 로그 레벨
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// 허용되는 로그 형식
pub const LOG_FORMATS: [&str; 2] = ["json", "pretty"];

/// 병합이 끝난 에이전트 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// 오퍼레이터 명세 목록 (선언 순서 유지)
    #[serde(default)]
    pub pipeline: Vec<serde_yaml::Value>,
    /// 서브 파이프라인 템플릿 디렉토리
    #[serde(default)]
    pub plugin_dir: Option<PathBuf>,
    /// 영속화 파일 경로. 없으면 메모리 저장소를 사용합니다.
    #[serde(default)]
    pub database_file: Option<PathBuf>,
    /// 로깅 설정
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 로깅 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub level: String,
    /// 로그 형식 (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "pretty".to_owned(),
        }
    }
}

/// 설정 파일 하나의 원본 형태. 병합 시 명시된 값만 덮어씁니다.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    pipeline: Vec<serde_yaml::Value>,
    plugin_dir: Option<PathBuf>,
    database_file: Option<PathBuf>,
    logging: Option<PartialLogging>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialLogging {
    level: Option<String>,
    format: Option<String>,
}

/// 설정 파일 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    /// 확장자로 형식을 판별합니다. 알 수 없는 확장자는 YAML로 취급합니다.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => ConfigFormat::Json,
            Some("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Yaml,
        }
    }
}

impl AgentConfig {
    /// glob 목록에서 설정을 로드하고 환경변수 오버라이드와 검증을 적용합니다.
    pub async fn load(patterns: &[String]) -> Result<Self, LogweaveError> {
        let mut config = Self::from_globs(patterns).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// glob 목록이 가리키는 모든 파일을 순서대로 읽어 병합합니다.
    pub async fn from_globs(patterns: &[String]) -> Result<Self, LogweaveError> {
        let mut config = Self::default();
        for pattern in patterns {
            let paths = expand_glob(pattern)?;
            for path in paths {
                let file = read_config_file(&path).await?;
                config.merge(file);
            }
        }
        Ok(config)
    }

    /// 단일 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LogweaveError> {
        let mut config = Self::default();
        config.merge(read_config_file(path.as_ref()).await?);
        Ok(config)
    }

    /// 문자열에서 설정을 파싱합니다.
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self, LogweaveError> {
        let mut config = Self::default();
        config.merge(parse_config_file(content, format)?);
        Ok(config)
    }

    fn merge(&mut self, file: ConfigFile) {
        self.pipeline.extend(file.pipeline);
        if file.plugin_dir.is_some() {
            self.plugin_dir = file.plugin_dir;
        }
        if file.database_file.is_some() {
            self.database_file = file.database_file;
        }
        if let Some(logging) = file.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `LOGWEAVE_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        override_path(&mut self.database_file, "LOGWEAVE_DATABASE_FILE");
        override_path(&mut self.plugin_dir, "LOGWEAVE_PLUGIN_DIR");
        override_string(&mut self.logging.level, "LOGWEAVE_LOG_LEVEL");
        override_string(&mut self.logging.format, "LOGWEAVE_LOG_FORMAT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogweaveError> {
        if self.pipeline.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "pipeline".to_owned(),
                reason: "at least one operator is required".to_owned(),
            }
            .into());
        }

        for (index, spec) in self.pipeline.iter().enumerate() {
            let Some(mapping) = spec.as_mapping() else {
                return Err(ConfigError::InvalidValue {
                    field: format!("pipeline[{index}]"),
                    reason: "operator spec must be a mapping".to_owned(),
                }
                .into());
            };
            match mapping.get("type") {
                Some(serde_yaml::Value::String(_)) => {}
                Some(_) => {
                    return Err(ConfigError::InvalidValue {
                        field: format!("pipeline[{index}].type"),
                        reason: "type must be a string".to_owned(),
                    }
                    .into());
                }
                None => {
                    return Err(ConfigError::InvalidValue {
                        field: format!("pipeline[{index}].type"),
                        reason: "missing required field 'type'".to_owned(),
                    }
                    .into());
                }
            }
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".to_owned(),
                reason: format!("must be one of: {}", LOG_LEVELS.join(", ")),
            }
            .into());
        }

        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "logging.format".to_owned(),
                reason: format!("must be one of: {}", LOG_FORMATS.join(", ")),
            }
            .into());
        }

        Ok(())
    }
}

/// glob을 펼칩니다. 메타문자가 없는 경로는 그대로 존재 여부만 확인합니다.
fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>, LogweaveError> {
    let entries = glob::glob(pattern).map_err(|e| ConfigError::InvalidValue {
        field: "config".to_owned(),
        reason: format!("invalid glob '{pattern}': {e}"),
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) => paths.push(path),
            Err(e) => warn!(pattern, error = %e, "failed to read config glob entry, skipping"),
        }
    }

    if paths.is_empty() {
        let has_meta = pattern.contains(['*', '?', '[']);
        if has_meta {
            return Err(ConfigError::NoMatches {
                pattern: pattern.to_owned(),
            }
            .into());
        }
        return Err(ConfigError::FileNotFound {
            path: pattern.to_owned(),
        }
        .into());
    }
    Ok(paths)
}

async fn read_config_file(path: &Path) -> Result<ConfigFile, LogweaveError> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            LogweaveError::Config(ConfigError::FileNotFound {
                path: path.display().to_string(),
            })
        } else {
            LogweaveError::Io(e)
        }
    })?;
    parse_config_file(&content, ConfigFormat::from_path(path)).map_err(|e| match e {
        LogweaveError::Config(ConfigError::ParseFailed { reason }) => {
            ConfigError::ParseFailed {
                reason: format!("{}: {reason}", path.display()),
            }
            .into()
        }
        other => other,
    })
}

fn parse_config_file(content: &str, format: ConfigFormat) -> Result<ConfigFile, LogweaveError> {
    let parsed = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
    };
    parsed.map_err(|reason| ConfigError::ParseFailed { reason }.into())
}

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_path(target: &mut Option<PathBuf>, env_key: &str) {
    match std::env::var(env_key) {
        Ok(val) if val.is_empty() => {
            warn!(env_key, "empty path in env var, ignoring");
        }
        Ok(val) => *target = Some(PathBuf::from(val)),
        Err(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const BASIC: &str = r#"
pipeline:
  - type: file_input
    include: ["/var/log/*.log"]
  - type: stdout
database_file: /var/lib/logweave/offsets.db
"#;

    #[test]
    fn parses_yaml_pipeline_in_order() {
        let config = AgentConfig::parse(BASIC, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.pipeline.len(), 2);
        assert_eq!(config.pipeline[1]["type"].as_str(), Some("stdout"));
        assert_eq!(
            config.database_file.as_deref(),
            Some(Path::new("/var/lib/logweave/offsets.db"))
        );
        config.validate().unwrap();
    }

    #[test]
    fn parses_json_and_toml() {
        let json = r#"{"pipeline":[{"type":"noop"}],"plugin_dir":"/plugins"}"#;
        let config = AgentConfig::parse(json, ConfigFormat::Json).unwrap();
        assert_eq!(config.plugin_dir.as_deref(), Some(Path::new("/plugins")));

        let toml = "[[pipeline]]\ntype = \"noop\"\n\n[logging]\nlevel = \"debug\"\n";
        let config = AgentConfig::parse(toml, ConfigFormat::Toml).unwrap();
        assert_eq!(config.pipeline.len(), 1);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("config")), ConfigFormat::Yaml);
    }

    #[test]
    fn invalid_yaml_returns_parse_error() {
        let err = AgentConfig::parse("pipeline: [", ConfigFormat::Yaml).unwrap_err();
        assert!(matches!(
            err,
            LogweaveError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_empty_pipeline() {
        let err = AgentConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("pipeline"));
    }

    #[test]
    fn validate_rejects_spec_without_type() {
        let config = AgentConfig::parse("pipeline:\n  - id: x\n", ConfigFormat::Yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pipeline[0].type"));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = AgentConfig::parse(BASIC, ConfigFormat::Yaml).unwrap();
        config.logging.level = "verbose".to_owned();
        assert!(config.validate().unwrap_err().to_string().contains("logging.level"));
    }

    #[tokio::test]
    async fn globs_concatenate_pipelines_and_last_database_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("01-input.yaml"),
            "pipeline:\n  - type: generate_input\ndatabase_file: /first.db\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("02-output.yaml"),
            "pipeline:\n  - type: stdout\ndatabase_file: /second.db\n",
        )
        .unwrap();

        let pattern = dir.path().join("*.yaml").display().to_string();
        let config = AgentConfig::from_globs(&[pattern]).await.unwrap();
        assert_eq!(config.pipeline.len(), 2);
        assert_eq!(config.pipeline[0]["type"].as_str(), Some("generate_input"));
        assert_eq!(config.database_file.as_deref(), Some(Path::new("/second.db")));
    }

    #[tokio::test]
    async fn glob_without_matches_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("*.yaml").display().to_string();
        let err = AgentConfig::from_globs(&[pattern]).await.unwrap_err();
        assert!(matches!(
            err,
            LogweaveError::Config(ConfigError::NoMatches { .. })
        ));
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = AgentConfig::from_file("/nonexistent/path/logweave.yaml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LogweaveError::Config(ConfigError::FileNotFound { .. })
        ));
    }

    #[test]
    #[serial]
    fn env_overrides_paths_and_level() {
        let mut config = AgentConfig::parse(BASIC, ConfigFormat::Yaml).unwrap();
        // SAFETY: serial 테스트로 실행되므로 환경변수 조작이 안전합니다.
        unsafe {
            std::env::set_var("LOGWEAVE_DATABASE_FILE", "/tmp/override.db");
            std::env::set_var("LOGWEAVE_LOG_LEVEL", "debug");
        }
        config.apply_env_overrides();
        unsafe {
            std::env::remove_var("LOGWEAVE_DATABASE_FILE");
            std::env::remove_var("LOGWEAVE_LOG_LEVEL");
        }
        assert_eq!(config.database_file.as_deref(), Some(Path::new("/tmp/override.db")));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    #[serial]
    fn empty_env_path_keeps_original() {
        let mut config = AgentConfig::parse(BASIC, ConfigFormat::Yaml).unwrap();
        // SAFETY: serial 테스트로 실행되므로 환경변수 조작이 안전합니다.
        unsafe { std::env::set_var("LOGWEAVE_PLUGIN_DIR", "") };
        config.apply_env_overrides();
        unsafe { std::env::remove_var("LOGWEAVE_PLUGIN_DIR") };
        assert!(config.plugin_dir.is_none());
    }
}
