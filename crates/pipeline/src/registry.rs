//! 오퍼레이터 레지스트리
//!
//! 타입 이름을 빌더 팩토리에 매핑합니다.
//! 내장 타입은 정적 테이블([`BUILTINS`])로, 서브 파이프라인 템플릿은
//! 설정 로딩 시 플러그인 디렉토리에서 등록됩니다.
//!
//! 레지스트리는 파이프라인 빌드 전에 한 번 채워지고, 이후에는 읽기 전용으로 공유됩니다.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use logweave_core::error::PipelineError;
use logweave_core::operator::SharedOperator;

use crate::error::BuildError;
use crate::plugin::{Plugin, PluginConfig};

/// 기본 서브 파이프라인 중첩 한도
pub const DEFAULT_MAX_PLUGIN_DEPTH: usize = 1;

/// 역직렬화된 타입별 설정
///
/// `build`는 오퍼레이터를 하나, 서브 파이프라인이면 여러 개 반환합니다.
pub trait OperatorBuilder: Send + Sync {
    /// 네임스페이스 적용 전 ID. 지정하지 않으면 타입 이름입니다.
    fn id(&self) -> &str;

    /// 타입 이름
    fn type_name(&self) -> &str;

    /// 오퍼레이터를 생성합니다.
    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError>;
}

/// 설정 맵을 타입별 빌더로 변환하는 함수
pub type DecodeFn = fn(serde_yaml::Value) -> Result<Box<dyn OperatorBuilder>, BuildError>;

/// serde로 역직렬화 가능한 설정 타입을 빌더로 만듭니다.
pub fn decode<C>(value: serde_yaml::Value) -> Result<Box<dyn OperatorBuilder>, BuildError>
where
    C: OperatorBuilder + DeserializeOwned + 'static,
{
    let config: C = serde_yaml::from_value(value)?;
    Ok(Box::new(config))
}

/// 내장 오퍼레이터 테이블
pub static BUILTINS: &[(&str, DecodeFn)] = &[
    // 입력
    ("file_input", decode::<crate::input::file::FileInputConfig>),
    ("tcp_input", decode::<crate::input::tcp::TcpInputConfig>),
    ("udp_input", decode::<crate::input::udp::UdpInputConfig>),
    ("http_input", decode::<crate::input::http::HttpInputConfig>),
    ("journald_input", decode::<crate::input::journald::JournaldInputConfig>),
    (
        "windows_eventlog_input",
        decode::<crate::input::windows::EventLogInputConfig>,
    ),
    ("generate_input", decode::<crate::input::generate::GenerateInputConfig>),
    // 파서
    ("json_parser", decode::<crate::parser::json::JsonParserConfig>),
    ("regex_parser", decode::<crate::parser::regex::RegexParserConfig>),
    ("syslog_parser", decode::<crate::parser::syslog::SyslogParserConfig>),
    (
        "key_value_parser",
        decode::<crate::parser::key_value::KeyValueParserConfig>,
    ),
    ("csv_parser", decode::<crate::parser::csv::CsvParserConfig>),
    ("uri_parser", decode::<crate::parser::uri::UriParserConfig>),
    ("time_parser", decode::<crate::parser::time::TimeParserOperatorConfig>),
    (
        "severity_parser",
        decode::<crate::parser::severity::SeverityParserOperatorConfig>,
    ),
    // 변환
    ("restructure", decode::<crate::transform::restructure::RestructureConfig>),
    ("router", decode::<crate::transform::router::RouterConfig>),
    ("metadata", decode::<crate::transform::metadata::MetadataConfig>),
    ("rate_limit", decode::<crate::transform::rate_limit::RateLimitConfig>),
    ("noop", decode::<crate::transform::noop::NoopConfig>),
    ("filter", decode::<crate::transform::filter::FilterConfig>),
    ("add", decode::<crate::transform::field::AddConfig>),
    ("copy", decode::<crate::transform::field::FromToConfig>),
    ("move", decode::<crate::transform::field::FromToConfig>),
    ("remove", decode::<crate::transform::field::SingleFieldConfig>),
    ("flatten", decode::<crate::transform::field::SingleFieldConfig>),
    ("retain", decode::<crate::transform::field::RetainConfig>),
    (
        "regex_replace",
        decode::<crate::transform::regex_replace::RegexReplaceConfig>,
    ),
    (
        "host_metadata",
        decode::<crate::transform::host_metadata::HostMetadataConfig>,
    ),
    // 출력
    ("file_output", decode::<crate::output::file::FileOutputConfig>),
    ("stdout", decode::<crate::output::stdout::StdoutConfig>),
    ("log_output", decode::<crate::output::log::LogOutputConfig>),
    ("drop_output", decode::<crate::output::drop::DropOutputConfig>),
];

/// 타입 → 빌더 매핑
pub struct Registry {
    builders: HashMap<String, DecodeFn>,
    plugins: HashMap<String, Arc<Plugin>>,
    max_plugin_depth: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl Registry {
    /// 빈 레지스트리를 생성합니다.
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
            plugins: HashMap::new(),
            max_plugin_depth: DEFAULT_MAX_PLUGIN_DEPTH,
        }
    }

    /// 내장 타입이 등록된 레지스트리를 생성합니다.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        for (type_name, decode) in BUILTINS {
            registry.builders.insert((*type_name).to_owned(), *decode);
        }
        registry
    }

    /// 서브 파이프라인 중첩 한도를 바꿉니다.
    pub fn set_max_plugin_depth(&mut self, depth: usize) {
        self.max_plugin_depth = depth;
    }

    pub fn max_plugin_depth(&self) -> usize {
        self.max_plugin_depth
    }

    fn ensure_unregistered(&self, type_name: &str) -> Result<(), PipelineError> {
        if self.builders.contains_key(type_name) || self.plugins.contains_key(type_name) {
            return Err(PipelineError::DuplicateType {
                type_name: type_name.to_owned(),
            });
        }
        Ok(())
    }

    /// 타입을 등록합니다. 이미 등록된 타입이면 에러입니다.
    pub fn register(&mut self, type_name: &str, decode: DecodeFn) -> Result<(), PipelineError> {
        self.ensure_unregistered(type_name)?;
        self.builders.insert(type_name.to_owned(), decode);
        Ok(())
    }

    /// 서브 파이프라인 템플릿을 등록합니다.
    pub fn register_plugin(&mut self, plugin: Plugin) -> Result<(), PipelineError> {
        self.ensure_unregistered(&plugin.type_name)?;
        self.plugins
            .insert(plugin.type_name.clone(), Arc::new(plugin));
        Ok(())
    }

    /// 디렉토리의 `*.yaml` 템플릿을 모두 등록합니다. 등록 수를 반환합니다.
    pub fn load_plugins(&mut self, dir: &Path) -> Result<usize, PipelineError> {
        let pattern = dir.join("*.yaml");
        let pattern = pattern.to_string_lossy();
        let paths = glob::glob(&pattern).map_err(|e| PipelineError::InitFailed(format!(
            "invalid plugin glob '{pattern}': {e}"
        )))?;

        let mut count = 0;
        for path in paths {
            let path = match path {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read plugin directory entry, skipping");
                    continue;
                }
            };
            let plugin = Plugin::from_file(&path).map_err(|e| PipelineError::Build {
                operator: path.display().to_string(),
                reason: e.to_string(),
            })?;
            tracing::debug!(plugin = %plugin.type_name, path = %path.display(), "registered plugin");
            self.register_plugin(plugin)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.builders.contains_key(type_name) || self.plugins.contains_key(type_name)
    }

    /// 등록된 타입 이름 목록 (정렬됨)
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .builders
            .keys()
            .chain(self.plugins.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// 명세를 타입별 빌더로 변환합니다.
    pub fn decode(
        &self,
        type_name: &str,
        spec: serde_yaml::Value,
    ) -> Result<Box<dyn OperatorBuilder>, BuildError> {
        if let Some(decode) = self.builders.get(type_name) {
            return decode(spec);
        }
        if let Some(plugin) = self.plugins.get(type_name) {
            return Ok(Box::new(PluginConfig::from_spec(Arc::clone(plugin), spec)?));
        }
        Err(PipelineError::UnsupportedType {
            type_name: type_name.to_owned(),
        }
        .into())
    }
}

/// 빌드 중 전달되는 컨텍스트
///
/// 네임스페이스, 기본 출력, 네임스페이스 제외 목록을 담습니다.
#[derive(Clone)]
pub struct BuildContext<'r> {
    pub registry: &'r Registry,
    /// 현재 네임스페이스. 루트는 빈 문자열입니다.
    pub namespace: String,
    /// 출력을 선언하지 않은 오퍼레이터가 사용할 출력 (이미 절대 ID)
    pub default_outputs: Vec<String>,
    /// 네임스페이스를 붙이지 않는 ID
    pub exclusions: Vec<String>,
    /// 현재 서브 파이프라인 중첩 깊이
    pub plugin_depth: usize,
}

impl<'r> BuildContext<'r> {
    /// 루트 컨텍스트를 생성합니다.
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            namespace: String::new(),
            default_outputs: Vec::new(),
            exclusions: Vec::new(),
            plugin_depth: 0,
        }
    }

    /// ID에 네임스페이스를 붙입니다. 제외 목록에 있으면 그대로 둡니다.
    pub fn prepend_namespace(&self, id: &str) -> String {
        if self.exclusions.iter().any(|e| e == id) || self.namespace.is_empty() {
            return id.to_owned();
        }
        format!("{}.{id}", self.namespace)
    }

    /// `id`를 하위 네임스페이스로 하는 컨텍스트를 반환합니다.
    pub fn with_sub_namespace(&self, id: &str) -> Self {
        Self {
            namespace: self.prepend_namespace(id),
            ..self.clone()
        }
    }

    /// 기본 출력을 바꾼 컨텍스트를 반환합니다.
    pub fn with_default_outputs(&self, outputs: Vec<String>) -> Self {
        Self {
            default_outputs: outputs,
            ..self.clone()
        }
    }
}
