//! 서브 파이프라인 플러그인
//!
//! 플러그인 파일은 두 부분으로 이루어집니다.
//! - 메타데이터: 첫 번째 `pipeline:` 줄(0열) 이전의 YAML (`version`, `title`, `description`, `parameters`)
//! - 템플릿: `pipeline:`부터 끝까지. 파라미터로 렌더링한 뒤 YAML로 파싱합니다.
//!
//! 타입 이름은 파일 이름(확장자 제외)입니다.
//!
//! 렌더링 시 예약 파라미터가 추가됩니다.
//! - `id`: 플러그인 인스턴스 ID
//! - `input`: 외부에서 이 플러그인을 가리키는 절대 ID. 진입 오퍼레이터의 `id`로 사용합니다.
//! - `output`: 외부 출력의 절대 ID 목록 (`[a,b]`)
//!
//! 내부 오퍼레이터는 `<네임스페이스>.<id>` 하위 네임스페이스에 놓입니다.
//! `input`과 `output`의 ID는 네임스페이스 적용에서 제외됩니다.

pub mod template;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_yaml::Value as YamlValue;

use logweave_core::operator::SharedOperator;

use crate::error::BuildError;
use crate::helper::writer::OutputIds;
use crate::registry::{BuildContext, OperatorBuilder};

use self::template::{Params, Template};

/// 예약 파라미터 이름
pub const RESERVED_PARAMETERS: [&str; 3] = ["id", "input", "output"];

// ─── 파라미터 정의 ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParameterType {
    /// `string`, `int`, `bool`, `strings`
    Named(String),
    /// 허용 문자열 목록
    Enum(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Parameter {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "type")]
    pub kind: ParameterType,
    #[serde(default)]
    pub default: Option<YamlValue>,
}

impl Parameter {
    fn validate_definition(&self) -> Result<(), String> {
        if self.required && self.default.is_some() {
            return Err("required parameter cannot have a default value".to_owned());
        }
        if let ParameterType::Named(name) = &self.kind {
            if !matches!(name.as_str(), "string" | "int" | "bool" | "strings") {
                return Err(format!(
                    "invalid type '{name}', expected string, int, bool, strings or a list of allowed values"
                ));
            }
        }
        if let Some(default) = &self.default {
            self.validate_value(default)
                .map_err(|e| format!("invalid default value: {e}"))?;
        }
        Ok(())
    }

    fn validate_value(&self, value: &YamlValue) -> Result<(), String> {
        let ok = match &self.kind {
            ParameterType::Named(name) => match name.as_str() {
                "string" => value.is_string(),
                "int" => value.as_i64().is_some(),
                "bool" => value.is_bool(),
                "strings" => value
                    .as_sequence()
                    .is_some_and(|items| items.iter().all(YamlValue::is_string)),
                _ => false,
            },
            ParameterType::Enum(allowed) => value
                .as_str()
                .is_some_and(|s| allowed.iter().any(|a| a == s)),
        };
        if ok {
            return Ok(());
        }
        Err(match &self.kind {
            ParameterType::Named(name) => format!("expected a value of type {name}"),
            ParameterType::Enum(allowed) => format!("expected one of: {}", allowed.join(", ")),
        })
    }
}

// ─── 플러그인 ───────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    #[serde(default)]
    version: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: BTreeMap<String, Parameter>,
}

#[derive(Debug, Deserialize)]
struct Rendered {
    #[serde(default)]
    pipeline: Vec<YamlValue>,
}

/// 로드된 플러그인 템플릿
#[derive(Debug, Clone)]
pub struct Plugin {
    pub type_name: String,
    pub version: String,
    pub title: String,
    pub description: String,
    pub parameters: BTreeMap<String, Parameter>,
    template: Template,
}

impl Plugin {
    /// 파일에서 플러그인을 읽습니다. 타입 이름은 파일 이름입니다.
    pub fn from_file(path: &Path) -> Result<Self, BuildError> {
        let type_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| BuildError::config("plugin_dir", format!("invalid plugin path {}", path.display())))?;
        let content = std::fs::read_to_string(path)?;
        Self::parse(&type_name, &content)
    }

    pub fn parse(type_name: &str, content: &str) -> Result<Self, BuildError> {
        let template_err = |reason: String| BuildError::Template {
            plugin: type_name.to_owned(),
            reason,
        };

        let (metadata, template) = split_plugin(content).ok_or_else(|| {
            template_err("plugin file has no top-level 'pipeline:' section".to_owned())
        })?;

        let metadata: Metadata = if metadata.trim().is_empty() {
            Metadata::default()
        } else {
            serde_yaml::from_str(metadata)
                .map_err(|e| template_err(format!("invalid metadata: {e}")))?
        };

        for (name, parameter) in &metadata.parameters {
            if RESERVED_PARAMETERS.contains(&name.as_str()) {
                return Err(template_err(format!("parameter name '{name}' is reserved")));
            }
            parameter
                .validate_definition()
                .map_err(|e| template_err(format!("parameter '{name}': {e}")))?;
        }

        let template = Template::parse(template).map_err(template_err)?;

        Ok(Self {
            type_name: type_name.to_owned(),
            version: metadata.version,
            title: metadata.title,
            description: metadata.description,
            parameters: metadata.parameters,
            template,
        })
    }

    /// 파라미터를 검증하고 기본값을 채운 뒤 오퍼레이터 명세 목록을 렌더링합니다.
    pub fn render(&self, params: &Params) -> Result<Vec<YamlValue>, BuildError> {
        let template_err = |reason: String| BuildError::Template {
            plugin: self.type_name.clone(),
            reason,
        };

        let mut values = params.clone();
        for (name, parameter) in &self.parameters {
            match values.get(name) {
                Some(value) => parameter
                    .validate_value(value)
                    .map_err(|e| template_err(format!("parameter '{name}': {e}")))?,
                None if parameter.required => {
                    return Err(template_err(format!("missing required parameter '{name}'")));
                }
                None => {
                    if let Some(default) = &parameter.default {
                        values.insert(name.clone(), default.clone());
                    }
                }
            }
        }

        let text = self.template.render(&values).map_err(template_err)?;
        tracing::trace!(plugin = %self.type_name, rendered = %text, "rendered plugin template");
        let rendered: Rendered = serde_yaml::from_str(&text)
            .map_err(|e| template_err(format!("rendered template is not a valid pipeline: {e}")))?;
        Ok(rendered.pipeline)
    }
}

/// 첫 번째 0열 `pipeline:` 줄에서 나눕니다.
fn split_plugin(content: &str) -> Option<(&str, &str)> {
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        if line.starts_with("pipeline:") {
            return Some((&content[..offset], &content[offset..]));
        }
        offset += line.len();
    }
    None
}

// ─── 플러그인 인스턴스 ──────────────────────────────────────────────

/// 파이프라인에 선언된 플러그인 인스턴스
pub struct PluginConfig {
    plugin: Arc<Plugin>,
    id: String,
    output: OutputIds,
    parameters: Params,
}

impl PluginConfig {
    /// 명세 맵에서 `id`, `type`, `output`을 꺼내고 나머지를 파라미터로 사용합니다.
    pub fn from_spec(plugin: Arc<Plugin>, spec: YamlValue) -> Result<Self, BuildError> {
        let YamlValue::Mapping(mapping) = spec else {
            return Err(BuildError::config("pipeline", "operator spec must be a map"));
        };

        let mut id = None;
        let mut output = OutputIds::default();
        let mut parameters = Params::new();
        for (key, value) in mapping {
            let Some(key) = key.as_str().map(str::to_owned) else {
                return Err(BuildError::config("pipeline", "operator spec keys must be strings"));
            };
            match key.as_str() {
                "type" => {}
                "id" => {
                    id = Some(
                        value
                            .as_str()
                            .ok_or_else(|| BuildError::config("id", "must be a string"))?
                            .to_owned(),
                    );
                }
                "output" => output = serde_yaml::from_value(value)?,
                "input" => {
                    return Err(BuildError::config("input", "parameter name is reserved"));
                }
                _ => {
                    parameters.insert(key, value);
                }
            }
        }

        Ok(Self {
            id: id.unwrap_or_else(|| plugin.type_name.clone()),
            plugin,
            output,
            parameters,
        })
    }
}

impl OperatorBuilder for PluginConfig {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_name(&self) -> &str {
        &self.plugin.type_name
    }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        let max_depth = ctx.registry.max_plugin_depth();
        if ctx.plugin_depth >= max_depth {
            return Err(BuildError::Template {
                plugin: self.plugin.type_name.clone(),
                reason: format!("plugins may be nested at most {max_depth} level(s) deep"),
            });
        }

        let input = ctx.prepend_namespace(&self.id);
        let outputs = if self.output.0.is_empty() {
            ctx.default_outputs.clone()
        } else {
            self.output.namespaced(ctx)
        };

        let mut params = self.parameters.clone();
        params.insert("id".to_owned(), YamlValue::String(self.id.clone()));
        params.insert("input".to_owned(), YamlValue::String(input.clone()));
        params.insert(
            "output".to_owned(),
            YamlValue::String(format!("[{}]", outputs.join(","))),
        );
        let specs = self.plugin.render(&params)?;

        let mut inner = ctx
            .with_sub_namespace(&self.id)
            .with_default_outputs(outputs.clone());
        inner.exclusions.push(input);
        inner.exclusions.extend(outputs);
        inner.plugin_depth += 1;

        crate::builder::instantiate(&specs, &inner).map_err(BuildError::from)
    }
}
