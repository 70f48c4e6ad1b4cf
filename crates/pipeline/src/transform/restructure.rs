//! 레코드 구조 변경
//!
//! 연산은 선언 순서대로 엔트리 복사본에 적용되고, 모두 성공해야 반영됩니다.
//!
//! ```yaml
//! - type: restructure
//!   ops:
//!     - add: {field: env, value: prod}
//!     - add: {field: host, value_expr: '$labels.host'}
//!     - remove: tmp
//!     - retain: [message, host]
//!     - move: {from: msg, to: message}
//!     - copy: {from: message, to: $labels.raw}
//!     - flatten: nested
//! ```
//!
//! 각 연산은 같은 인자를 받는 단독 오퍼레이터로도 쓸 수 있습니다([`super::field`]).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::field::Field;
use logweave_core::operator::{Operator, SharedOperator};
use logweave_core::value::{Map, Value};

use crate::error::BuildError;
use crate::expr::Expression;
use crate::helper::{TransformerConfig, TransformerOperator, delegate_basic, delegate_builder, delegate_writer};
use crate::registry::{BuildContext, OperatorBuilder};

/// `add` 연산 인자. `value`와 `value_expr` 중 하나만 지정합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddOp {
    pub field: Field,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_expr: Option<Expression>,
}

/// `move`, `copy` 연산 인자
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveOp {
    pub from: Field,
    pub to: Field,
}

/// 구조 변경 연산
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Add(AddOp),
    Remove(Field),
    Retain(Vec<Field>),
    Move(MoveOp),
    Copy(MoveOp),
    Flatten(Field),
}

impl Op {
    pub(crate) fn validate(&self) -> Result<(), BuildError> {
        match self {
            Op::Add(add) => match (&add.value, &add.value_expr) {
                (Some(_), Some(_)) => Err(BuildError::config(
                    "add",
                    "only one of 'value' or 'value_expr' may be defined",
                )),
                (None, None) => Err(BuildError::config(
                    "add",
                    "either 'value' or 'value_expr' is required",
                )),
                _ => Ok(()),
            },
            Op::Flatten(Field::Record(path)) if path.is_empty() => {
                Err(BuildError::config("flatten", "cannot flatten the record root"))
            }
            Op::Flatten(Field::Label(_)) => {
                Err(BuildError::config("flatten", "labels cannot be flattened"))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn apply(&self, entry: &mut Entry) -> Result<(), OperatorError> {
        match self {
            Op::Add(add) => {
                let value = match (&add.value, &add.value_expr) {
                    (_, Some(expr)) => expr.evaluate(entry)?,
                    (Some(value), None) => value.clone(),
                    (None, None) => Value::Null,
                };
                entry.set(&add.field, value)?;
            }
            Op::Remove(field) => {
                entry.delete(field);
            }
            Op::Retain(fields) => retain(entry, fields)?,
            Op::Move(mv) => {
                let value = entry.delete(&mv.from).ok_or_else(|| {
                    OperatorError::entry(format!("apply move: field '{}' does not exist", mv.from))
                })?;
                entry.set(&mv.to, value)?;
            }
            Op::Copy(cp) => {
                let value = entry.get(&cp.from).ok_or_else(|| {
                    OperatorError::entry(format!("apply copy: field '{}' does not exist", cp.from))
                })?;
                entry.set(&cp.to, value)?;
            }
            Op::Flatten(field) => flatten(entry, field)?,
        }
        Ok(())
    }
}

/// 나열된 필드만 남깁니다.
/// 레코드와 레이블은 각각 해당 종류의 필드가 하나라도 나열됐을 때만 교체됩니다.
fn retain(entry: &mut Entry, fields: &[Field]) -> Result<(), OperatorError> {
    let mut kept = Entry::new();
    let mut retain_record = false;
    let mut retain_labels = false;
    for field in fields {
        match field {
            Field::Label(_) => retain_labels = true,
            Field::Record(_) => retain_record = true,
        }
        if let Some(value) = entry.get(field) {
            kept.set(field, value)?;
        }
    }

    if retain_record {
        entry.record = if kept.record.is_null() {
            Value::map()
        } else {
            kept.record
        };
    }
    if retain_labels {
        entry.labels = kept.labels;
    }
    Ok(())
}

/// 맵 필드의 키를 부모 맵으로 끌어올립니다.
fn flatten(entry: &mut Entry, field: &Field) -> Result<(), OperatorError> {
    match entry.get(field) {
        Some(Value::Map(_)) => {}
        Some(other) => {
            return Err(OperatorError::entry(format!(
                "apply flatten: field '{field}' is a {} not a map",
                other.type_name()
            )));
        }
        None => {
            return Err(OperatorError::entry(format!(
                "apply flatten: field '{field}' does not exist"
            )));
        }
    }

    let Field::Record(path) = field else {
        return Err(OperatorError::entry("apply flatten: labels cannot be flattened"));
    };
    let parent = Field::Record(path[..path.len().saturating_sub(1)].to_vec());
    let Some(Value::Map(children)) = entry.delete(field) else {
        return Ok(());
    };

    let mut merged: Map = match entry.get(&parent) {
        Some(Value::Map(map)) => map,
        _ => Map::new(),
    };
    merged.extend(children);
    entry.set(&parent, Value::Map(merged))?;
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestructureConfig {
    #[serde(flatten)]
    pub transformer: TransformerConfig,
    #[serde(default)]
    pub ops: Vec<Op>,
}

impl OperatorBuilder for RestructureConfig {
    delegate_builder!(transformer.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        for op in &self.ops {
            op.validate()?;
        }
        Ok(vec![Arc::new(RestructureOperator {
            transformer: self.transformer.build(ctx),
            ops: self.ops.clone(),
        })])
    }
}

pub struct RestructureOperator {
    transformer: TransformerOperator,
    ops: Vec<Op>,
}

impl RestructureOperator {
    fn apply(&self, entry: &mut Entry) -> Result<(), OperatorError> {
        let mut next = entry.clone();
        for op in &self.ops {
            op.apply(&mut next)?;
        }
        *entry = next;
        Ok(())
    }
}

impl Operator for RestructureOperator {
    delegate_basic!(transformer.basic);
    delegate_writer!(transformer.writer);

    fn can_process(&self) -> bool {
        true
    }

    fn can_output(&self) -> bool {
        true
    }

    async fn process(&self, cancel: &CancellationToken, entry: Entry) -> Result<(), OperatorError> {
        self.transformer
            .process_with(cancel, entry, |entry| self.apply(entry))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use serde_json::json;

    fn restructure(yaml: &str) -> RestructureOperator {
        let config: RestructureConfig = serde_yaml::from_str(yaml).unwrap();
        for op in &config.ops {
            op.validate().unwrap();
        }
        let registry = Registry::empty();
        RestructureOperator {
            transformer: config.transformer.build(&BuildContext::new(&registry)),
            ops: config.ops,
        }
    }

    fn run(yaml: &str, record: serde_json::Value) -> Result<serde_json::Value, OperatorError> {
        let mut entry = Entry::with_record(Value::from(record));
        restructure(yaml).apply(&mut entry)?;
        Ok(entry.record.to_json())
    }

    #[test]
    fn add_literal_and_expression() {
        let out = run(
            "type: restructure\nops:\n  - add: {field: env, value: prod}\n  - add: {field: twice, value_expr: '$.n + $.n'}",
            json!({"n": 2}),
        )
        .unwrap();
        assert_eq!(out, json!({"n": 2, "env": "prod", "twice": 4}));
    }

    #[test]
    fn remove_ignores_missing_fields() {
        let out = run(
            "type: restructure\nops:\n  - remove: a\n  - remove: nope",
            json!({"a": 1, "b": 2}),
        )
        .unwrap();
        assert_eq!(out, json!({"b": 2}));
    }

    #[test]
    fn retain_keeps_only_listed_fields() {
        let yaml = "type: restructure\nops:\n  - retain: [a, nested.x]";
        let mut entry = Entry::with_record(Value::from(json!({"a": 1, "b": 2, "nested": {"x": 1, "y": 2}})));
        entry.add_label("host", "h1");
        let ts = entry.timestamp;
        restructure(yaml).apply(&mut entry).unwrap();

        assert_eq!(entry.record.to_json(), json!({"a": 1, "nested": {"x": 1}}));
        assert_eq!(entry.timestamp, ts);
        assert_eq!(entry.labels["host"], "h1");
    }

    #[test]
    fn move_requires_source() {
        let yaml = "type: restructure\nops:\n  - move: {from: msg, to: message}";
        assert_eq!(
            run(yaml, json!({"msg": "hi"})).unwrap(),
            json!({"message": "hi"})
        );
        assert!(run(yaml, json!({})).unwrap_err().is_user());
    }

    #[test]
    fn copy_keeps_source() {
        let yaml = "type: restructure\nops:\n  - copy: {from: msg, to: $labels.raw}";
        let mut entry = Entry::with_record(Value::from(json!({"msg": "hi"})));
        restructure(yaml).apply(&mut entry).unwrap();
        assert_eq!(entry.record.to_json(), json!({"msg": "hi"}));
        assert_eq!(entry.labels["raw"], "hi");

        let yaml = "type: restructure\nops:\n  - copy: {from: nope, to: x}";
        assert!(run(yaml, json!({})).unwrap_err().is_user());
    }

    #[test]
    fn retain_labels_only_keeps_record() {
        let yaml = "type: restructure\nops:\n  - retain: [$labels.env]";
        let mut entry = Entry::with_record(Value::from(json!({"a": 1})));
        entry.add_label("env", "prod");
        entry.add_label("tmp", "x");
        restructure(yaml).apply(&mut entry).unwrap();

        assert_eq!(entry.record.to_json(), json!({"a": 1}));
        assert_eq!(entry.labels.len(), 1);
        assert_eq!(entry.labels["env"], "prod");
    }

    #[test]
    fn flatten_promotes_nested_keys() {
        let yaml = "type: restructure\nops:\n  - flatten: outer.inner";
        let out = run(yaml, json!({"outer": {"keep": 1, "inner": {"a": 1, "b": 2}}})).unwrap();
        assert_eq!(out, json!({"outer": {"keep": 1, "a": 1, "b": 2}}));
    }

    #[test]
    fn flatten_rejects_scalars_without_partial_changes() {
        let yaml = "type: restructure\nops:\n  - add: {field: x, value: 1}\n  - flatten: s";
        let original = Entry::with_record(Value::from(json!({"s": "text"})));
        let mut entry = original.clone();
        assert!(restructure(yaml).apply(&mut entry).is_err());
        assert_eq!(entry, original);
    }

    #[test]
    fn add_requires_exactly_one_value() {
        let config: RestructureConfig =
            serde_yaml::from_str("type: restructure\nops:\n  - add: {field: x}").unwrap();
        assert!(config.ops[0].validate().is_err());
    }
}
