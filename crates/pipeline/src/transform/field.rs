//! 단독 필드 연산 오퍼레이터
//!
//! `add`, `copy`, `move`, `remove`, `retain`, `flatten`은 `restructure` 연산 하나를
//! 그대로 적용합니다. 단독 `remove`만 없는 필드를 엔트리 오류로 봅니다.
//!
//! ```yaml
//! - type: move
//!   from: msg
//!   to: message
//! - type: retain
//!   fields: [message, $labels.host]
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use logweave_core::entry::Entry;
use logweave_core::error::OperatorError;
use logweave_core::field::Field;
use logweave_core::operator::{Operator, SharedOperator};
use logweave_core::value::Value;

use super::restructure::{AddOp, MoveOp, Op};
use crate::error::BuildError;
use crate::expr::Expression;
use crate::helper::{TransformerConfig, TransformerOperator, delegate_basic, delegate_builder, delegate_writer};
use crate::registry::{BuildContext, OperatorBuilder};

// ─── 설정 ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddConfig {
    #[serde(flatten)]
    pub transformer: TransformerConfig,
    pub field: Field,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_expr: Option<Expression>,
}

/// `copy`, `move` 공통 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FromToConfig {
    #[serde(flatten)]
    pub transformer: TransformerConfig,
    pub from: Field,
    pub to: Field,
}

/// `remove`, `flatten` 공통 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleFieldConfig {
    #[serde(flatten)]
    pub transformer: TransformerConfig,
    pub field: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetainConfig {
    #[serde(flatten)]
    pub transformer: TransformerConfig,
    #[serde(default)]
    pub fields: Vec<Field>,
}

fn build_op(
    transformer: &TransformerConfig,
    ctx: &BuildContext<'_>,
    op: Op,
) -> Result<Vec<SharedOperator>, BuildError> {
    op.validate()?;
    Ok(vec![Arc::new(FieldOperator {
        transformer: transformer.build(ctx),
        op,
    })])
}

impl OperatorBuilder for AddConfig {
    delegate_builder!(transformer.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        let op = Op::Add(AddOp {
            field: self.field.clone(),
            value: self.value.clone(),
            value_expr: self.value_expr.clone(),
        });
        build_op(&self.transformer, ctx, op)
    }
}

impl OperatorBuilder for FromToConfig {
    delegate_builder!(transformer.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        let args = MoveOp {
            from: self.from.clone(),
            to: self.to.clone(),
        };
        let op = match self.type_name() {
            "copy" => Op::Copy(args),
            _ => Op::Move(args),
        };
        build_op(&self.transformer, ctx, op)
    }
}

impl OperatorBuilder for SingleFieldConfig {
    delegate_builder!(transformer.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        let op = match self.type_name() {
            "flatten" => Op::Flatten(self.field.clone()),
            _ => Op::Remove(self.field.clone()),
        };
        build_op(&self.transformer, ctx, op)
    }
}

impl OperatorBuilder for RetainConfig {
    delegate_builder!(transformer.writer.basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        if self.fields.is_empty() {
            return Err(BuildError::config("fields", "at least one field is required"));
        }
        build_op(&self.transformer, ctx, Op::Retain(self.fields.clone()))
    }
}

// ─── 오퍼레이터 ─────────────────────────────────────────────────────

pub struct FieldOperator {
    transformer: TransformerOperator,
    op: Op,
}

impl FieldOperator {
    fn apply(&self, entry: &mut Entry) -> Result<(), OperatorError> {
        if let Op::Remove(field) = &self.op {
            if entry.get(field).is_none() {
                return Err(OperatorError::entry(format!(
                    "remove: field '{field}' does not exist"
                )));
            }
        }
        let mut next = entry.clone();
        self.op.apply(&mut next)?;
        *entry = next;
        Ok(())
    }
}

impl Operator for FieldOperator {
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
