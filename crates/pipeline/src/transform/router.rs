//! 조건부 라우팅
//!
//! 경로는 선언 순서대로 평가되고 처음 참이 되는 경로 하나만 사용됩니다.
//! 어느 경로와도 일치하지 않으면 `default`로 보내고, `default`가 없으면 버립니다.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use logweave_core::entry::Entry;
use logweave_core::error::{OperatorError, PipelineError};
use logweave_core::metrics::{ENTRIES_DROPPED_TOTAL, LABEL_OPERATOR, LABEL_REASON};
use logweave_core::operator::{Operator, SharedOperator};

use crate::error::BuildError;
use crate::expr::{ExprString, Expression};
use crate::helper::{BasicConfig, BasicOperator, OutputIds, Writer, delegate_basic, delegate_builder};
use crate::registry::{BuildContext, OperatorBuilder};

/// 경로 하나
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub expr: Expression,
    pub output: OutputIds,
    /// 이 경로를 탄 엔트리에 붙일 레이블
    #[serde(default)]
    pub labels: BTreeMap<String, ExprString>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(flatten)]
    pub basic: BasicConfig,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    /// 일치하는 경로가 없을 때의 출력
    #[serde(default)]
    pub default: OutputIds,
}

impl OperatorBuilder for RouterConfig {
    delegate_builder!(basic);

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<SharedOperator>, BuildError> {
        let mut routes = Vec::with_capacity(self.routes.len() + 1);
        for (index, route) in self.routes.iter().enumerate() {
            if route.output.0.is_empty() {
                return Err(BuildError::config(
                    format!("routes[{index}].output"),
                    "route must declare at least one output",
                ));
            }
            routes.push(Route {
                expr: route.expr.clone(),
                labels: route.labels.clone(),
                writer: Writer::new(route.output.namespaced(ctx)),
            });
        }
        if !self.default.0.is_empty() {
            routes.push(Route {
                expr: Expression::compile("true")?,
                labels: BTreeMap::new(),
                writer: Writer::new(self.default.namespaced(ctx)),
            });
        }

        let mut output_ids: Vec<String> = Vec::new();
        for route in &routes {
            for id in route.writer.output_ids() {
                if !output_ids.contains(id) {
                    output_ids.push(id.clone());
                }
            }
        }

        Ok(vec![Arc::new(RouterOperator {
            basic: self.basic.build(ctx),
            routes,
            output_ids,
            outputs: OnceLock::new(),
        })])
    }
}

struct Route {
    expr: Expression,
    labels: BTreeMap<String, ExprString>,
    writer: Writer,
}

pub struct RouterOperator {
    basic: BasicOperator,
    routes: Vec<Route>,
    /// 모든 경로 출력의 합집합 (선언 순서)
    output_ids: Vec<String>,
    outputs: OnceLock<Vec<SharedOperator>>,
}

impl RouterOperator {
    /// 처음 일치하는 경로. 평가에 실패한 경로는 건너뜁니다.
    fn select(&self, entry: &Entry) -> Option<&Route> {
        self.routes.iter().find(|route| match route.expr.evaluate_bool(entry) {
            Ok(matched) => matched,
            Err(e) => {
                tracing::warn!(expr = %route.expr, error = %e, "failed to evaluate route, skipping");
                false
            }
        })
    }
}

impl Operator for RouterOperator {
    delegate_basic!(basic);

    fn can_process(&self) -> bool {
        true
    }

    fn can_output(&self) -> bool {
        true
    }

    fn output_ids(&self) -> Vec<String> {
        self.output_ids.clone()
    }

    fn outputs(&self) -> Vec<SharedOperator> {
        self.outputs.get().cloned().unwrap_or_default()
    }

    fn set_outputs(&self, outputs: Vec<SharedOperator>) -> Result<(), PipelineError> {
        let by_id: HashMap<String, SharedOperator> = outputs
            .iter()
            .map(|op| (op.id().to_owned(), Arc::clone(op)))
            .collect();

        for route in &self.routes {
            let mut resolved = Vec::with_capacity(route.writer.output_ids().len());
            for id in route.writer.output_ids() {
                let op = by_id.get(id).ok_or_else(|| PipelineError::MissingOutput {
                    operator: self.basic.id().to_owned(),
                    output: id.clone(),
                })?;
                resolved.push(Arc::clone(op));
            }
            route.writer.set_outputs(self.basic.id(), resolved)?;
        }

        self.outputs.set(outputs).map_err(|_| {
            PipelineError::InitFailed(format!("outputs of '{}' already set", self.basic.id()))
        })
    }

    async fn process(&self, cancel: &CancellationToken, mut entry: Entry) -> Result<(), OperatorError> {
        let Some(route) = self.select(&entry) else {
            metrics::counter!(
                ENTRIES_DROPPED_TOTAL,
                LABEL_OPERATOR => self.basic.id().to_owned(),
                LABEL_REASON => "router"
            )
            .increment(1);
            return Ok(());
        };

        for (key, template) in &route.labels {
            match template.render(&entry) {
                Ok(value) => entry.add_label(key.clone(), value),
                Err(e) => {
                    tracing::warn!(label = %key, error = %e, "failed to render route label");
                }
            }
        }
        route.writer.write(cancel, entry).await
    }
}
