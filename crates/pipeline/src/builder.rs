//! 파이프라인 그래프 빌더
//!
//! 선언된 오퍼레이터 명세 목록을 연결된 [`Pipeline`]으로 만듭니다.
//!
//! 1. 인스턴스화: 레지스트리로 각 명세를 디코딩하고 빌드합니다. 플러그인은 이 자리에서 펼쳐집니다.
//! 2. 기본 출력: 출력을 선언하지 않은 오퍼레이터는 다음 명세를 출력으로 사용합니다.
//! 3. 연결: 출력 ID를 오퍼레이터로 해석해 연결합니다.
//!
//! 각 단계의 에러는 한 번에 모아서 보고합니다.
//! 마지막으로 순환과 입력/출력이 없는 연결 묶음을 거부합니다.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use logweave_core::error::PipelineError;
use logweave_core::operator::SharedOperator;

use crate::pipeline::Pipeline;
use crate::registry::{BuildContext, OperatorBuilder, Registry};

/// 명세 목록으로 파이프라인을 빌드합니다.
pub fn build_pipeline(
    specs: &[serde_yaml::Value],
    registry: &Registry,
) -> Result<Pipeline, PipelineError> {
    let ctx = BuildContext::new(registry);
    let operators = instantiate(specs, &ctx)?;
    connect(&operators)?;
    check_cycles(&operators)?;
    check_components(&operators)?;

    tracing::debug!(operators = operators.len(), "pipeline graph built");
    Pipeline::new(operators)
}

/// 명세 목록을 오퍼레이터로 만듭니다. 플러그인 확장 시 재귀적으로 호출됩니다.
///
/// 마지막 명세는 `ctx.default_outputs`를 기본 출력으로 사용합니다.
pub fn instantiate(
    specs: &[serde_yaml::Value],
    ctx: &BuildContext<'_>,
) -> Result<Vec<SharedOperator>, PipelineError> {
    let mut errors = Vec::new();
    let mut builders: Vec<Box<dyn OperatorBuilder>> = Vec::with_capacity(specs.len());

    for (index, spec) in specs.iter().enumerate() {
        let Some(type_name) = spec.get("type").and_then(serde_yaml::Value::as_str) else {
            errors.push(PipelineError::MissingType { index });
            continue;
        };
        match ctx.registry.decode(type_name, spec.clone()) {
            Ok(builder) => builders.push(builder),
            Err(e) => {
                let id = spec
                    .get("id")
                    .and_then(serde_yaml::Value::as_str)
                    .unwrap_or(type_name);
                errors.push(e.into_pipeline_error(&ctx.prepend_namespace(id)));
            }
        }
    }
    if !errors.is_empty() {
        return Err(aggregate(errors));
    }

    let mut seen = HashSet::new();
    let mut operators = Vec::new();
    for (index, builder) in builders.iter().enumerate() {
        let default_outputs = match builders.get(index + 1) {
            Some(next) => vec![ctx.prepend_namespace(next.id())],
            None => ctx.default_outputs.clone(),
        };
        let op_ctx = ctx.with_default_outputs(default_outputs);

        match builder.build(&op_ctx) {
            Ok(built) => {
                for op in built {
                    if seen.insert(op.id().to_owned()) {
                        operators.push(op);
                    } else {
                        errors.push(PipelineError::DuplicateId {
                            id: op.id().to_owned(),
                        });
                    }
                }
            }
            Err(e) => errors.push(e.into_pipeline_error(&ctx.prepend_namespace(builder.id()))),
        }
    }
    if !errors.is_empty() {
        return Err(aggregate(errors));
    }
    Ok(operators)
}

/// 출력 ID를 해석해 연결합니다.
fn connect(operators: &[SharedOperator]) -> Result<(), PipelineError> {
    let by_id: HashMap<&str, &SharedOperator> =
        operators.iter().map(|op| (op.id(), op)).collect();
    let mut errors = Vec::new();

    for op in operators {
        let output_ids = op.output_ids();
        if op.can_output() && output_ids.is_empty() {
            errors.push(PipelineError::NoDefaultOutput {
                operator: op.id().to_owned(),
            });
            continue;
        }

        let mut resolved = Vec::with_capacity(output_ids.len());
        let mut seen = HashSet::new();
        let mut ok = true;
        for output in &output_ids {
            if !seen.insert(output.as_str()) {
                errors.push(PipelineError::DuplicateConnection {
                    operator: op.id().to_owned(),
                    output: output.clone(),
                });
                ok = false;
                continue;
            }
            if output == op.id() {
                errors.push(PipelineError::Cycle {
                    path: format!("{0} -> {0}", op.id()),
                });
                ok = false;
                continue;
            }
            match by_id.get(output.as_str()) {
                None => {
                    errors.push(PipelineError::MissingOutput {
                        operator: op.id().to_owned(),
                        output: output.clone(),
                    });
                    ok = false;
                }
                Some(target) if !target.can_process() => {
                    errors.push(PipelineError::OutputCannotProcess {
                        operator: op.id().to_owned(),
                        output: output.clone(),
                    });
                    ok = false;
                }
                Some(target) => resolved.push(Arc::clone(target)),
            }
        }

        if ok {
            if let Err(e) = op.set_outputs(resolved) {
                errors.push(e);
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(aggregate(errors))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// 깊이 우선 탐색으로 순환을 찾습니다.
fn check_cycles(operators: &[SharedOperator]) -> Result<(), PipelineError> {
    let index: HashMap<&str, usize> = operators
        .iter()
        .enumerate()
        .map(|(i, op)| (op.id(), i))
        .collect();
    let edges: Vec<Vec<usize>> = operators
        .iter()
        .map(|op| {
            op.output_ids()
                .iter()
                .filter_map(|id| index.get(id.as_str()).copied())
                .collect()
        })
        .collect();

    let mut marks = vec![Mark::Unvisited; operators.len()];
    for start in 0..operators.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        // (노드, 다음에 볼 간선 인덱스)
        let mut stack = vec![(start, 0usize)];
        marks[start] = Mark::InProgress;
        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            if let Some(&child) = edges[node].get(next) {
                top.1 += 1;
                match marks[child] {
                    Mark::Unvisited => {
                        marks[child] = Mark::InProgress;
                        stack.push((child, 0));
                    }
                    Mark::InProgress => {
                        let from = stack.iter().position(|&(n, _)| n == child).unwrap_or(0);
                        let mut path: Vec<&str> =
                            stack[from..].iter().map(|&(n, _)| operators[n].id()).collect();
                        path.push(operators[child].id());
                        return Err(PipelineError::Cycle {
                            path: path.join(" -> "),
                        });
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                stack.pop();
            }
        }
    }
    Ok(())
}

/// 약하게 연결된 묶음마다 입력과 출력이 하나 이상 있어야 합니다.
fn check_components(operators: &[SharedOperator]) -> Result<(), PipelineError> {
    let index: HashMap<&str, usize> = operators
        .iter()
        .enumerate()
        .map(|(i, op)| (op.id(), i))
        .collect();

    // union-find
    let mut parent: Vec<usize> = (0..operators.len()).collect();
    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }
    for (i, op) in operators.iter().enumerate() {
        for output in op.output_ids() {
            if let Some(&j) = index.get(output.as_str()) {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[a] = b;
                }
            }
        }
    }

    let mut groups: Vec<(usize, Vec<usize>)> = Vec::new();
    for i in 0..operators.len() {
        let root = find(&mut parent, i);
        match groups.iter_mut().find(|(r, _)| *r == root) {
            Some((_, members)) => members.push(i),
            None => groups.push((root, vec![i])),
        }
    }

    let mut errors = Vec::new();
    for (_, members) in groups {
        let has_input = members.iter().any(|&i| !operators[i].can_process());
        let has_output = members.iter().any(|&i| !operators[i].can_output());
        let missing = match (has_input, has_output) {
            (true, true) => continue,
            (false, true) => "input",
            (true, false) => "output",
            (false, false) => "input or output",
        };
        let names: Vec<&str> = members.iter().map(|&i| operators[i].id()).collect();
        errors.push(PipelineError::Disconnected {
            operators: names.join(", "),
            missing: missing.to_owned(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(aggregate(errors))
    }
}

/// 에러가 하나면 그대로, 여럿이면 [`PipelineError::Invalid`]로 묶습니다.
fn aggregate(errors: Vec<PipelineError>) -> PipelineError {
    let mut flat = Vec::with_capacity(errors.len());
    for error in errors {
        match error {
            PipelineError::Invalid(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }
    if flat.len() == 1 {
        if let Some(only) = flat.pop() {
            return only;
        }
    }
    PipelineError::Invalid(flat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(yaml: &str) -> Vec<serde_yaml::Value> {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn build(yaml: &str) -> Result<Pipeline, PipelineError> {
        build_pipeline(&specs(yaml), &Registry::with_builtins())
    }

    fn ids(pipeline: &Pipeline) -> Vec<String> {
        let mut ids: Vec<String> = pipeline
            .operators()
            .iter()
            .map(|op| op.id().to_owned())
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn next_operator_is_the_default_output() {
        let pipeline = build(
            "- type: generate_input\n  entry: {record: x}\n- type: noop\n- type: drop_output",
        )
        .unwrap();
        let input = pipeline.get("generate_input").unwrap();
        assert_eq!(input.output_ids(), vec!["noop"]);
        assert_eq!(input.outputs().len(), 1);
        assert_eq!(pipeline.get("noop").unwrap().output_ids(), vec!["drop_output"]);
    }

    #[test]
    fn explicit_outputs_override_default() {
        let pipeline = build(
            "- type: generate_input\n  entry: {record: x}\n  output: b\n- {id: a, type: drop_output}\n- {id: b, type: drop_output}",
        )
        .unwrap();
        assert_eq!(pipeline.get("generate_input").unwrap().output_ids(), vec!["b"]);
    }

    #[test]
    fn duplicate_ids_are_fatal() {
        let err = build(
            "- type: generate_input\n  entry: {record: x}\n- type: noop\n- type: noop\n- type: drop_output",
        )
        .unwrap_err();
        assert!(err.to_string().contains("operator with id 'noop' already exists"), "{err}");
    }

    #[test]
    fn resolution_errors_are_aggregated() {
        let err = build(
            "- type: generate_input\n  entry: {record: x}\n  output: [missing, gen2]\n- {id: gen2, type: generate_input, entry: {record: y}, output: sink}\n- {id: sink, type: drop_output}",
        )
        .unwrap_err();
        let PipelineError::Invalid(errors) = &err else {
            panic!("expected aggregated error, got {err}");
        };
        assert!(errors.iter().any(|e| matches!(e, PipelineError::MissingOutput { .. })));
        assert!(errors.iter().any(|e| matches!(e, PipelineError::OutputCannotProcess { .. })));
    }

    #[test]
    fn last_transform_without_output_is_an_error() {
        let err = build("- type: generate_input\n  entry: {record: x}\n- type: noop").unwrap_err();
        assert!(matches!(err, PipelineError::NoDefaultOutput { .. }), "{err}");
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let err = build(
            "- type: generate_input\n  entry: {record: x}\n- {type: noop, output: noop}\n- type: drop_output",
        )
        .unwrap_err();
        assert!(err.to_string().contains("noop -> noop"), "{err}");
    }

    #[test]
    fn longer_cycles_are_rejected() {
        let err = build(
            "- {type: generate_input, entry: {record: x}, output: a}\n- {id: a, type: noop, output: b}\n- {id: b, type: noop, output: a}\n- type: drop_output",
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Cycle { .. } | PipelineError::Invalid(_)), "{err}");
        assert!(err.to_string().contains("a -> b -> a"), "{err}");
    }

    #[test]
    fn components_need_an_input_and_an_output() {
        let err = build(
            "- {type: generate_input, entry: {record: x}, output: out}\n- {id: out, type: drop_output}\n- {id: orphan, type: noop, output: sink}\n- {id: sink, type: drop_output}",
        )
        .unwrap_err();
        assert!(
            matches!(&err, PipelineError::Disconnected { missing, .. } if missing == "input"),
            "{err}"
        );
    }

    #[test]
    fn unknown_type_and_missing_type_are_reported_together() {
        let err = build("- type: nope\n- id: untyped").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unsupported operator type 'nope'"), "{msg}");
        assert!(msg.contains("spec #1"), "{msg}");
    }

    #[test]
    fn plugin_expands_into_namespace() {
        use crate::plugin::Plugin;

        let mut registry = Registry::with_builtins();
        registry
            .register_plugin(
                Plugin::parse(
                    "passthrough",
                    "pipeline:\n  - id: {{ .input }}\n    type: noop\n  - type: noop\n    id: second\n    output: {{ .output }}\n",
                )
                .unwrap(),
            )
            .unwrap();

        let pipeline = build_pipeline(
            &specs("- type: generate_input\n  entry: {record: x}\n- {id: pt, type: passthrough}\n- {id: sink, type: drop_output}"),
            &registry,
        )
        .unwrap();
        assert_eq!(ids(&pipeline), vec!["generate_input", "pt", "pt.second", "sink"]);
        assert_eq!(pipeline.get("pt").unwrap().output_ids(), vec!["pt.second"]);
        assert_eq!(pipeline.get("pt.second").unwrap().output_ids(), vec!["sink"]);
    }

    #[test]
    fn nested_plugins_respect_max_depth() {
        use crate::plugin::Plugin;

        let mut registry = Registry::with_builtins();
        registry
            .register_plugin(
                Plugin::parse("inner", "pipeline:\n  - {id: {{ .input }}, type: noop, output: {{ .output }}}\n").unwrap(),
            )
            .unwrap();
        registry
            .register_plugin(
                Plugin::parse("outer", "pipeline:\n  - {id: {{ .input }}, type: inner, output: {{ .output }}}\n").unwrap(),
            )
            .unwrap();
        let yaml = "- type: generate_input\n  entry: {record: x}\n- {id: o, type: outer}\n- type: drop_output";

        let err = build_pipeline(&specs(yaml), &registry).unwrap_err();
        assert!(err.to_string().contains("nested at most 1"), "{err}");

        registry.set_max_plugin_depth(2);
        let pipeline = build_pipeline(&specs(yaml), &registry).unwrap();
        assert!(pipeline.get("o").is_some());
    }
}
