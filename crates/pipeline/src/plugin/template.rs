//! 서브 파이프라인 템플릿 렌더러
//!
//! 지원하는 액션:
//! ```text
//! {{ .name }}                         파라미터 값
//! {{ default "x" .name }}             값이 비어 있으면 리터럴
//! {{ if .name }} ... {{ else }} ... {{ end }}
//! {{ if eq .name "x" }} / ne / not
//! {{- ... -}}                         앞뒤 공백 제거
//! ```
//! 템플릿은 로딩 시 한 번 파싱되고 빌드마다 렌더링됩니다.

use std::collections::BTreeMap;

use serde_yaml::Value as YamlValue;

/// 렌더링 파라미터
pub type Params = BTreeMap<String, YamlValue>;

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Param(String),
    Literal(YamlValue),
}

#[derive(Debug, Clone, PartialEq)]
enum Pipeline {
    Operand(Operand),
    Default(Operand, Operand),
    Eq(Operand, Operand),
    Ne(Operand, Operand),
    Not(Operand),
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Output(Pipeline),
    If {
        cond: Pipeline,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

/// 파싱된 템플릿
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    nodes: Vec<Node>,
}

#[derive(Debug)]
enum Segment {
    Text(String),
    Action { body: String, line: usize },
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, String> {
        let segments = split_segments(source)?;
        let mut iter = segments.into_iter();
        let (nodes, end) = parse_nodes(&mut iter)?;
        match end {
            None => Ok(Self { nodes }),
            Some((keyword, line)) => Err(format!("line {line}: unexpected {{{{ {keyword} }}}}")),
        }
    }

    pub fn render(&self, params: &Params) -> Result<String, String> {
        let mut out = String::new();
        render_nodes(&self.nodes, params, &mut out)?;
        Ok(out)
    }
}

// ─── 분할 ───────────────────────────────────────────────────────────

fn split_segments(source: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut rest = source;
    let mut consumed = 0usize;

    while let Some(start) = rest.find("{{") {
        let mut text = rest[..start].to_owned();
        let mut body_start = start + 2;
        if rest[body_start..].starts_with('-') {
            text.truncate(text.trim_end().len());
            body_start += 1;
        }
        let line = source[..consumed + start].matches('\n').count() + 1;
        let Some(close) = rest[body_start..].find("}}") else {
            return Err(format!("line {line}: unclosed action"));
        };
        let mut body = &rest[body_start..body_start + close];
        let mut trim_after = false;
        if let Some(stripped) = body.strip_suffix('-') {
            body = stripped;
            trim_after = true;
        }

        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        segments.push(Segment::Action {
            body: body.trim().to_owned(),
            line,
        });

        let advance = body_start + close + 2;
        consumed += advance;
        rest = &rest[advance..];
        if trim_after {
            let trimmed = rest.trim_start();
            consumed += rest.len() - trimmed.len();
            rest = trimmed;
        }
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_owned()));
    }
    Ok(segments)
}

// ─── 파싱 ───────────────────────────────────────────────────────────

/// `else`/`end`를 만나면 멈추고 그 키워드를 반환합니다.
fn parse_nodes(
    iter: &mut std::vec::IntoIter<Segment>,
) -> Result<(Vec<Node>, Option<(&'static str, usize)>), String> {
    let mut nodes = Vec::new();
    while let Some(segment) = iter.next() {
        let (body, line) = match segment {
            Segment::Text(text) => {
                nodes.push(Node::Text(text));
                continue;
            }
            Segment::Action { body, line } => (body, line),
        };

        if body == "end" {
            return Ok((nodes, Some(("end", line))));
        }
        if body == "else" {
            return Ok((nodes, Some(("else", line))));
        }
        if let Some(cond) = body.strip_prefix("if ") {
            let cond = parse_pipeline(cond.trim()).map_err(|e| format!("line {line}: {e}"))?;
            let (then, end) = parse_nodes(iter)?;
            let otherwise = match end {
                Some(("end", _)) => Vec::new(),
                Some(("else", _)) => match parse_nodes(iter)? {
                    (otherwise, Some(("end", _))) => otherwise,
                    _ => return Err(format!("line {line}: missing {{{{ end }}}} for if")),
                },
                _ => return Err(format!("line {line}: missing {{{{ end }}}} for if")),
            };
            nodes.push(Node::If {
                cond,
                then,
                otherwise,
            });
            continue;
        }
        if body.starts_with("/*") && body.ends_with("*/") {
            continue;
        }
        let pipeline = parse_pipeline(&body).map_err(|e| format!("line {line}: {e}"))?;
        nodes.push(Node::Output(pipeline));
    }
    Ok((nodes, None))
}

fn parse_pipeline(body: &str) -> Result<Pipeline, String> {
    let words = split_words(body)?;
    let operand = |i: usize| -> Result<Operand, String> {
        words
            .get(i)
            .map(|w| parse_operand(w))
            .ok_or_else(|| format!("missing argument in '{body}'"))?
    };
    let arity = |n: usize| -> Result<(), String> {
        if words.len() != n + 1 {
            return Err(format!("'{}' takes {n} argument(s) in '{body}'", words[0]));
        }
        Ok(())
    };

    match words.first().map(String::as_str) {
        None => Err("empty action".to_owned()),
        Some("default") => {
            arity(2)?;
            Ok(Pipeline::Default(operand(1)?, operand(2)?))
        }
        Some("eq") => {
            arity(2)?;
            Ok(Pipeline::Eq(operand(1)?, operand(2)?))
        }
        Some("ne") => {
            arity(2)?;
            Ok(Pipeline::Ne(operand(1)?, operand(2)?))
        }
        Some("not") => {
            arity(1)?;
            Ok(Pipeline::Not(operand(1)?))
        }
        Some(_) if words.len() == 1 => Ok(Pipeline::Operand(operand(0)?)),
        Some(first) => Err(format!("unknown function '{first}'")),
    }
}

fn split_words(body: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut chars = body.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut word = String::new();
        if c == '"' {
            word.push(chars.next().unwrap_or('"'));
            let mut closed = false;
            while let Some(ch) = chars.next() {
                word.push(ch);
                if ch == '\\' {
                    if let Some(escaped) = chars.next() {
                        word.push(escaped);
                    }
                } else if ch == '"' {
                    closed = true;
                    break;
                }
            }
            if !closed {
                return Err(format!("unterminated string in '{body}'"));
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() {
                    break;
                }
                word.push(ch);
                chars.next();
            }
        }
        words.push(word);
    }
    Ok(words)
}

fn parse_operand(word: &str) -> Result<Operand, String> {
    if let Some(name) = word.strip_prefix('.') {
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(format!("invalid parameter reference '{word}'"));
        }
        return Ok(Operand::Param(name.to_owned()));
    }
    if word.starts_with('"') {
        // Go 문자열 리터럴 이스케이프는 JSON과 같습니다.
        let text: String =
            serde_json::from_str(word).map_err(|e| format!("invalid string {word}: {e}"))?;
        return Ok(Operand::Literal(YamlValue::String(text)));
    }
    match word {
        "true" => return Ok(Operand::Literal(YamlValue::Bool(true))),
        "false" => return Ok(Operand::Literal(YamlValue::Bool(false))),
        _ => {}
    }
    if let Ok(i) = word.parse::<i64>() {
        return Ok(Operand::Literal(YamlValue::Number(i.into())));
    }
    Err(format!("unexpected '{word}'"))
}

// ─── 렌더링 ─────────────────────────────────────────────────────────

fn render_nodes(nodes: &[Node], params: &Params, out: &mut String) -> Result<(), String> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Output(pipeline) => out.push_str(&to_text(&eval(pipeline, params))),
            Node::If {
                cond,
                then,
                otherwise,
            } => {
                let branch = if truthy(&eval(cond, params)) {
                    then
                } else {
                    otherwise
                };
                render_nodes(branch, params, out)?;
            }
        }
    }
    Ok(())
}

fn resolve(operand: &Operand, params: &Params) -> YamlValue {
    match operand {
        Operand::Param(name) => params.get(name).cloned().unwrap_or(YamlValue::Null),
        Operand::Literal(v) => v.clone(),
    }
}

fn eval(pipeline: &Pipeline, params: &Params) -> YamlValue {
    match pipeline {
        Pipeline::Operand(op) => resolve(op, params),
        Pipeline::Default(fallback, value) => {
            let value = resolve(value, params);
            if truthy(&value) {
                value
            } else {
                resolve(fallback, params)
            }
        }
        Pipeline::Eq(a, b) => YamlValue::Bool(resolve(a, params) == resolve(b, params)),
        Pipeline::Ne(a, b) => YamlValue::Bool(resolve(a, params) != resolve(b, params)),
        Pipeline::Not(a) => YamlValue::Bool(!truthy(&resolve(a, params))),
    }
}

fn truthy(value: &YamlValue) -> bool {
    match value {
        YamlValue::Null => false,
        YamlValue::Bool(b) => *b,
        YamlValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        YamlValue::String(s) => !s.is_empty(),
        YamlValue::Sequence(items) => !items.is_empty(),
        YamlValue::Mapping(map) => !map.is_empty(),
        YamlValue::Tagged(tagged) => truthy(&tagged.value),
    }
}

fn to_text(value: &YamlValue) -> String {
    match value {
        YamlValue::Null => String::new(),
        YamlValue::Bool(b) => b.to_string(),
        YamlValue::Number(n) => n.to_string(),
        YamlValue::String(s) => s.clone(),
        YamlValue::Sequence(items) => {
            let items: Vec<String> = items.iter().map(to_text).collect();
            format!("[{}]", items.join(","))
        }
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_owned())
            .unwrap_or_default(),
    }
}
