//! Assertion evaluation and value extraction
//!
//! Assertions are evaluated against the canonical envelope (see
//! [`ResponseEnvelope::canonical`]), so both `$.id` (flattened) and
//! `$.body.id` (nested) reach the same field.

use std::path::Path;
use std::str::FromStr;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::path::PathExpr;
use crate::spec::type_name;
use crate::template::resolve_path;
use crate::types::{AssertionResult, AssertionSummary, ResponseEnvelope, Summary};
use crate::variables::{self, VariableContext};

/// Nesting limit for assertion fragment includes
const MAX_INCLUDE_DEPTH: usize = 16;

// ============================================================================
// Operators
// ============================================================================

/// Comparison operator of an assertion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    Exists,
    NotExists,
    NotEmpty,
    Contains,
    NotContains,
    Matches,
    Gt,
    Gte,
    Lt,
    Lte,
    Type,
    Length,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::Exists => "exists",
            Operator::NotExists => "not_exists",
            Operator::NotEmpty => "not_empty",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::Matches => "matches",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Type => "type",
            Operator::Length => "length",
        }
    }

    /// Operators that take no expected operand
    pub fn is_unary(&self) -> bool {
        matches!(self, Operator::Exists | Operator::NotExists | Operator::NotEmpty)
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let op = match s.trim() {
            "equals" | "eq" | "==" => Operator::Equals,
            "not_equals" | "neq" | "!=" => Operator::NotEquals,
            "exists" => Operator::Exists,
            "not_exists" => Operator::NotExists,
            "not_empty" => Operator::NotEmpty,
            "contains" => Operator::Contains,
            "not_contains" => Operator::NotContains,
            "matches" => Operator::Matches,
            "gt" | ">" => Operator::Gt,
            "gte" | ">=" => Operator::Gte,
            "lt" | "<" => Operator::Lt,
            "lte" | "<=" => Operator::Lte,
            "type" => Operator::Type,
            "length" => Operator::Length,
            other => return Err(Error::UnknownOperator(other.to_string())),
        };
        Ok(op)
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compare `actual` to `expected` with a named operator. `None` stands for
/// an absent value, distinct from JSON `null`.
pub fn compare(actual: Option<&Value>, operator: &str, expected: Option<&Value>) -> Result<bool> {
    evaluate(operator.parse()?, actual, expected)
}

pub fn evaluate(op: Operator, actual: Option<&Value>, expected: Option<&Value>) -> Result<bool> {
    let present = actual.is_some_and(|v| !v.is_null());
    let outcome = match op {
        Operator::Equals => match (actual, expected) {
            (Some(a), Some(e)) => strict_eq(a, e) || deep_eq(a, e),
            (None, None) => true,
            _ => false,
        },
        Operator::NotEquals => match (actual, expected) {
            (Some(a), Some(e)) => !strict_eq(a, e),
            (None, None) => false,
            _ => true,
        },
        Operator::Exists => present,
        Operator::NotExists => !present,
        Operator::NotEmpty => match actual {
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            _ => present,
        },
        Operator::Contains => contains(actual, expected),
        Operator::NotContains => !contains(actual, expected),
        Operator::Matches => match (actual, expected) {
            (Some(Value::String(text)), Some(pattern)) => {
                let pattern = variables::stringify(pattern);
                let re = Regex::new(&pattern).map_err(|e| Error::expression(pattern.clone(), e))?;
                re.is_match(text)
            }
            _ => false,
        },
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            match (actual.and_then(coerce_number), expected.and_then(coerce_number)) {
                (Some(a), Some(e)) => match op {
                    Operator::Gt => a > e,
                    Operator::Gte => a >= e,
                    Operator::Lt => a < e,
                    _ => a <= e,
                },
                _ => false,
            }
        }
        Operator::Type => {
            let actual_type = actual.map(type_name).unwrap_or("undefined");
            expected.and_then(Value::as_str) == Some(actual_type)
        }
        Operator::Length => {
            let len = match actual {
                Some(Value::String(s)) => Some(s.chars().count()),
                Some(Value::Array(items)) => Some(items.len()),
                _ => None,
            };
            match (len, expected.and_then(coerce_number)) {
                (Some(len), Some(e)) => len as f64 == e,
                _ => false,
            }
        }
    };
    Ok(outcome)
}

/// Identity-style equality: scalars by value, structured values never equal
fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(_), _) | (Value::Object(_), _) => false,
        _ => a == b,
    }
}

/// Structural equality with numbers compared by value
fn deep_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| deep_eq(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| deep_eq(v, w)))
        }
        _ => a == b,
    }
}

fn contains(actual: Option<&Value>, expected: Option<&Value>) -> bool {
    let Some(expected) = expected else {
        return false;
    };
    match actual {
        Some(Value::String(s)) => s.contains(&variables::stringify(expected)),
        Some(Value::Array(items)) => items.iter().any(|item| deep_eq(item, expected)),
        _ => false,
    }
}

/// Numeric coercion: numbers, numeric strings and booleans
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// String coercion: strings as-is, other values as JSON text
pub fn coerce_string(value: &Value) -> String {
    variables::stringify(value)
}

// ============================================================================
// Assertion declarations
// ============================================================================

/// What an assertion inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionKind {
    Status,
    Header,
    JsonPath,
    Body,
    Duration,
    Regex,
    GrpcCode,
}

impl AssertionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssertionKind::Status => "status",
            AssertionKind::Header => "header",
            AssertionKind::JsonPath => "json_path",
            AssertionKind::Body => "body",
            AssertionKind::Duration => "duration",
            AssertionKind::Regex => "regex",
            AssertionKind::GrpcCode => "grpc_code",
        }
    }

    fn default_operator(&self, has_expected: bool) -> Operator {
        match self {
            AssertionKind::Duration => Operator::Lte,
            _ if has_expected => Operator::Equals,
            _ => Operator::Exists,
        }
    }
}

impl FromStr for AssertionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let kind = match s.trim() {
            "status" | "status_code" => AssertionKind::Status,
            "header" | "headers" => AssertionKind::Header,
            "json_path" | "jsonpath" | "json" | "path" => AssertionKind::JsonPath,
            "body" => AssertionKind::Body,
            "duration" | "response_time" => AssertionKind::Duration,
            "regex" => AssertionKind::Regex,
            "grpc_code" => AssertionKind::GrpcCode,
            other => {
                return Err(Error::InvalidAssertion(format!("unknown assertion type '{}'", other)))
            }
        };
        Ok(kind)
    }
}

/// A parsed inline assertion
#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    pub kind: AssertionKind,
    pub operator: Operator,
    /// Path, header name or pattern, depending on `kind`
    pub target: Option<String>,
    pub expected: Option<Value>,
    pub message: Option<String>,
}

impl Assertion {
    /// Parse an inline declaration; `include` entries must be expanded first
    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(Error::InvalidAssertion(format!(
                "expected a mapping, found {}",
                type_name(value)
            )));
        };
        if map.contains_key("include") {
            return Err(Error::InvalidAssertion("unexpanded include".to_string()));
        }

        let target = ["expression", "path", "name", "pattern"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(str::to_string);
        let kind = match map.get("type").and_then(Value::as_str) {
            Some(kind) => kind.parse()?,
            None if target.is_some() => AssertionKind::JsonPath,
            None => {
                return Err(Error::InvalidAssertion(
                    "assertion needs a type, a path/expression, or an include".to_string(),
                ))
            }
        };
        let expected = map.get("expected").or_else(|| map.get("value")).cloned();
        let operator = match map.get("operator").and_then(Value::as_str) {
            Some(op) => op.parse()?,
            None => kind.default_operator(expected.is_some()),
        };
        if matches!(kind, AssertionKind::Header | AssertionKind::Regex) && target.is_none() {
            return Err(Error::InvalidAssertion(format!(
                "{} assertion needs a name/expression",
                kind.as_str()
            )));
        }

        Ok(Self {
            kind,
            operator,
            target,
            expected,
            message: map.get("message").and_then(Value::as_str).map(str::to_string),
        })
    }

    /// Select the operand this assertion inspects
    fn actual(&self, envelope: &ResponseEnvelope, canonical: &Value) -> Result<Option<Value>> {
        let actual = match self.kind {
            AssertionKind::Status | AssertionKind::GrpcCode => Some(Value::from(envelope.status)),
            AssertionKind::Duration => Some(Value::from(envelope.duration_ms)),
            AssertionKind::Header => {
                let name = self.target.as_deref().unwrap_or_default();
                envelope.header(name).map(|v| Value::String(v.to_string()))
            }
            AssertionKind::Body => match self.target.as_deref() {
                Some(path) => PathExpr::parse(path)?.select(&envelope.body),
                None => Some(envelope.body.clone()),
            },
            AssertionKind::JsonPath => {
                let path = self.target.as_deref().unwrap_or("$");
                PathExpr::parse(path)?.select(canonical)
            }
            AssertionKind::Regex => {
                let pattern = self.target.as_deref().unwrap_or_default();
                regex_capture(&body_text(&envelope.body), pattern)?
            }
        };
        Ok(actual)
    }

    pub fn evaluate(&self, envelope: &ResponseEnvelope, canonical: &Value) -> Result<AssertionResult> {
        let actual = self.actual(envelope, canonical)?;
        let passed = evaluate(self.operator, actual.as_ref(), self.expected.as_ref())?;
        let message = match (&self.message, passed) {
            (Some(custom), _) => custom.clone(),
            (None, true) => format!("{} {} passed", self.describe(), self.operator),
            (None, false) => format!(
                "{}: expected {} {}{}",
                self.describe(),
                actual.as_ref().map(render).unwrap_or_else(|| "undefined".to_string()),
                self.operator,
                if self.operator.is_unary() {
                    String::new()
                } else {
                    format!(" {}", self.expected.as_ref().map(render).unwrap_or_else(|| "undefined".to_string()))
                }
            ),
        };

        Ok(AssertionResult {
            passed,
            assertion_type: self.kind.as_str().to_string(),
            operator: self.operator.as_str().to_string(),
            expected: self.expected.clone().unwrap_or(Value::Null),
            actual: actual.unwrap_or(Value::Null),
            message,
        })
    }

    fn describe(&self) -> String {
        match &self.target {
            Some(target) => format!("{} {}", self.kind.as_str(), target),
            None => self.kind.as_str().to_string(),
        }
    }
}

fn render(value: &Value) -> String {
    value.to_string()
}

// ============================================================================
// Evaluation
// ============================================================================

/// Evaluate assertion declarations against a response. Includes resolve
/// relative to `base_dir`. An unknown operator or malformed expression fails
/// the whole evaluation.
pub fn run_assertions(
    envelope: &ResponseEnvelope,
    assertions: &[Value],
    base_dir: Option<&Path>,
) -> Result<Vec<AssertionResult>> {
    let base_dir = base_dir.unwrap_or_else(|| Path::new("."));
    let expanded = expand_includes(assertions, base_dir)?;
    let canonical = envelope.canonical();

    let mut results = Vec::with_capacity(expanded.len());
    for declaration in &expanded {
        let assertion = Assertion::from_value(declaration)?;
        let result = assertion.evaluate(envelope, &canonical)?;
        debug!("{}", result.message);
        results.push(result);
    }
    Ok(results)
}

/// Tally assertion results
pub fn get_assertion_summary(results: &[AssertionResult]) -> AssertionSummary {
    Summary::tally(results.iter().map(|r| r.passed))
}

/// Replace every `include` entry with the assertions of its fragment
pub fn expand_includes(assertions: &[Value], base_dir: &Path) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(assertions.len());
    expand_into(assertions, base_dir, 0, &mut out)?;
    Ok(out)
}

fn expand_into(assertions: &[Value], base_dir: &Path, depth: usize, out: &mut Vec<Value>) -> Result<()> {
    for declaration in assertions {
        let Some(include) = declaration.get("include").and_then(Value::as_str) else {
            out.push(declaration.clone());
            continue;
        };
        if depth >= MAX_INCLUDE_DEPTH {
            return Err(Error::InvalidAssertion(format!(
                "include nesting deeper than {} at {}",
                MAX_INCLUDE_DEPTH, include
            )));
        }

        let path = resolve_path(base_dir, include);
        let content = std::fs::read_to_string(&path).map_err(|e| Error::load(&path, e))?;
        let fragment: Value = serde_yaml::from_str(&content).map_err(|e| Error::load(&path, e))?;

        let mut ctx = VariableContext::new().with_params(include_params(declaration));
        let items = match fragment {
            Value::Array(items) => items,
            Value::Object(mut map) => {
                if let Some(Value::Object(defaults)) = map.remove("variables") {
                    ctx.extend_environment(&defaults);
                }
                match map.remove("assertions") {
                    Some(Value::Array(items)) => items,
                    Some(other) => {
                        return Err(Error::load(
                            &path,
                            format!("'assertions' must be a list, found {}", type_name(&other)),
                        ))
                    }
                    None => vec![Value::Object(map)],
                }
            }
            other => {
                return Err(Error::load(
                    &path,
                    format!("assertion fragment must be a list or mapping, found {}", type_name(&other)),
                ))
            }
        };

        let substituted: Vec<Value> = items.iter().map(|v| variables::substitute(v, &ctx)).collect();
        let fragment_dir = path.parent().unwrap_or(base_dir);
        expand_into(&substituted, fragment_dir, depth + 1, out)?;
    }
    Ok(())
}

/// Fields an include entry passes to its fragment
fn include_params(declaration: &Value) -> Map<String, Value> {
    let mut params = Map::new();
    if let Value::Object(map) = declaration {
        for (key, value) in map {
            match key.as_str() {
                "include" => {}
                "variables" | "with" => {
                    if let Value::Object(vars) = value {
                        params.extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                }
                _ => {
                    params.insert(key.clone(), value.clone());
                }
            }
        }
    }
    params
}

// ============================================================================
// Extraction
// ============================================================================

/// Extract named values from a response. Each entry is an expression string
/// or `{expression, as: string|number|json}`. Expressions that select
/// nothing are skipped with a warning.
pub fn extract_variables(envelope: &ResponseEnvelope, extract: &Map<String, Value>) -> Result<Map<String, Value>> {
    let canonical = envelope.canonical();
    let mut values = Map::new();

    for (name, declaration) in extract {
        let (expression, coercion, default) = match declaration {
            Value::String(expr) => (expr.as_str(), None, None),
            Value::Object(map) => {
                let expr = ["expression", "path"]
                    .iter()
                    .find_map(|k| map.get(*k).and_then(Value::as_str))
                    .ok_or_else(|| Error::expression(name.clone(), "extraction needs an expression"))?;
                let coercion = map.get("as").or_else(|| map.get("type")).and_then(Value::as_str);
                (expr, coercion, map.get("default"))
            }
            other => {
                return Err(Error::expression(
                    name.clone(),
                    format!("extraction must be a string or mapping, found {}", type_name(other)),
                ))
            }
        };

        let extracted = match extract_value(envelope, &canonical, expression)? {
            Some(value) => value,
            None => match default {
                Some(value) => value.clone(),
                None => {
                    warn!("Extraction '{}' matched nothing for {}", name, expression);
                    continue;
                }
            },
        };

        let value = match coercion {
            None | Some("json") => extracted,
            Some("string") => Value::String(coerce_string(&extracted)),
            Some("number") => coerce_number(&extracted)
                .and_then(number_value)
                .ok_or_else(|| Error::expression(expression, format!("cannot coerce {} to a number", extracted)))?,
            Some(other) => {
                return Err(Error::expression(expression, format!("unknown coercion '{}'", other)))
            }
        };
        values.insert(name.clone(), value);
    }

    Ok(values)
}

/// Whole numbers within i64 range stay integers so `${id}` renders as `42`
fn number_value(n: f64) -> Option<Value> {
    if n.is_finite() && n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 {
        Some(Value::from(n as i64))
    } else {
        serde_json::Number::from_f64(n).map(Value::Number)
    }
}

/// Evaluate one extraction expression. `regex:<pattern>` and `/<pattern>/`
/// run against the body text; everything else is a path into the
/// canonical envelope.
pub fn extract_value(envelope: &ResponseEnvelope, canonical: &Value, expression: &str) -> Result<Option<Value>> {
    let expression = expression.trim();
    if let Some(pattern) = expression.strip_prefix("regex:") {
        return regex_capture(&body_text(&envelope.body), pattern.trim());
    }
    if expression.len() > 1 && expression.starts_with('/') && expression.ends_with('/') {
        return regex_capture(&body_text(&envelope.body), &expression[1..expression.len() - 1]);
    }
    Ok(PathExpr::parse(expression)?.select(canonical))
}

/// First capture group of `pattern` in `text`, or the whole match
fn regex_capture(text: &str, pattern: &str) -> Result<Option<Value>> {
    let re = Regex::new(pattern).map_err(|e| Error::expression(pattern, e))?;
    Ok(re.captures(text).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(0))
            .map(|m| Value::String(m.as_str().to_string()))
    }))
}

fn body_text(body: &Value) -> String {
    match body {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
