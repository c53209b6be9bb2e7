//! Variable substitution
//!
//! `${...}` placeholders are resolved against a layered [`VariableContext`],
//! consulted in this order:
//!
//! 1. explicit call-time params
//! 2. environment (spec `variables`, `environment.variables`, data rows,
//!    and `env.NAME` for the process environment)
//! 3. values extracted by earlier test cases in the run
//! 4. built-in functions (`${uuid()}`, `${timestamp()}`, ...)
//!
//! Placeholders that resolve nowhere are left verbatim so a later stage can
//! fill them in.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::path::PathExpr;

/// Layered lookup context for one test case
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub params: Map<String, Value>,
    pub environment: Map<String, Value>,
    pub extracted: Map<String, Value>,
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_environment(mut self, environment: Map<String, Value>) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_extracted(mut self, extracted: Map<String, Value>) -> Self {
        self.extracted = extracted;
        self
    }

    /// Add values to the environment layer, overwriting same-named entries
    pub fn extend_environment(&mut self, values: &Map<String, Value>) {
        for (k, v) in values {
            self.environment.insert(k.clone(), v.clone());
        }
    }

    /// Resolve one placeholder body (the text between `${` and `}`)
    pub fn lookup(&self, expr: &str) -> Option<Value> {
        let expr = expr.trim();
        if expr.is_empty() {
            return None;
        }
        if let Some(value) = lookup_in(&self.params, expr) {
            return Some(value);
        }
        if let Some(value) = lookup_in(&self.environment, expr) {
            return Some(value);
        }
        if let Some(name) = expr.strip_prefix("env.") {
            if let Ok(value) = std::env::var(name) {
                return Some(Value::String(value));
            }
        }
        if let Some(value) = lookup_in(&self.extracted, expr) {
            return Some(value);
        }
        call_builtin(expr)
    }
}

fn lookup_in(layer: &Map<String, Value>, expr: &str) -> Option<Value> {
    if let Some(value) = layer.get(expr) {
        return Some(value.clone());
    }
    let split = expr.find(['.', '['])?;
    let (root, rest) = expr.split_at(split);
    let base = layer.get(root)?;
    let rest = rest.strip_prefix('.').unwrap_or(rest);
    let path = PathExpr::parse(&format!("${}{}", if rest.starts_with('[') { "" } else { "." }, rest)).ok()?;
    path.select(base)
}

/// Substitute placeholders anywhere inside `value`
pub fn substitute(value: &Value, ctx: &VariableContext) -> Value {
    match value {
        Value::String(s) => substitute_str(s, ctx),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Substitute placeholders in a string. A string that is exactly one
/// resolvable placeholder yields the typed value.
pub fn substitute_str(input: &str, ctx: &VariableContext) -> Value {
    let spans = scan(input);
    if spans.is_empty() {
        return Value::String(input.to_string());
    }

    if let [span] = spans.as_slice() {
        if span.start == 0 && span.end == input.len() {
            return ctx
                .lookup(&input[span.start + 2..span.end - 1])
                .unwrap_or_else(|| Value::String(input.to_string()));
        }
    }

    let mut out = String::with_capacity(input.len());
    let mut cursor = 0;
    for span in spans {
        out.push_str(&input[cursor..span.start]);
        let body = &input[span.start + 2..span.end - 1];
        match ctx.lookup(body) {
            Some(value) => out.push_str(&stringify(&value)),
            None => out.push_str(&input[span.start..span.end]),
        }
        cursor = span.end;
    }
    out.push_str(&input[cursor..]);
    Value::String(out)
}

/// Placeholder bodies still present in `value`
pub fn unresolved(value: &Value) -> Vec<String> {
    let mut names = Vec::new();
    collect_unresolved(value, &mut names);
    names
}

fn collect_unresolved(value: &Value, names: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            for span in scan(s) {
                names.push(s[span.start + 2..span.end - 1].trim().to_string());
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_unresolved(v, names)),
        Value::Object(map) => map.values().for_each(|v| collect_unresolved(v, names)),
        _ => {}
    }
}

/// Render a value for embedding in text
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Span {
    start: usize,
    end: usize,
}

/// Byte ranges of `${...}` spans, `end` exclusive and covering the `}`
fn scan(input: &str) -> Vec<Span> {
    let bytes = input.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'$' && bytes[i + 1] == b'{' {
            let Some(close) = input[i + 2..].find('}') else {
                break;
            };
            let end = i + 2 + close + 1;
            spans.push(Span { start: i, end });
            i = end;
        } else {
            i += 1;
        }
    }
    spans
}

// ============================================================================
// Built-in functions
// ============================================================================

/// Description of a built-in placeholder function
#[derive(Debug, Clone, Serialize)]
pub struct BuiltinFunction {
    pub name: &'static str,
    pub signature: &'static str,
    pub description: &'static str,
}

const BUILTINS: &[BuiltinFunction] = &[
    BuiltinFunction {
        name: "uuid",
        signature: "uuid()",
        description: "Random v4 UUID",
    },
    BuiltinFunction {
        name: "timestamp",
        signature: "timestamp()",
        description: "Current Unix time in seconds",
    },
    BuiltinFunction {
        name: "timestamp_ms",
        signature: "timestamp_ms()",
        description: "Current Unix time in milliseconds",
    },
    BuiltinFunction {
        name: "now",
        signature: "now()",
        description: "Current time as an RFC 3339 string",
    },
    BuiltinFunction {
        name: "date",
        signature: "date(format = \"%Y-%m-%d\")",
        description: "Current UTC date rendered with a strftime format",
    },
    BuiltinFunction {
        name: "random_int",
        signature: "random_int(min = 0, max = 1000000)",
        description: "Random integer in the inclusive range",
    },
    BuiltinFunction {
        name: "random_string",
        signature: "random_string(length = 8)",
        description: "Random alphanumeric string",
    },
    BuiltinFunction {
        name: "random_email",
        signature: "random_email()",
        description: "Random address under example.com",
    },
    BuiltinFunction {
        name: "random_bool",
        signature: "random_bool()",
        description: "Random boolean",
    },
];

/// All built-in functions, for introspection
pub fn builtin_functions() -> &'static [BuiltinFunction] {
    BUILTINS
}

/// Evaluate `name(args)` or a bare built-in name
fn call_builtin(expr: &str) -> Option<Value> {
    let (name, args) = match expr.find('(') {
        Some(open) => {
            let inner = expr[open + 1..].strip_suffix(')')?;
            let args: Vec<String> = inner
                .split(',')
                .map(|a| unquote(a.trim()).to_string())
                .filter(|a| !a.is_empty())
                .collect();
            (expr[..open].trim(), args)
        }
        None => (expr, Vec::new()),
    };

    let mut rng = rand::thread_rng();
    match name {
        "uuid" => Some(Value::String(uuid::Uuid::new_v4().to_string())),
        "timestamp" => Some(Value::from(chrono::Utc::now().timestamp())),
        "timestamp_ms" => Some(Value::from(chrono::Utc::now().timestamp_millis())),
        "now" => Some(Value::String(chrono::Utc::now().to_rfc3339())),
        "date" => {
            let format = args.first().map(String::as_str).unwrap_or("%Y-%m-%d");
            let items: Vec<_> = chrono::format::StrftimeItems::new(format).collect();
            if items.iter().any(|i| matches!(i, chrono::format::Item::Error)) {
                return None;
            }
            Some(Value::String(
                chrono::Utc::now().format_with_items(items.into_iter()).to_string(),
            ))
        }
        "random_int" => {
            let min: i64 = args.first().map_or(Ok(0), |a| a.parse()).ok()?;
            let max: i64 = args.get(1).map_or(Ok(1_000_000), |a| a.parse()).ok()?;
            if min > max {
                return None;
            }
            Some(Value::from(rng.gen_range(min..=max)))
        }
        "random_string" => {
            let len: usize = args.first().map_or(Ok(8), |a| a.parse()).ok()?;
            Some(Value::String(random_alphanumeric(&mut rng, len)))
        }
        "random_email" => Some(Value::String(format!(
            "user_{}@example.com",
            random_alphanumeric(&mut rng, 8).to_lowercase()
        ))),
        "random_bool" => Some(Value::Bool(rng.gen())),
        _ => None,
    }
}

fn random_alphanumeric(rng: &mut impl Rng, len: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')))
        .unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_layer_precedence() {
        let ctx = VariableContext::new()
            .with_params(map(json!({ "host": "params" })))
            .with_environment(map(json!({ "host": "env", "port": 8080 })))
            .with_extracted(map(json!({ "host": "extracted", "port": 1, "token": "t0k" })));

        assert_eq!(ctx.lookup("host"), Some(json!("params")));
        assert_eq!(ctx.lookup("port"), Some(json!(8080)));
        assert_eq!(ctx.lookup("token"), Some(json!("t0k")));
    }

    #[test]
    fn test_variable_shadows_builtin() {
        let ctx = VariableContext::new().with_environment(map(json!({ "uuid": "fixed" })));
        assert_eq!(ctx.lookup("uuid"), Some(json!("fixed")));
        assert_ne!(ctx.lookup("uuid()"), Some(json!("fixed")));
    }

    #[test]
    fn test_substitute_nested_structure() {
        let ctx = VariableContext::new().with_params(map(json!({ "id": 42, "name": "alice" })));
        let value = json!({
            "path": "/users/${id}",
            "body": { "name": "${name}", "tags": ["${name}-tag", 3, true] },
            "count": "${id}"
        });
        let out = substitute(&value, &ctx);

        assert_eq!(out["path"], json!("/users/42"));
        assert_eq!(out["body"]["name"], json!("alice"));
        assert_eq!(out["body"]["tags"], json!(["alice-tag", 3, true]));
        assert_eq!(out["count"], json!(42));
    }

    #[test]
    fn test_unresolved_placeholders_are_left_verbatim() {
        let ctx = VariableContext::new().with_params(map(json!({ "a": "x" })));
        assert_eq!(substitute_str("${missing}", &ctx), json!("${missing}"));
        assert_eq!(substitute_str("${a}/${missing}", &ctx), json!("x/${missing}"));
        assert_eq!(substitute_str("${unterminated", &ctx), json!("${unterminated"));
        assert_eq!(unresolved(&json!({ "k": ["${missing}"] })), vec!["missing".to_string()]);
    }

    #[test]
    fn test_dotted_lookup_into_structured_variable() {
        let ctx = VariableContext::new()
            .with_extracted(map(json!({ "user": { "id": 7, "roles": ["admin"] } })));
        assert_eq!(ctx.lookup("user.id"), Some(json!(7)));
        assert_eq!(ctx.lookup("user.roles[0]"), Some(json!("admin")));
        assert_eq!(ctx.lookup("user.missing"), None);
    }

    #[test]
    fn test_process_environment_lookup() {
        std::env::set_var("TSPEC_VARIABLES_TEST", "from-env");
        let ctx = VariableContext::new();
        assert_eq!(ctx.lookup("env.TSPEC_VARIABLES_TEST"), Some(json!("from-env")));
    }

    #[test]
    fn test_builtin_functions() {
        let ctx = VariableContext::new();

        let id = ctx.lookup("uuid()").unwrap();
        assert!(uuid::Uuid::parse_str(id.as_str().unwrap()).is_ok());

        assert!(ctx.lookup("timestamp()").unwrap().is_i64());

        let n = ctx.lookup("random_int(5, 7)").unwrap().as_i64().unwrap();
        assert!((5..=7).contains(&n));

        let s = ctx.lookup("random_string(12)").unwrap();
        assert_eq!(s.as_str().unwrap().len(), 12);

        assert_eq!(ctx.lookup("date('%Y')").unwrap().as_str().unwrap().len(), 4);
        assert!(ctx.lookup("random_email()").unwrap().as_str().unwrap().ends_with("@example.com"));
        assert_eq!(ctx.lookup("random_int(9, 1)"), None);
        assert_eq!(ctx.lookup("nope()"), None);
    }

    #[test]
    fn test_builtins_are_enumerable() {
        let names: Vec<_> = builtin_functions().iter().map(|f| f.name).collect();
        assert!(names.contains(&"uuid"));
        assert!(names.contains(&"timestamp"));
        assert!(names.contains(&"random_int"));
    }
}
