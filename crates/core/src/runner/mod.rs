//! Built-in protocol runners
//!
//! HTTP and GraphQL own a `reqwest` client. gRPC and WebSocket hand their
//! requests to a [`Transport`](crate::registry::Transport) supplied through
//! [`RunnerOptions`]; without one they report a failed envelope.

mod delegated;
mod graphql;
mod http;

pub use delegated::DelegatedRunner;
pub use graphql::GraphqlRunner;
pub use http::HttpRunner;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::Result;
use crate::registry::{
    ProtocolRegistry, RequestValidation, RequestValidator, RunnerFactory, RunnerOptions, TestRunner,
};
use crate::types::TestCase;

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Register http, graphql, grpc and websocket
pub fn register_builtins(registry: &ProtocolRegistry) {
    let http: RunnerFactory = Arc::new(|opts: &RunnerOptions| -> Result<Arc<dyn TestRunner>> {
        Ok(Arc::new(HttpRunner::new(opts)?))
    });
    let graphql: RunnerFactory = Arc::new(|opts: &RunnerOptions| -> Result<Arc<dyn TestRunner>> {
        Ok(Arc::new(GraphqlRunner::new(opts)?))
    });
    let grpc: RunnerFactory = Arc::new(|opts: &RunnerOptions| -> Result<Arc<dyn TestRunner>> {
        Ok(Arc::new(DelegatedRunner::new("grpc", opts)))
    });
    let websocket: RunnerFactory = Arc::new(|opts: &RunnerOptions| -> Result<Arc<dyn TestRunner>> {
        Ok(Arc::new(DelegatedRunner::new("websocket", opts)))
    });

    registry.register_with("http", http, Vec::new(), Some(Arc::new(validate_http) as RequestValidator));
    registry.register_with("graphql", graphql, Vec::new(), Some(Arc::new(validate_graphql) as RequestValidator));
    registry.register_with("grpc", grpc, Vec::new(), Some(Arc::new(validate_grpc) as RequestValidator));
    registry.register_with(
        "websocket",
        websocket,
        Vec::new(),
        Some(Arc::new(validate_websocket) as RequestValidator),
    );
}

fn validate_http(request: &Value) -> RequestValidation {
    let mut errors = Vec::new();
    let Some(map) = request.as_object() else {
        return RequestValidation::from_errors(vec!["http request must be a mapping".to_string()]);
    };
    if let Some(method) = map.get("method") {
        match method.as_str() {
            Some(m) if HTTP_METHODS.contains(&m.to_ascii_uppercase().as_str()) => {}
            Some(m) if m.contains("${") => {}
            _ => errors.push(format!("unsupported http method: {}", method)),
        }
    }
    if !map.contains_key("path") && !map.contains_key("url") {
        errors.push("http request needs a 'path' or 'url'".to_string());
    }
    if let Some(headers) = map.get("headers") {
        if !headers.is_object() {
            errors.push("http headers must be a mapping".to_string());
        }
    }
    RequestValidation::from_errors(errors)
}

fn validate_graphql(request: &Value) -> RequestValidation {
    let mut errors = Vec::new();
    match request.get("query") {
        Some(Value::String(q)) if !q.trim().is_empty() => {}
        _ => errors.push("graphql request needs a non-empty 'query'".to_string()),
    }
    if let Some(vars) = request.get("variables") {
        if !vars.is_object() && !vars.is_null() {
            errors.push("graphql variables must be a mapping".to_string());
        }
    }
    RequestValidation::from_errors(errors)
}

fn validate_grpc(request: &Value) -> RequestValidation {
    let errors = ["service", "method"]
        .iter()
        .filter(|key| request.get(**key).and_then(Value::as_str).is_none())
        .map(|key| format!("grpc request needs '{}'", key))
        .collect();
    RequestValidation::from_errors(errors)
}

fn validate_websocket(request: &Value) -> RequestValidation {
    if request.get("url").or_else(|| request.get("path")).is_some() {
        RequestValidation::ok()
    } else {
        RequestValidation::from_errors(vec!["websocket request needs a 'url' or 'path'".to_string()])
    }
}

/// Per-case timeout from `metadata.timeout`, else the runner default.
/// Numbers are milliseconds; strings may carry an `ms`, `s` or `m` suffix.
pub fn case_timeout(case: &TestCase, default: Duration) -> Duration {
    case.metadata
        .timeout
        .as_ref()
        .or_else(|| case.request.get("timeout"))
        .and_then(parse_duration)
        .unwrap_or(default)
}

pub(crate) fn parse_duration(value: &Value) -> Option<Duration> {
    match value {
        Value::Number(n) => n.as_f64().filter(|ms| *ms >= 0.0).map(|ms| Duration::from_millis(ms as u64)),
        Value::String(s) => {
            let s = s.trim();
            let (number, scale) = if let Some(v) = s.strip_suffix("ms") {
                (v, 1.0)
            } else if let Some(v) = s.strip_suffix('s') {
                (v, 1_000.0)
            } else if let Some(v) = s.strip_suffix('m') {
                (v, 60_000.0)
            } else {
                (s, 1.0)
            };
            number
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| *v >= 0.0)
                .map(|v| Duration::from_millis((v * scale) as u64))
        }
        _ => None,
    }
}

/// Join a base URL and a path, keeping absolute URLs as they are
pub(crate) fn join_url(base: Option<&str>, path: &str) -> Option<String> {
    if path.starts_with("http://")
        || path.starts_with("https://")
        || path.starts_with("ws://")
        || path.starts_with("wss://")
    {
        return Some(path.to_string());
    }
    let base = base?.trim_end_matches('/');
    if path.is_empty() {
        Some(base.to_string())
    } else if path.starts_with('/') {
        Some(format!("{}{}", base, path))
    } else {
        Some(format!("{}/{}", base, path))
    }
}

/// Base URL of a case, falling back to the runner options
pub(crate) fn base_url(case: &TestCase, options: &RunnerOptions) -> Option<String> {
    case.environment
        .as_ref()
        .and_then(|env| env.base_url())
        .or_else(|| options.base_url.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration(&json!(250)), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration(&json!("2s")), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration(&json!("150ms")), Some(Duration::from_millis(150)));
        assert_eq!(parse_duration(&json!("1m")), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration(&json!("soon")), None);
        assert_eq!(parse_duration(&json!(-5)), None);
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url(Some("http://api"), "/users").as_deref(), Some("http://api/users"));
        assert_eq!(join_url(Some("http://api/"), "users").as_deref(), Some("http://api/users"));
        assert_eq!(join_url(None, "https://x.test/a").as_deref(), Some("https://x.test/a"));
        assert_eq!(join_url(None, "/relative"), None);
    }

    #[test]
    fn test_builtin_validators() {
        assert!(validate_http(&json!({ "method": "post", "url": "http://x" })).valid);
        assert!(validate_http(&json!({ "method": "${verb}", "path": "/" })).valid);
        assert_eq!(validate_http(&json!({ "method": "FETCH" })).errors.len(), 2);
        assert!(validate_grpc(&json!({ "service": "Users", "method": "Get" })).valid);
        assert!(!validate_grpc(&json!({ "service": "Users" })).valid);
        assert!(validate_websocket(&json!({ "url": "ws://x" })).valid);
        assert!(!validate_graphql(&json!({ "query": "  " })).valid);
    }
}
