//! Setup/teardown actions around a test case
//!
//! Each action carries a scope. The executor runs them in a fixed order:
//! setup(test), setup(run), request, teardown(run), teardown(assert),
//! assertions, teardown(test).
//!
//! ```yaml
//! lifecycle:
//!   setup:
//!     - { action: set, name: token, value: "${uuid()}" }
//!   teardown:
//!     - { action: extract, name: userId, expression: "$.id", scope: assert }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::assertion::extract_value;
use crate::error::{Error, Result};
use crate::runner::parse_duration;
use crate::types::ResponseEnvelope;
use crate::variables::{stringify, substitute, VariableContext};

/// Phase an action belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Test,
    Run,
    Assert,
}

impl std::str::FromStr for Scope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "test" => Ok(Scope::Test),
            "run" => Ok(Scope::Run),
            "assert" => Ok(Scope::Assert),
            other => Err(Error::InvalidAction(format!("unknown scope '{}'", other))),
        }
    }
}

/// A lifecycle action
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Bind a variable; the value is substituted when the action runs
    Set { name: String, value: Value },
    Unset { name: String },
    /// Pull a value out of the response into the extracted variables
    Extract { name: String, expression: String },
    Wait { duration: Duration },
    Log { message: String },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Set { .. } => "set",
            Action::Unset { .. } => "unset",
            Action::Extract { .. } => "extract",
            Action::Wait { .. } => "wait",
            Action::Log { .. } => "log",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopedAction {
    pub scope: Scope,
    pub action: Action,
}

impl ScopedAction {
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| Error::InvalidAction(format!("expected a mapping, got {}", value)))?;
        let kind = map
            .get("action")
            .or_else(|| map.get("type"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidAction("missing 'action'".to_string()))?;
        let scope = match map.get("scope").and_then(Value::as_str) {
            Some(s) => s.parse()?,
            None => Scope::default(),
        };

        let name = || -> Result<String> {
            map.get("name")
                .or_else(|| map.get("variable"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::InvalidAction(format!("'{}' needs a 'name'", kind)))
        };

        let action = match kind {
            "set" | "set_variable" => Action::Set {
                name: name()?,
                value: map.get("value").cloned().unwrap_or(Value::Null),
            },
            "unset" | "unset_variable" => Action::Unset { name: name()? },
            "extract" => Action::Extract {
                name: name()?,
                expression: map
                    .get("expression")
                    .or_else(|| map.get("path"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| Error::InvalidAction("'extract' needs an 'expression'".to_string()))?,
            },
            "wait" | "sleep" | "delay" => {
                let raw = map
                    .get("duration")
                    .or_else(|| map.get("ms"))
                    .ok_or_else(|| Error::InvalidAction(format!("'{}' needs a 'duration'", kind)))?;
                Action::Wait {
                    duration: parse_duration(raw)
                        .ok_or_else(|| Error::InvalidAction(format!("invalid duration {}", raw)))?,
                }
            }
            "log" => Action::Log {
                message: map.get("message").map(stringify).unwrap_or_default(),
            },
            other => return Err(Error::UnknownAction(other.to_string())),
        };

        Ok(Self { scope, action })
    }
}

/// Setup and teardown action lists of a test case
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LifecycleConfig {
    pub setup: Vec<ScopedAction>,
    pub teardown: Vec<ScopedAction>,
}

impl LifecycleConfig {
    /// Parse `{setup, teardown}`; `before`/`after` are accepted as aliases.
    /// Any unknown action fails the whole configuration.
    pub fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        let map = value
            .as_object()
            .ok_or_else(|| Error::InvalidAction("lifecycle must be a mapping".to_string()))?;

        let list = |keys: [&str; 2]| -> Result<Vec<ScopedAction>> {
            let Some(raw) = keys.iter().find_map(|k| map.get(*k)) else {
                return Ok(Vec::new());
            };
            raw.as_array()
                .ok_or_else(|| Error::InvalidAction(format!("'{}' must be a list", keys[0])))?
                .iter()
                .map(ScopedAction::from_value)
                .collect()
        };

        Ok(Self {
            setup: list(["setup", "before"])?,
            teardown: list(["teardown", "after"])?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.setup.is_empty() && self.teardown.is_empty()
    }
}

/// State lifecycle actions read and write
#[derive(Debug, Clone, Default)]
pub struct LifecycleContext {
    pub params: Map<String, Value>,
    pub variables: Map<String, Value>,
    pub extracted: Map<String, Value>,
    pub response: Option<ResponseEnvelope>,
}

impl LifecycleContext {
    pub fn new(variables: Map<String, Value>, extracted: Map<String, Value>) -> Self {
        Self {
            variables,
            extracted,
            ..Default::default()
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Variable view for substitution
    pub fn variable_context(&self) -> VariableContext {
        VariableContext::new()
            .with_params(self.params.clone())
            .with_environment(self.variables.clone())
            .with_extracted(self.extracted.clone())
    }
}

/// Run the actions of `actions` whose scope is `scope`, in declaration order
pub async fn execute_actions(actions: &[ScopedAction], scope: Scope, ctx: &mut LifecycleContext) -> Result<()> {
    for scoped in actions.iter().filter(|a| a.scope == scope) {
        debug!("Lifecycle {:?} action: {}", scope, scoped.action.kind());
        execute_action(&scoped.action, ctx).await?;
    }
    Ok(())
}

async fn execute_action(action: &Action, ctx: &mut LifecycleContext) -> Result<()> {
    match action {
        Action::Set { name, value } => {
            let resolved = substitute(value, &ctx.variable_context());
            ctx.variables.insert(name.clone(), resolved);
        }
        Action::Unset { name } => {
            ctx.variables.remove(name);
        }
        Action::Extract { name, expression } => {
            let response = ctx
                .response
                .as_ref()
                .ok_or_else(|| Error::InvalidAction(format!("extract '{}' needs a response", name)))?;
            if let Some(value) = extract_value(response, &response.canonical(), expression)? {
                ctx.extracted.insert(name.clone(), value);
            }
        }
        Action::Wait { duration } => tokio::time::sleep(*duration).await,
        Action::Log { message } => {
            let rendered = substitute(&Value::String(message.clone()), &ctx.variable_context());
            info!("{}", stringify(&rendered));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn config(value: Value) -> LifecycleConfig {
        LifecycleConfig::from_value(&value).unwrap()
    }

    #[test]
    fn test_parse_scopes_and_aliases() {
        let lc = config(json!({
            "before": [ { "action": "set", "name": "a", "value": 1 } ],
            "teardown": [
                { "action": "sleep", "duration": "10ms", "scope": "run" },
                { "type": "extract", "name": "id", "path": "$.id", "scope": "assert" }
            ]
        }));
        assert_eq!(lc.setup[0].scope, Scope::Test);
        assert_eq!(lc.teardown[0].action, Action::Wait { duration: Duration::from_millis(10) });
        assert_eq!(lc.teardown[1].scope, Scope::Assert);
    }

    #[test]
    fn test_unknown_action_fails_whole_config() {
        let err = LifecycleConfig::from_value(&json!({
            "setup": [
                { "action": "set", "name": "a", "value": 1 },
                { "action": "launch_rocket" }
            ]
        }))
        .unwrap_err();
        assert!(matches!(err, Error::UnknownAction(a) if a == "launch_rocket"));
    }

    #[test]
    fn test_invalid_scope_and_missing_fields() {
        assert!(ScopedAction::from_value(&json!({ "action": "set", "name": "a", "scope": "suite" })).is_err());
        assert!(ScopedAction::from_value(&json!({ "action": "set" })).is_err());
        assert!(ScopedAction::from_value(&json!({ "action": "wait" })).is_err());
        assert!(ScopedAction::from_value(&json!("set")).is_err());
    }

    #[tokio::test]
    async fn test_only_matching_scope_runs() {
        let lc = config(json!({
            "setup": [
                { "action": "set", "name": "a", "value": "test" },
                { "action": "set", "name": "b", "value": "run", "scope": "run" }
            ]
        }));
        let mut ctx = LifecycleContext::default();
        execute_actions(&lc.setup, Scope::Run, &mut ctx).await.unwrap();
        assert_eq!(ctx.variables.get("b"), Some(&json!("run")));
        assert!(!ctx.variables.contains_key("a"));
    }

    #[tokio::test]
    async fn test_set_substitutes_and_unset_removes() {
        let lc = config(json!({
            "setup": [
                { "action": "set", "name": "user", "value": "alice" },
                { "action": "set", "name": "greeting", "value": "hi ${user}" },
                { "action": "unset", "name": "user" }
            ]
        }));
        let mut ctx = LifecycleContext::default();
        execute_actions(&lc.setup, Scope::Test, &mut ctx).await.unwrap();
        assert_eq!(ctx.variables.get("greeting"), Some(&json!("hi alice")));
        assert!(!ctx.variables.contains_key("user"));
    }

    #[tokio::test]
    async fn test_extract_reads_response() {
        let lc = config(json!({
            "teardown": [ { "action": "extract", "name": "id", "expression": "$.id", "scope": "assert" } ]
        }));
        let mut ctx = LifecycleContext::default();
        let err = execute_actions(&lc.teardown, Scope::Assert, &mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::InvalidAction(_)));

        ctx.response = Some(ResponseEnvelope::new(200, BTreeMap::new(), json!({ "id": 9 }), 1));
        execute_actions(&lc.teardown, Scope::Assert, &mut ctx).await.unwrap();
        assert_eq!(ctx.extracted.get("id"), Some(&json!(9)));
    }
}
