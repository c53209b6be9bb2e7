//! Structural validation of specifications
//!
//! Validation never fails fast: every problem found becomes one
//! human-readable message.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::assertion::Assertion;
use crate::data::{DataConfig, DataFormat};
use crate::lifecycle::LifecycleConfig;
use crate::path::PathExpr;
use crate::registry::ProtocolRegistry;
use crate::spec::{type_name, RawSpec};
use crate::suite;
use crate::template::{self, resolve_path};
use crate::types::{EnvironmentConfig, OutputConfig, SpecMetadata};

/// Validation outcome for one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub file: PathBuf,
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new(file: impl Into<PathBuf>, errors: Vec<String>) -> Self {
        Self {
            file: file.into(),
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Load, resolve and validate a spec or suite file
pub fn validate_file(path: &Path, registry: &ProtocolRegistry) -> ValidationResult {
    let spec = match RawSpec::from_file(path) {
        Ok(spec) => spec,
        Err(e) => return ValidationResult::new(path, vec![e.to_string()]),
    };
    let spec = match template::resolve(spec, &path.parent().map(Path::to_path_buf).unwrap_or_default()) {
        Ok(spec) => spec,
        Err(e) => return ValidationResult::new(path, vec![e.to_string()]),
    };

    if suite::is_suite(&spec) {
        let errors = match suite::expand(&spec) {
            Ok(entries) => entries
                .iter()
                .flat_map(|entry| {
                    validate_spec(&entry.spec, registry)
                        .into_iter()
                        .map(|msg| format!("{}: {}", entry.id, msg))
                        .collect::<Vec<_>>()
                })
                .collect(),
            Err(e) => vec![e.to_string()],
        };
        return ValidationResult::new(path, errors);
    }

    ValidationResult::new(path, validate_spec(&spec, registry))
}

/// Validate a template-resolved spec
pub fn validate_spec(spec: &RawSpec, registry: &ProtocolRegistry) -> Vec<String> {
    let mut errors = Vec::new();
    let base_dir = spec.base_dir();

    let blocks = spec.protocol_blocks();
    match blocks.as_slice() {
        [] => errors.push(format!(
            "missing protocol request block (expected one of: {})",
            registry.list_protocols().join(", ")
        )),
        [protocol] => {
            if !registry.has_protocol(protocol) {
                errors.push(format!("unknown protocol '{}'", protocol));
            } else if let Some(request) = spec.request(protocol) {
                let outcome = registry.validate_request(protocol, request);
                errors.extend(outcome.errors.into_iter().map(|e| format!("{}: {}", protocol, e)));
            }
        }
        many => errors.push(format!("multiple protocol blocks: {}", many.join(", "))),
    }

    if let Some(version) = spec.get("version") {
        if !version.is_string() && !version.is_number() {
            errors.push(format!("version must be a string or number, found {}", type_name(version)));
        }
    }
    if let Some(description) = spec.get("description") {
        if !description.is_string() {
            errors.push("description must be a string".to_string());
        }
    }

    check_shape::<SpecMetadata>(spec, "metadata", &mut errors);
    check_shape::<EnvironmentConfig>(spec, "environment", &mut errors);
    check_shape::<OutputConfig>(spec, "output", &mut errors);

    if let Some(variables) = spec.get("variables") {
        if !variables.is_object() {
            errors.push(format!("variables must be a mapping, found {}", type_name(variables)));
        }
    }

    match spec.get("assertions") {
        None => {}
        Some(Value::Array(items)) => validate_assertions(items, &base_dir, &mut errors),
        Some(other) => errors.push(format!("assertions must be a list, found {}", type_name(other))),
    }

    match spec.get("extract") {
        None => {}
        Some(Value::Object(map)) => {
            for (name, declaration) in map {
                if let Err(msg) = validate_extraction(declaration) {
                    errors.push(format!("extract.{}: {}", name, msg));
                }
            }
        }
        Some(other) => errors.push(format!("extract must be a mapping, found {}", type_name(other))),
    }

    if let Some(data) = spec.get("data") {
        match DataConfig::from_value(data) {
            Ok(config) => {
                if config.format.is_none() && DataFormat::from_path(Path::new(&config.source)).is_none() {
                    errors.push(format!("data: cannot infer format of '{}'", config.source));
                }
                if config.driver.as_deref().is_some_and(|d| d != "file") {
                    errors.push(format!("data: unsupported driver '{}'", config.driver.unwrap_or_default()));
                } else if !config.source.contains("${") && !resolve_path(&base_dir, &config.source).exists() {
                    errors.push(format!("data: source not found: {}", config.source));
                }
            }
            Err(e) => errors.push(format!("data: {}", e)),
        }
    }

    if let Some(lifecycle) = spec.get("lifecycle") {
        if let Err(e) = LifecycleConfig::from_value(lifecycle) {
            errors.push(format!("lifecycle: {}", e));
        }
    }

    errors
}

fn check_shape<T: serde::de::DeserializeOwned>(spec: &RawSpec, key: &str, errors: &mut Vec<String>) {
    if let Some(value) = spec.get(key) {
        if let Err(e) = serde_json::from_value::<T>(value.clone()) {
            errors.push(format!("{}: {}", key, e));
        }
    }
}

fn validate_assertions(items: &[Value], base_dir: &Path, errors: &mut Vec<String>) {
    for (idx, item) in items.iter().enumerate() {
        if let Some(include) = item.get("include") {
            match include.as_str() {
                Some(file) if !resolve_path(base_dir, file).exists() => {
                    errors.push(format!("assertions[{}]: include not found: {}", idx, file))
                }
                Some(_) => {}
                None => errors.push(format!("assertions[{}]: include must be a path", idx)),
            }
            continue;
        }
        if item.is_object() && item.get("type").is_none() && item.get("expression").is_none() && item.get("path").is_none() {
            errors.push(format!("assertions[{}]: needs a 'type' or an 'include'", idx));
            continue;
        }
        if let Err(e) = Assertion::from_value(item) {
            errors.push(format!("assertions[{}]: {}", idx, e));
        }
    }
}

fn validate_extraction(declaration: &Value) -> std::result::Result<(), String> {
    let expression = match declaration {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map
            .get("expression")
            .or_else(|| map.get("path"))
            .and_then(Value::as_str)
            .ok_or("needs an 'expression'")?,
        other => return Err(format!("expected a string or mapping, found {}", type_name(other))),
    };
    let trimmed = expression.trim();
    if trimmed.starts_with("regex:") || (trimmed.len() > 1 && trimmed.starts_with('/') && trimmed.ends_with('/')) {
        return Ok(());
    }
    PathExpr::parse(trimmed).map(|_| ()).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn errors(yaml: &str) -> Vec<String> {
        let spec = RawSpec::from_yaml(yaml).unwrap();
        validate_spec(&spec, &ProtocolRegistry::with_builtins())
    }

    #[test]
    fn test_valid_spec_has_no_errors() {
        let errs = errors(
            r#"
version: "1.0"
description: create user
metadata: { tags: [smoke], priority: high }
http: { method: POST, path: /users }
assertions:
  - { type: status, expected: 201 }
  - { type: json_path, expression: "$.id", operator: exists }
extract:
  userId: "$.id"
  token: { expression: "regex:token=(\\w+)", as: string }
lifecycle:
  setup:
    - { action: set, name: a, value: 1 }
"#,
        );
        assert!(errs.is_empty(), "{:?}", errs);
    }

    #[test]
    fn test_protocol_block_problems() {
        assert!(errors("description: nothing\n")[0].starts_with("missing protocol request block"));
        assert!(errors("http: { path: / }\ngrpc: { service: A, method: B }\n")[0].starts_with("multiple protocol blocks"));
        assert_eq!(errors("smtp: { to: a }\n"), vec!["unknown protocol 'smtp'"]);
        assert_eq!(errors("graphql: { variables: {} }\n").len(), 1);
    }

    #[test]
    fn test_collects_every_problem() {
        let errs = errors(
            r#"
http: { path: / }
assertions:
  - { type: status, operator: roughly, expected: 200 }
  - { expected: 1 }
  - { include: ./missing.yaml }
extract:
  bad: "$.items["
  worse: 12
data: { source: rows.xlsx }
lifecycle:
  setup:
    - { action: teleport }
"#,
        );
        assert_eq!(errs.len(), 8, "{:?}", errs);
        assert!(errs.iter().any(|e| e.contains("Unknown assertion operator: roughly")));
        assert!(errs.iter().any(|e| e.contains("needs a 'type'")));
        assert!(errs.iter().any(|e| e.contains("include not found")));
        assert!(errs.iter().any(|e| e.starts_with("extract.bad")));
        assert!(errs.iter().any(|e| e.starts_with("extract.worse")));
        assert!(errs.iter().any(|e| e.contains("cannot infer format")));
        assert!(errs.iter().any(|e| e.contains("source not found: rows.xlsx")));
        assert!(errs.iter().any(|e| e.contains("teleport")));
    }

    #[test]
    fn test_assertions_must_be_a_list() {
        let errs = errors("http: { path: / }\nassertions: { type: status }\n");
        assert_eq!(errs, vec!["assertions must be a list, found object"]);
    }

    #[test]
    fn test_validate_file_reports_load_and_cycle_errors() {
        let dir = TempDir::new().unwrap();
        let registry = ProtocolRegistry::with_builtins();

        let missing = validate_file(&dir.path().join("nope.http.tspec"), &registry);
        assert!(!missing.valid);

        fs::write(dir.path().join("a.http.tspec"), "extends: ./b.http.tspec\nhttp: { path: / }\n").unwrap();
        fs::write(dir.path().join("b.http.tspec"), "extends: ./a.http.tspec\n").unwrap();
        let cyclic = validate_file(&dir.path().join("a.http.tspec"), &registry);
        assert!(!cyclic.valid);
        assert!(cyclic.errors[0].contains("Circular template"));
    }
}
