//! Suite documents (`.tsuite`)
//!
//! A suite groups test specs under shared variables, environment and
//! defaults:
//!
//! ```yaml
//! suite:
//!   name: users
//!   variables: { tenant: acme }
//!   defaults:
//!     assertions:
//!       - { type: status, expected: 200 }
//!   tests:
//!     - file: ./create-user.http.tspec
//!     - name: list
//!       http: { method: GET, path: /users }
//! ```

use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::spec::RawSpec;
use crate::template::{self, deep_merge, resolve_path};

/// A suite, after its own template chain is resolved
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Suite {
    pub name: String,
    pub description: Option<String>,
    pub variables: Map<String, Value>,
    pub environment: Option<Value>,
    pub defaults: Map<String, Value>,
    pub tests: Vec<Value>,
}

/// One member spec of a suite, merged over the suite defaults
#[derive(Debug, Clone, PartialEq)]
pub struct SuiteEntry {
    pub id: String,
    pub spec: RawSpec,
}

/// True for documents with a top-level `suite` key
pub fn is_suite(spec: &RawSpec) -> bool {
    spec.get("suite").is_some_and(Value::is_object)
}

/// True for `*.tsuite` and `*.tsuite.yaml` filenames
pub fn is_suite_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| {
            let n = n.to_ascii_lowercase();
            n.ends_with(".tsuite") || n.ends_with(".tsuite.yaml") || n.ends_with(".tsuite.yml")
        })
        .unwrap_or(false)
}

impl Suite {
    pub fn from_spec(spec: &RawSpec) -> Result<Self> {
        let source = spec.path().map(Path::to_path_buf).unwrap_or_else(|| "<inline>".into());
        let suite = spec
            .get("suite")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::load(&source, "missing 'suite' mapping"))?;

        let object = |key: &str| -> Result<Map<String, Value>> {
            match suite.get(key) {
                None | Some(Value::Null) => Ok(Map::new()),
                Some(Value::Object(map)) => Ok(map.clone()),
                Some(_) => Err(Error::load(&source, format!("suite.{} must be a mapping", key))),
            }
        };

        let tests = match suite.get("tests") {
            Some(Value::Array(items)) => items.clone(),
            None => Vec::new(),
            Some(_) => return Err(Error::load(&source, "suite.tests must be a list")),
        };

        let fallback_name = spec
            .path()
            .map(stem)
            .unwrap_or_else(|| "suite".to_string());

        Ok(Self {
            name: suite
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or(fallback_name),
            description: suite.get("description").and_then(Value::as_str).map(str::to_string),
            variables: object("variables")?,
            environment: suite.get("environment").filter(|v| !v.is_null()).cloned(),
            defaults: object("defaults")?,
            tests,
        })
    }

    /// Shared layer each entry is merged over
    fn base(&self) -> Value {
        let mut base = self.defaults.clone();
        if !self.variables.is_empty() {
            let merged = deep_merge(
                base.get("variables").unwrap_or(&Value::Null),
                &Value::Object(self.variables.clone()),
            );
            base.insert("variables".to_string(), merged);
        }
        if let Some(env) = &self.environment {
            let merged = deep_merge(base.get("environment").unwrap_or(&Value::Null), env);
            base.insert("environment".to_string(), merged);
        }
        Value::Object(base)
    }
}

/// Expand a suite into its member specs. File entries resolve relative to
/// the suite; each member's own `extends` chain is resolved before merging.
pub fn expand(spec: &RawSpec) -> Result<Vec<SuiteEntry>> {
    let suite = Suite::from_spec(spec)?;
    let base_dir = spec.base_dir();
    let source = spec.path().map(Path::to_path_buf).unwrap_or_else(|| "<inline>".into());
    let base = suite.base();

    let mut entries = Vec::with_capacity(suite.tests.len());
    for (index, test) in suite.tests.iter().enumerate() {
        let Some(map) = test.as_object() else {
            return Err(Error::load(&source, format!("suite.tests[{}] must be a mapping", index)));
        };

        let (local_id, member) = if let Some(file) = map.get("file") {
            let file = file
                .as_str()
                .ok_or_else(|| Error::load(&source, format!("suite.tests[{}].file must be a string", index)))?;
            let path = resolve_path(&base_dir, file);
            let member = RawSpec::from_file(&path)?;
            let member_dir = member.base_dir();
            (stem(&path), template::resolve(member, &member_dir)?)
        } else {
            let mut inline = map.clone();
            let name = inline
                .remove("name")
                .and_then(|n| n.as_str().map(str::to_string))
                .unwrap_or_else(|| index.to_string());
            let mut member = RawSpec::from_map(inline);
            if let Some(path) = spec.path() {
                member = member.with_path(path);
            }
            (name, template::resolve(member, &base_dir)?)
        };

        let merged = deep_merge(&base, &member.to_value());
        let mut merged = RawSpec::from_value(merged)?;
        if let Some(path) = member.path() {
            merged = merged.with_path(path);
        }
        if merged.get("description").is_none() {
            if let Some(description) = &suite.description {
                merged.insert("description", Value::String(format!("{}: {}", description, local_id)));
            }
        }

        debug!("Suite {} entry {}", suite.name, local_id);
        entries.push(SuiteEntry {
            id: format!("{}/{}", suite.name, local_id),
            spec: merged,
        });
    }

    Ok(entries)
}

/// File name up to its first dot
pub(crate) fn stem(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.split('.').next().unwrap_or(n).to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_suite_paths() {
        assert!(is_suite_path(Path::new("a/users.http.tsuite")));
        assert!(is_suite_path(Path::new("base.tsuite.yaml")));
        assert!(!is_suite_path(Path::new("users.http.tspec")));
        assert_eq!(stem(Path::new("dir/create-user.http.tspec")), "create-user");
    }

    #[test]
    fn test_expand_files_and_inline_entries() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("base.http.tspec"),
            "http:\n  headers:\n    accept: application/json\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("create.http.tspec"),
            "extends: ./base.http.tspec\nhttp:\n  method: POST\n  path: /users\nassertions:\n  - { type: status, expected: 201 }\n",
        )
        .unwrap();
        let suite_path = dir.path().join("users.http.tsuite");
        fs::write(
            &suite_path,
            r#"
suite:
  name: users
  description: User API
  variables: { tenant: acme }
  environment: { host: api.test }
  defaults:
    assertions:
      - { type: duration, expected: 1000 }
  tests:
    - file: ./create.http.tspec
    - name: list
      http: { method: GET, path: /users }
"#,
        )
        .unwrap();

        let spec = RawSpec::from_file(&suite_path).unwrap();
        assert!(is_suite(&spec));
        let entries = expand(&spec).unwrap();
        assert_eq!(entries.len(), 2);

        let create = &entries[0];
        assert_eq!(create.id, "users/create");
        assert_eq!(create.spec.get("variables"), Some(&json!({ "tenant": "acme" })));
        assert_eq!(create.spec.get("environment"), Some(&json!({ "host": "api.test" })));
        assert_eq!(
            create.spec.request("http"),
            Some(&json!({ "headers": { "accept": "application/json" }, "method": "POST", "path": "/users" }))
        );
        assert_eq!(create.spec.get("assertions").unwrap().as_array().unwrap().len(), 2);
        assert!(create.spec.extends().is_none());

        let list = &entries[1];
        assert_eq!(list.id, "users/list");
        assert_eq!(list.spec.get_str("description"), Some("User API: list"));
        assert!(list.spec.get("name").is_none());
    }

    #[test]
    fn test_malformed_suites() {
        let spec = RawSpec::from_yaml("suite:\n  tests: nope\n").unwrap();
        assert!(expand(&spec).is_err());

        let spec = RawSpec::from_yaml("suite:\n  tests:\n    - just-a-string\n").unwrap();
        assert!(expand(&spec).is_err());

        let spec = RawSpec::from_yaml("http: {}\n").unwrap();
        assert!(!is_suite(&spec));
        assert!(Suite::from_spec(&spec).is_err());
    }
}
