//! Specification loader
//!
//! Parses YAML test-intent documents into a [`RawSpec`]: a free-form mapping
//! with a handful of recognised top-level keys and at most one protocol
//! request block.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};

/// Protocols that ship with the engine
pub const BUILTIN_PROTOCOLS: &[&str] = &["http", "grpc", "graphql", "websocket"];

/// Top-level keys that are never protocol request blocks
pub const RESERVED_KEYS: &[&str] = &[
    "version",
    "description",
    "metadata",
    "assertions",
    "extends",
    "variables",
    "environment",
    "data",
    "extract",
    "output",
    "lifecycle",
    "suite",
];

/// Row index key added by data-driven generation
pub const DATA_ROW_INDEX_KEY: &str = "_dataRowIndex";

/// Row values key added by data-driven generation
pub const DATA_ROW_KEY: &str = "_dataRow";

/// A specification document as loaded, before resolution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSpec {
    doc: Map<String, Value>,
    path: Option<PathBuf>,
}

impl RawSpec {
    /// Wrap an already-parsed document
    pub fn from_map(doc: Map<String, Value>) -> Self {
        Self { doc, path: None }
    }

    /// Wrap a value, which must be a mapping
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(doc) => Ok(Self::from_map(doc)),
            Value::Null => Err(Error::load("<inline>", "document is empty")),
            other => Err(Error::load(
                "<inline>",
                format!("expected a mapping at the top level, found {}", type_name(&other)),
            )),
        }
    }

    /// Parse a specification from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let value: Value =
            serde_yaml::from_str(content).map_err(|e| Error::load("<inline>", e))?;
        Self::from_value(value)
    }

    /// Parse a specification from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading spec: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| Error::load(path, e))?;
        let spec = Self::from_yaml(&content).map_err(|e| match e {
            Error::Load { reason, .. } => Error::load(path, reason),
            other => other,
        })?;
        Ok(spec.with_path(path))
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Source file, if the spec was read from disk
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Directory relative references resolve against
    pub fn base_dir(&self) -> PathBuf {
        self.path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.doc.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.doc.get(key).and_then(Value::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.doc.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.doc.remove(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.doc
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.doc
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.doc.clone())
    }

    /// Parent template path declared by `extends`
    pub fn extends(&self) -> Option<&str> {
        self.get_str("extends")
    }

    /// Keys carrying a protocol request block, in document order
    pub fn protocol_blocks(&self) -> Vec<&str> {
        self.doc
            .iter()
            .filter(|(key, value)| is_protocol_key(key) && value.is_object())
            .map(|(key, _)| key.as_str())
            .collect()
    }

    /// Protocol named by the request block, preferring built-in protocols
    pub fn detect_protocol(&self) -> Option<String> {
        let blocks = self.protocol_blocks();
        blocks
            .iter()
            .find(|b| BUILTIN_PROTOCOLS.contains(b))
            .or_else(|| blocks.first())
            .map(|b| b.to_string())
    }

    /// Request block for `protocol`
    pub fn request(&self, protocol: &str) -> Option<&Value> {
        self.doc.get(protocol).filter(|v| v.is_object())
    }
}

fn is_protocol_key(key: &str) -> bool {
    !RESERVED_KEYS.contains(&key) && !key.starts_with('_') && !key.starts_with('$')
}

/// Runtime type name used by messages and the `type` operator
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_spec() {
        let yaml = r#"
version: "1.0"
description: Create a user
metadata:
  tags: [users, smoke]
  priority: high
http:
  method: POST
  path: /users
  body:
    name: alice
assertions:
  - type: status
    expected: 201
"#;
        let spec = RawSpec::from_yaml(yaml).unwrap();
        assert_eq!(spec.get_str("description"), Some("Create a user"));
        assert_eq!(spec.protocol_blocks(), vec!["http"]);
        assert_eq!(spec.detect_protocol().as_deref(), Some("http"));
        assert!(spec.request("http").is_some());
    }

    #[test]
    fn test_spec_without_protocol_block() {
        let spec = RawSpec::from_yaml("extends: ./base.yaml\nassertions: []\n").unwrap();
        assert!(spec.protocol_blocks().is_empty());
        assert_eq!(spec.detect_protocol(), None);
        assert_eq!(spec.extends(), Some("./base.yaml"));
    }

    #[test]
    fn test_plugin_protocol_block_is_detected() {
        let spec = RawSpec::from_yaml("mqtt:\n  topic: sensors/1\n").unwrap();
        assert_eq!(spec.detect_protocol().as_deref(), Some("mqtt"));
    }

    #[test]
    fn test_non_mapping_document_is_rejected() {
        assert!(matches!(RawSpec::from_yaml("- a\n- b\n"), Err(Error::Load { .. })));
        assert!(matches!(RawSpec::from_yaml(""), Err(Error::Load { .. })));
    }

    #[test]
    fn test_missing_file_is_a_load_error() {
        let err = RawSpec::from_file(Path::new("/nonexistent/x.http.tspec")).unwrap_err();
        assert!(matches!(err, Error::Load { .. }));
    }

    #[test]
    fn test_base_dir_follows_source_path() {
        let spec = RawSpec::default().with_path("/specs/users/create.http.tspec");
        assert_eq!(spec.base_dir(), PathBuf::from("/specs/users"));
        assert_eq!(RawSpec::default().base_dir(), PathBuf::from("."));
    }
}
