//! Core types shared across the resolution and execution pipeline

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys of the canonical envelope that body fields never overwrite
pub const RESERVED_ENVELOPE_KEYS: &[&str] =
    &["status", "statusCode", "headers", "body", "duration", "error"];

// ============================================================================
// Specification sections
// ============================================================================

/// Descriptive metadata attached to a specification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_code: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    /// Per-case request timeout, e.g. `5000` or `"5s"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Value>,
}

/// Target environment for a specification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
}

impl EnvironmentConfig {
    /// Base URL assembled from scheme/host/port, if a host is set
    pub fn base_url(&self) -> Option<String> {
        let host = self.host.as_deref()?;
        let scheme = self.scheme.as_deref().unwrap_or("http");
        let port = match &self.port {
            Some(Value::Number(n)) => format!(":{}", n),
            Some(Value::String(s)) if !s.is_empty() => format!(":{}", s),
            _ => String::new(),
        };
        Some(format!("{}://{}{}", scheme, host, port))
    }
}

/// Where results for a specification should be written
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// A data row bound to a generated test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRow {
    pub index: usize,
    pub values: Map<String, Value>,
}

// ============================================================================
// Test case
// ============================================================================

/// A fully resolved, executable test case
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    /// Stable identifier derived from the source and data row
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: SpecMetadata,
    /// Protocol name, `None` until detected
    pub protocol: Option<String>,
    /// Protocol request payload
    pub request: Value,
    /// Assertion declarations, evaluated after the request
    #[serde(default)]
    pub assertions: Vec<Value>,
    /// Extraction map: variable name to expression
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extract: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentConfig>,
    /// Resolved variables, re-applied at execution time
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_row: Option<DataRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    /// Directory that relative includes resolve against
    #[serde(default)]
    pub base_dir: PathBuf,
}

impl TestCase {
    /// Protocol name or `"unknown"` for grouping and display
    pub fn protocol_name(&self) -> &str {
        self.protocol.as_deref().unwrap_or("unknown")
    }
}

// ============================================================================
// Response envelope
// ============================================================================

/// Output of a runner for one test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    /// Protocol status; 0 when the request never completed
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Value,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseEnvelope {
    pub fn new(status: u16, headers: BTreeMap<String, String>, body: Value, duration_ms: u64) -> Self {
        Self {
            status,
            headers,
            body,
            duration_ms,
            error: None,
        }
    }

    /// Sentinel envelope for a request that failed before a response arrived
    pub fn failure(error: impl ToString, duration_ms: u64) -> Self {
        let message = error.to_string();
        Self {
            status: 0,
            headers: BTreeMap::new(),
            body: serde_json::json!({ "error": message }),
            duration_ms,
            error: Some(message),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Canonical view: envelope fields plus body fields flattened to the top
    /// level. Envelope fields win over same-named body fields and the nested
    /// body stays reachable under `body`.
    pub fn canonical(&self) -> Value {
        let mut root = Map::new();
        root.insert("status".to_string(), Value::from(self.status));
        root.insert("statusCode".to_string(), Value::from(self.status));
        let headers: Map<String, Value> = self
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), Value::String(v.clone())))
            .collect();
        root.insert("headers".to_string(), Value::Object(headers));
        root.insert("body".to_string(), self.body.clone());
        root.insert("duration".to_string(), Value::from(self.duration_ms));
        if let Some(error) = &self.error {
            root.insert("error".to_string(), Value::String(error.clone()));
        }

        if let Value::Object(fields) = &self.body {
            for (key, value) in fields {
                if !RESERVED_ENVELOPE_KEYS.contains(&key.as_str()) {
                    root.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }

        Value::Object(root)
    }
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of one assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionResult {
    pub passed: bool,
    #[serde(rename = "type")]
    pub assertion_type: String,
    pub operator: String,
    #[serde(default)]
    pub expected: Value,
    #[serde(default)]
    pub actual: Value,
    pub message: String,
}

/// Pass/fail tally; `pass_rate` is 0 when `total` is 0
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f64,
}

/// Summary over a list of assertion results
pub type AssertionSummary = Summary;

impl Summary {
    pub fn tally(outcomes: impl IntoIterator<Item = bool>) -> Self {
        let mut total = 0;
        let mut passed = 0;
        for ok in outcomes {
            total += 1;
            if ok {
                passed += 1;
            }
        }
        let pass_rate = if total == 0 {
            0.0
        } else {
            passed as f64 / total as f64
        };
        Self {
            total,
            passed,
            failed: total - passed,
            pass_rate,
        }
    }

    /// True when nothing failed, including the empty case
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Result of executing one test case
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub id: String,
    pub description: String,
    pub protocol: Option<String>,
    pub passed: bool,
    pub assertions: Vec<AssertionResult>,
    pub summary: AssertionSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseEnvelope>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extracted: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_row_index: Option<usize>,
}

impl TestResult {
    /// Terminal failed result carrying one synthetic assertion for `error`
    pub fn failed(case: &TestCase, error: impl ToString, duration_ms: u64) -> Self {
        let message = error.to_string();
        let assertions = vec![AssertionResult {
            passed: false,
            assertion_type: "execution".to_string(),
            operator: "error".to_string(),
            expected: Value::Null,
            actual: Value::Null,
            message: message.clone(),
        }];
        Self {
            id: case.id.clone(),
            description: case.description.clone(),
            protocol: case.protocol.clone(),
            passed: false,
            summary: Summary::tally(assertions.iter().map(|a| a.passed)),
            assertions,
            response: None,
            duration_ms,
            error: Some(message),
            extracted: Map::new(),
            data_row_index: case.data_row.as_ref().map(|r| r.index),
        }
    }
}

/// Result of a scheduled batch; `results` follows input order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResult {
    pub results: Vec<TestResult>,
    pub duration_ms: u64,
    pub summary: Summary,
}

impl ScheduleResult {
    pub fn from_results(results: Vec<TestResult>, duration_ms: u64) -> Self {
        let summary = Summary::tally(results.iter().map(|r| r.passed));
        Self {
            results,
            duration_ms,
            summary,
        }
    }
}
