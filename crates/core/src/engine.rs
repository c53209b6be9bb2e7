//! Engine operations: list, validate, parse and run specification files

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::EngineConfig;
use crate::data;
use crate::error::{Error, Result};
use crate::registry::{PluginCatalog, PluginMetadata, ProtocolRegistry, Transport};
use crate::report;
use crate::scheduler::{ScheduleOptions, Scheduler};
use crate::spec::{RawSpec, DATA_ROW_INDEX_KEY, DATA_ROW_KEY};
use crate::suite;
use crate::template;
use crate::types::{DataRow, EnvironmentConfig, OutputConfig, ScheduleResult, SpecMetadata, TestCase};
use crate::validate::{self, ValidationResult};
use crate::variables::{substitute, unresolved, VariableContext};

/// Filename endings recognised when walking directories
pub const SPEC_SUFFIXES: &[&str] = &[
    ".tspec",
    ".tspec.yaml",
    ".tspec.yml",
    ".tsuite",
    ".tsuite.yaml",
    ".tsuite.yml",
];

/// Variables supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Highest-precedence layer
    pub params: Map<String, Value>,
    /// Environment layer, overriding spec `variables`
    pub env: Map<String, Value>,
}

/// Overrides for a run; unset fields fall back to [`EngineConfig`]
#[derive(Clone, Default)]
pub struct RunOptions {
    pub parse: ParseOptions,
    pub concurrency: Option<usize>,
    pub concurrency_per_type: Option<usize>,
    pub timeout: Option<Duration>,
    pub transport: Option<Arc<dyn Transport>>,
}

/// A file that could not be loaded or parsed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileError {
    pub file: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub cases: Vec<TestCase>,
    pub errors: Vec<FileError>,
}

/// Result of `run_files`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    #[serde(flatten)]
    pub result: ScheduleResult,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FileError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reports: Vec<PathBuf>,
}

impl RunOutcome {
    /// 0 all passed, 1 some failed, 2 operational error
    pub fn exit_code(&self) -> i32 {
        if !self.errors.is_empty() {
            2
        } else if self.result.summary.failed > 0 {
            1
        } else {
            0
        }
    }
}

/// True for filenames ending in a spec or suite suffix
pub fn is_spec_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| {
            let n = n.to_ascii_lowercase();
            SPEC_SUFFIXES.iter().any(|suffix| n.ends_with(suffix))
        })
        .unwrap_or(false)
}

/// Expand inputs into spec files. Directories are walked recursively in
/// name order; files are taken as given.
pub fn list_files(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() && is_spec_file(entry.path()) {
                    files.push(entry.path().to_path_buf());
                }
            }
        } else {
            files.push(input.clone());
        }
    }
    debug!("Found {} spec file(s)", files.len());
    files
}

/// The engine facade used by the CLI
pub struct Engine {
    registry: Arc<ProtocolRegistry>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(registry: Arc<ProtocolRegistry>, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    /// Engine over the built-in protocols
    pub fn with_builtins(config: EngineConfig) -> Self {
        Self::new(Arc::new(ProtocolRegistry::with_builtins()), config)
    }

    pub fn registry(&self) -> &Arc<ProtocolRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Load the plugins named in the configuration from `catalog`
    pub fn load_plugins(&self, catalog: &PluginCatalog) -> Result<Vec<PluginMetadata>> {
        self.registry
            .load_plugins(&self.config.plugins, &self.config.plugin_options, catalog)
    }

    pub fn list_files(&self, inputs: &[PathBuf]) -> Vec<PathBuf> {
        list_files(inputs)
    }

    pub fn validate_files(&self, files: &[PathBuf]) -> Vec<ValidationResult> {
        files
            .iter()
            .map(|file| {
                let result = validate::validate_file(file, &self.registry);
                if !result.valid {
                    warn!("{} is invalid: {}", file.display(), result.errors.join("; "));
                }
                result
            })
            .collect()
    }

    /// Parse files into test cases. A failing file is reported and skipped.
    pub fn parse_files(&self, files: &[PathBuf], options: &ParseOptions) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();
        for file in files {
            match self.parse_file(file, options) {
                Ok(cases) => outcome.cases.extend(cases),
                Err(e) => {
                    warn!("Skipping {}: {}", file.display(), e);
                    outcome.errors.push(FileError {
                        file: file.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        info!(
            "Parsed {} test case(s) from {} file(s)",
            outcome.cases.len(),
            files.len() - outcome.errors.len()
        );
        outcome
    }

    /// Parse one spec or suite file
    pub fn parse_file(&self, path: &Path, options: &ParseOptions) -> Result<Vec<TestCase>> {
        debug!("Parsing {}", path.display());
        let spec = RawSpec::from_file(path)?;
        let base_dir = spec.base_dir();
        let spec = template::resolve(spec, &base_dir)?;
        let hint = self.registry.protocol_from_path(path);

        if suite::is_suite(&spec) {
            let mut cases = Vec::new();
            for entry in suite::expand(&spec)? {
                let entry_hint = entry
                    .spec
                    .path()
                    .filter(|p| *p != path)
                    .and_then(|p| self.registry.protocol_from_path(p))
                    .or_else(|| hint.clone());
                cases.extend(self.parse_spec(entry.spec, &entry.id, entry_hint.as_deref(), options)?);
            }
            return Ok(cases);
        }

        self.parse_spec(spec, &suite::stem(path), hint.as_deref(), options)
    }

    /// Turn a template-resolved spec into test cases, one per data row
    pub fn parse_spec(
        &self,
        spec: RawSpec,
        id: &str,
        protocol_hint: Option<&str>,
        options: &ParseOptions,
    ) -> Result<Vec<TestCase>> {
        let label = spec.path().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(id));
        let base_dir = spec.base_dir();

        let mut environment = Map::new();
        if let Some(Value::Object(vars)) = spec.get("variables") {
            environment.extend(vars.clone());
        }
        if let Some(Value::Object(vars)) = spec.get("environment").and_then(|e| e.get("variables")) {
            environment.extend(vars.clone());
        }
        environment.extend(options.env.clone());

        let seed = VariableContext::new()
            .with_params(options.params.clone())
            .with_environment(environment.clone());
        let environment: Map<String, Value> = environment
            .iter()
            .map(|(k, v)| (k.clone(), substitute(v, &seed)))
            .collect();

        let ctx = VariableContext::new()
            .with_params(options.params.clone())
            .with_environment(environment.clone());
        let generated = data::generate(&spec, &base_dir, &ctx)?;

        generated
            .into_iter()
            .map(|row_spec| build_case(row_spec, id, protocol_hint, &environment, &label, &base_dir))
            .collect()
    }

    /// Schedule already-parsed cases
    pub async fn run_cases(&self, cases: Vec<TestCase>, options: &RunOptions) -> ScheduleResult {
        let scheduler = Scheduler::new(self.registry.clone());
        scheduler.schedule(cases, &self.schedule_options(options)).await
    }

    /// Parse and run files, writing any per-spec `output` reports
    pub async fn run_files(&self, files: &[PathBuf], options: &RunOptions) -> RunOutcome {
        let ParseOutcome { cases, mut errors } = self.parse_files(files, &options.parse);

        let mut outputs: BTreeMap<PathBuf, (OutputConfig, Vec<usize>)> = BTreeMap::new();
        for (idx, case) in cases.iter().enumerate() {
            if let Some(output) = case.output.as_ref().filter(|o| o.path.is_some()) {
                let key = output.path.clone().unwrap_or_default();
                outputs.entry(key).or_insert_with(|| (output.clone(), Vec::new())).1.push(idx);
            }
        }

        let result = self.run_cases(cases, options).await;

        let mut reports = Vec::new();
        for (path, (output, indices)) in outputs {
            let subset = indices.iter().map(|i| result.results[*i].clone()).collect();
            let partial = ScheduleResult::from_results(subset, result.duration_ms);
            match report::write(&partial, &output) {
                Ok(Some(written)) => reports.push(written),
                Ok(None) => {}
                Err(e) => errors.push(FileError {
                    file: path,
                    error: e.to_string(),
                }),
            }
        }

        RunOutcome { result, errors, reports }
    }

    fn schedule_options(&self, options: &RunOptions) -> ScheduleOptions {
        let mut schedule = self.config.schedule_options();
        if let Some(n) = options.concurrency {
            schedule.concurrency = n;
        }
        if let Some(n) = options.concurrency_per_type {
            schedule.concurrency_per_type = n;
        }
        if let Some(timeout) = options.timeout {
            schedule.runner_options.timeout = timeout;
        }
        schedule.runner_options.transport = options.transport.clone();
        schedule.params = options.parse.params.clone();
        schedule
    }
}

fn build_case(
    spec: RawSpec,
    id: &str,
    protocol_hint: Option<&str>,
    environment: &Map<String, Value>,
    label: &Path,
    base_dir: &Path,
) -> Result<TestCase> {
    let blocks: Vec<String> = spec.protocol_blocks().into_iter().map(str::to_string).collect();
    let protocol = match (protocol_hint, blocks.as_slice()) {
        (Some(hint), _) if blocks.iter().any(|b| b == hint) => hint.to_string(),
        (_, [only]) => only.clone(),
        (_, []) => return Err(Error::load(label, "no protocol request block")),
        (_, many) => {
            return Err(Error::load(
                label,
                format!("multiple protocol request blocks: {}", many.join(", ")),
            ))
        }
    };
    if let Some(hint) = protocol_hint.filter(|h| *h != protocol) {
        warn!("{}: filename suggests {} but the request block is {}", label.display(), hint, protocol);
    }

    let data_row = spec
        .get(DATA_ROW_INDEX_KEY)
        .and_then(Value::as_u64)
        .map(|index| DataRow {
            index: index as usize,
            values: spec
                .get(DATA_ROW_KEY)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        });
    let case_id = match &data_row {
        Some(row) => format!("{}[{}]", id, row.index),
        None => id.to_string(),
    };

    let request = spec.request(&protocol).cloned().unwrap_or(Value::Null);
    let pending = unresolved(&request);
    if !pending.is_empty() {
        debug!("{}: placeholders left for execution time: {}", case_id, pending.join(", "));
    }

    let assertions = match spec.get("assertions") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(_) => return Err(Error::load(label, "assertions must be a list")),
    };
    let extract = match spec.get("extract") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err(Error::load(label, "extract must be a mapping")),
    };

    let mut variables = environment.clone();
    if let Some(row) = &data_row {
        variables.extend(row.values.clone());
    }

    Ok(TestCase {
        description: spec
            .get_str("description")
            .map(str::to_string)
            .unwrap_or_else(|| case_id.clone()),
        id: case_id,
        metadata: section::<SpecMetadata>(&spec, "metadata", label)?.unwrap_or_default(),
        protocol: Some(protocol),
        request,
        assertions,
        extract,
        output: section(&spec, "output", label)?,
        lifecycle: spec.get("lifecycle").filter(|v| !v.is_null()).cloned(),
        environment: section::<EnvironmentConfig>(&spec, "environment", label)?,
        variables,
        data_row,
        source: spec.path().map(Path::to_path_buf),
        base_dir: base_dir.to_path_buf(),
    })
}

fn section<T: serde::de::DeserializeOwned>(spec: &RawSpec, key: &str, label: &Path) -> Result<Option<T>> {
    match spec.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| Error::load(label, format!("invalid {}: {}", key, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn engine() -> Engine {
        Engine::with_builtins(EngineConfig::default())
    }

    #[test]
    fn test_list_files_walks_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.http.tspec"), "").unwrap();
        fs::write(dir.path().join("nested/a.grpc.tsuite"), "").unwrap();
        fs::write(dir.path().join("notes.md"), "").unwrap();
        fs::write(dir.path().join("base.tsuite.yaml"), "").unwrap();

        let files = list_files(&[dir.path().to_path_buf()]);
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["b.http.tspec", "base.tsuite.yaml", "a.grpc.tsuite"]);
    }

    #[test]
    fn test_parse_single_spec() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("login.http.tspec");
        fs::write(
            &path,
            r#"
description: login
variables: { user: alice, greeting: "hi ${user}" }
environment: { host: api.test, port: 8080 }
metadata: { priority: high, timeout: 500 }
http:
  method: POST
  path: /login
  json: { user: "${user}", token: "${token}" }
assertions:
  - { type: status, expected: 200 }
extract:
  session: "$.session"
"#,
        )
        .unwrap();

        let cases = engine().parse_file(&path, &ParseOptions::default()).unwrap();
        assert_eq!(cases.len(), 1);
        let case = &cases[0];
        assert_eq!(case.id, "login");
        assert_eq!(case.protocol.as_deref(), Some("http"));
        assert_eq!(case.request["json"]["user"], json!("alice"));
        assert_eq!(case.request["json"]["token"], json!("${token}"));
        assert_eq!(case.variables["greeting"], json!("hi alice"));
        assert_eq!(case.environment.as_ref().unwrap().base_url().as_deref(), Some("http://api.test:8080"));
        assert_eq!(case.metadata.priority.as_deref(), Some("high"));
        assert_eq!(case.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_params_and_env_precedence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.http.tspec");
        fs::write(&path, "variables: { a: spec, b: spec }\nhttp: { path: \"/${a}/${b}\" }\n").unwrap();

        let options = ParseOptions {
            params: json!({ "a": "param" }).as_object().unwrap().clone(),
            env: json!({ "a": "env", "b": "env" }).as_object().unwrap().clone(),
        };
        let cases = engine().parse_file(&path, &options).unwrap();
        assert_eq!(cases[0].request["path"], json!("/param/env"));
    }

    #[test]
    fn test_data_rows_get_indexed_ids() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("users.csv"), "name,code\nann,200\nbo,404\n").unwrap();
        let path = dir.path().join("users.http.tspec");
        fs::write(
            &path,
            "data: { source: ./users.csv }\nhttp: { path: \"/users/${name}\" }\nassertions:\n  - { type: status, operator: eq, expected: 200 }\n  - { type: json_path, expression: \"$.name\", expected: \"${name}\" }\n",
        )
        .unwrap();

        let cases = engine().parse_file(&path, &ParseOptions::default()).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].id, "users[0]");
        assert_eq!(cases[1].id, "users[1]");
        assert_eq!(cases[1].request["path"], json!("/users/bo"));
        assert_eq!(cases[1].data_row.as_ref().unwrap().values["name"], json!("bo"));
        assert_eq!(cases[1].variables["name"], json!("bo"));
        // CSV cells are strings
        assert_eq!(cases[1].data_row.as_ref().unwrap().values["code"], json!("404"));
        assert_eq!(cases[1].assertions[0]["expected"], json!(200));
        assert_eq!(cases[1].assertions[1]["expected"], json!("bo"));
    }

    #[test]
    fn test_protocol_block_errors() {
        let dir = TempDir::new().unwrap();
        let none = dir.path().join("none.tspec");
        fs::write(&none, "description: nothing\n").unwrap();
        let both = dir.path().join("both.tspec");
        fs::write(&both, "http: { path: / }\ngraphql: { query: \"{ a }\" }\n").unwrap();
        let hinted = dir.path().join("both.graphql.tspec");
        fs::write(&hinted, "http: { path: / }\ngraphql: { query: \"{ a }\" }\n").unwrap();

        let engine = engine();
        let outcome = engine.parse_files(&[none.clone(), both.clone(), hinted], &ParseOptions::default());
        assert_eq!(outcome.cases.len(), 1);
        assert_eq!(outcome.cases[0].protocol.as_deref(), Some("graphql"));
        assert_eq!(outcome.errors.len(), 2);
        assert_eq!(outcome.errors[0].file, none);
        assert!(outcome.errors[1].error.contains("multiple protocol request blocks"));
    }

    #[test]
    fn test_suite_ids() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("get.http.tspec"), "http: { path: /one }\n").unwrap();
        let path = dir.path().join("smoke.http.tsuite");
        fs::write(
            &path,
            "suite:\n  name: smoke\n  tests:\n    - file: ./get.http.tspec\n    - name: two\n      http: { path: /two }\n",
        )
        .unwrap();

        let cases = engine().parse_file(&path, &ParseOptions::default()).unwrap();
        let ids: Vec<&str> = cases.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["smoke/get", "smoke/two"]);
    }

    #[test]
    fn test_exit_codes() {
        let mut outcome = RunOutcome {
            result: ScheduleResult::from_results(Vec::new(), 0),
            errors: Vec::new(),
            reports: Vec::new(),
        };
        assert_eq!(outcome.exit_code(), 0);
        outcome.result.summary.failed = 1;
        assert_eq!(outcome.exit_code(), 1);
        outcome.errors.push(FileError {
            file: PathBuf::from("x"),
            error: "boom".to_string(),
        });
        assert_eq!(outcome.exit_code(), 2);
    }
}
