//! End-to-end: files on disk through templates, data rows, includes,
//! lifecycle and assertions, with an in-process http runner

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use tspec_core::engine::{ParseOptions, RunOptions};
use tspec_core::{
    Engine, EngineConfig, Error, ProtocolRegistry, ResponseEnvelope, Result, RunnerOptions, TestCase, TestRunner,
};

/// Answers like a tiny user service
struct UserService;

#[async_trait]
impl TestRunner for UserService {
    fn protocol(&self) -> &str {
        "http"
    }

    async fn execute(&self, case: &TestCase) -> Result<ResponseEnvelope> {
        let request = &case.request;
        let path = request.get("path").and_then(Value::as_str).unwrap_or("/");
        let headers = BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())]);
        let envelope = match path.strip_prefix("/users/") {
            Some("missing") => ResponseEnvelope::new(404, headers, json!({ "error": "not found" }), 4),
            Some(name) => ResponseEnvelope::new(
                200,
                headers,
                json!({
                    "id": format!("u-{}", name),
                    "name": name,
                    "roles": ["reader"],
                    "auth": request.pointer("/headers/authorization").cloned().unwrap_or(Value::Null)
                }),
                7,
            ),
            None => ResponseEnvelope::new(201, headers, json!({ "token": "tok-1" }), 3),
        };
        Ok(envelope)
    }
}

fn engine() -> Engine {
    let registry = ProtocolRegistry::with_builtins();
    registry.register(
        "http",
        Arc::new(|_opts: &RunnerOptions| -> Result<Arc<dyn TestRunner>> { Ok(Arc::new(UserService)) }),
    );
    Engine::new(Arc::new(registry), EngineConfig::default())
}

fn write(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[tokio::test]
async fn data_driven_spec_with_template_and_includes() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "templates/base.yaml",
        r#"
variables: { role: reader }
http:
  method: GET
  headers: { accept: application/json }
assertions:
  - { type: header, name: content-type, operator: contains, expected: json }
"#,
    );
    write(
        dir.path(),
        "fragments/user-ok.yaml",
        r#"
variables: { status: 200 }
assertions:
  - { type: status, expected: "${status}" }
  - { type: json_path, expression: "$.roles", operator: contains, expected: "${role}" }
"#,
    );
    write(dir.path(), "data/users.json", r#"[{ "name": "ann" }, { "name": "bob" }]"#);
    write(
        dir.path(),
        "get-user.http.tspec",
        r#"
extends: ./templates/base.yaml
description: fetch user
data: { source: ./data/users.json }
http:
  path: /users/${name}
assertions:
  - include: ./fragments/user-ok.yaml
    role: reader
  - { type: json_path, expression: "$.id", expected: "u-${name}" }
  - { type: duration, expected: 1000 }
"#,
    );

    let engine = engine();
    let files = engine.list_files(&[dir.path().to_path_buf()]);
    let outcome = engine.run_files(&files, &RunOptions::default()).await;

    assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
    let ids: Vec<&str> = outcome.result.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["get-user[0]", "get-user[1]"]);
    for r in &outcome.result.results {
        assert!(r.passed, "{}: {:?}", r.id, r.assertions);
        assert_eq!(r.assertions.len(), 5);
    }
    assert_eq!(outcome.result.results[1].data_row_index, Some(1));
    assert_eq!(outcome.exit_code(), 0);
}

#[tokio::test]
async fn lifecycle_and_extraction_feed_later_cases() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "flow.http.tsuite",
        r#"
suite:
  name: flow
  tests:
    - name: login
      http: { method: POST, path: /login }
      extract:
        token: "$.token"
      assertions:
        - { type: status, expected: 201 }
    - name: profile
      lifecycle:
        setup:
          - { action: set, name: bearer, value: "Bearer ${token}" }
        teardown:
          - { action: extract, name: userId, expression: "$.id", scope: assert }
      http:
        path: /users/ann
        headers: { authorization: "${bearer}" }
      assertions:
        - { type: json_path, expression: "$.auth", expected: "Bearer tok-1" }
        - { type: json_path, expression: "$.id", expected: "${userId}" }
"#,
    );

    let engine = engine();
    let options = RunOptions {
        concurrency: Some(1),
        ..Default::default()
    };
    let outcome = engine.run_files(&[dir.path().join("flow.http.tsuite")], &options).await;

    let results = &outcome.result.results;
    assert_eq!(results.len(), 2);
    assert!(results[0].passed, "{:?}", results[0].assertions);
    assert!(results[1].passed, "{:?}", results[1].assertions);
    assert_eq!(results[1].extracted.get("userId"), Some(&json!("u-ann")));
}

#[tokio::test]
async fn failures_and_bad_files_set_exit_codes() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "missing.http.tspec",
        "http: { path: /users/missing }\nassertions:\n  - { type: status, expected: 200 }\n",
    );
    let engine = engine();

    let failed = engine
        .run_files(&[dir.path().join("missing.http.tspec")], &RunOptions::default())
        .await;
    assert_eq!(failed.result.summary.failed, 1);
    assert_eq!(failed.exit_code(), 1);

    write(dir.path(), "broken.http.tspec", "http: [not, a, mapping\n");
    let broken = engine
        .run_files(
            &[dir.path().join("missing.http.tspec"), dir.path().join("broken.http.tspec")],
            &RunOptions::default(),
        )
        .await;
    assert_eq!(broken.result.results.len(), 1);
    assert_eq!(broken.errors.len(), 1);
    assert_eq!(broken.exit_code(), 2);
}

#[tokio::test]
async fn unknown_operator_fails_the_case() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "op.http.tspec",
        "http: { path: /users/ann }\nassertions:\n  - { type: status, operator: approximately, expected: 200 }\n",
    );
    let outcome = engine()
        .run_files(&[dir.path().join("op.http.tspec")], &RunOptions::default())
        .await;
    let result = &outcome.result.results[0];
    assert!(!result.passed);
    assert!(result.error.as_deref().unwrap().contains("approximately"));
}

#[test]
fn circular_templates_are_reported() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.http.tspec", "extends: ./b.http.tspec\nhttp: { path: / }\n");
    write(dir.path(), "b.http.tspec", "extends: ./c.http.tspec\n");
    write(dir.path(), "c.http.tspec", "extends: ./a.http.tspec\n");

    let err = engine()
        .parse_file(&dir.path().join("a.http.tspec"), &ParseOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::CircularTemplate { .. }));
}

#[tokio::test]
async fn per_spec_output_reports_are_written() {
    let dir = TempDir::new().unwrap();
    let report = dir.path().join("reports/user.json");
    write(
        dir.path(),
        "user.http.tspec",
        &format!(
            "output: {{ path: '{}' }}\nhttp: {{ path: /users/ann }}\nassertions:\n  - {{ type: status, expected: 200 }}\n",
            report.display()
        ),
    );
    let outcome = engine()
        .run_files(&[dir.path().join("user.http.tspec")], &RunOptions::default())
        .await;
    assert_eq!(outcome.reports, vec![report.clone()]);

    let written: Value = serde_json::from_str(&fs::read_to_string(report).unwrap()).unwrap();
    assert_eq!(written["summary"]["passed"], json!(1));
}

#[test]
fn validation_collects_messages() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "good.http.tspec", "http: { method: GET, path: / }\n");
    write(dir.path(), "bad.http.tspec", "assertions: nope\n");

    let engine = engine();
    let results = engine.validate_files(&[dir.path().join("good.http.tspec"), dir.path().join("bad.http.tspec")]);
    assert!(results[0].valid);
    assert!(!results[1].valid);
    assert_eq!(results[1].errors.len(), 2);
}
