//! HTTP runner

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde_json::{Map, Value};
use tracing::debug;

use super::{base_url, case_timeout, join_url};
use crate::error::{Error, Result};
use crate::registry::{RunnerOptions, TestRunner};
use crate::types::{ResponseEnvelope, TestCase};
use crate::variables::stringify;

/// Runs `http` requests of the shape
/// `{method, url|path, headers, query, json|form|body, timeout}`
pub struct HttpRunner {
    client: reqwest::Client,
    options: RunnerOptions,
}

impl HttpRunner {
    pub fn new(options: &RunnerOptions) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(options.timeout).build()?;
        Ok(Self {
            client,
            options: options.clone(),
        })
    }

    fn build(&self, case: &TestCase) -> std::result::Result<RequestBuilder, String> {
        let request = case.request.as_object().ok_or("http request must be a mapping")?;

        let method_name = request
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_ascii_uppercase();
        let method = Method::from_bytes(method_name.as_bytes()).map_err(|_| format!("invalid http method: {}", method_name))?;

        let path = request
            .get("url")
            .or_else(|| request.get("path"))
            .map(stringify)
            .unwrap_or_default();
        let base = base_url(case, &self.options);
        let url = join_url(base.as_deref(), &path)
            .ok_or_else(|| format!("no base URL configured for relative path '{}'", path))?;

        let mut builder = self.client.request(method, &url);
        for (name, value) in &self.options.default_headers {
            builder = builder.header(name, value);
        }
        if let Some(headers) = request.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                builder = builder.header(name, stringify(value));
            }
        }
        if let Some(query) = request.get("query").or_else(|| request.get("params")).and_then(Value::as_object) {
            builder = builder.query(&pairs(query));
        }

        if let Some(json) = request.get("json") {
            builder = builder.json(json);
        } else if let Some(form) = request.get("form").and_then(Value::as_object) {
            builder = builder.form(&pairs(form));
        } else if let Some(body) = request.get("body") {
            builder = match body {
                Value::Null => builder,
                Value::String(text) => builder.body(text.clone()),
                other => builder.json(other),
            };
        }

        Ok(builder.timeout(case_timeout(case, self.options.timeout)))
    }
}

#[async_trait]
impl TestRunner for HttpRunner {
    fn protocol(&self) -> &str {
        "http"
    }

    async fn execute(&self, case: &TestCase) -> Result<ResponseEnvelope> {
        if !case.request.is_object() {
            return Err(Error::Runner(format!("{}: http request must be a mapping", case.id)));
        }
        let builder = match self.build(case) {
            Ok(builder) => builder,
            Err(reason) => return Ok(ResponseEnvelope::failure(reason, 0)),
        };
        Ok(dispatch(builder, case_timeout(case, self.options.timeout)).await)
    }
}

fn pairs(map: &Map<String, Value>) -> Vec<(String, String)> {
    map.iter().map(|(k, v)| (k.clone(), stringify(v))).collect()
}

/// Send a request and convert the outcome into an envelope
pub(crate) async fn dispatch(builder: RequestBuilder, timeout: Duration) -> ResponseEnvelope {
    let start = Instant::now();
    let response = match builder.send().await {
        Ok(response) => response,
        Err(e) => return ResponseEnvelope::failure(describe(&e, timeout), elapsed_ms(start)),
    };

    let status = response.status().as_u16();
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in response.headers() {
        let value = value.to_str().unwrap_or_default();
        headers
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    let text = match response.text().await {
        Ok(text) => text,
        Err(e) => return ResponseEnvelope::failure(describe(&e, timeout), elapsed_ms(start)),
    };
    let duration_ms = elapsed_ms(start);
    debug!("HTTP {} in {}ms", status, duration_ms);

    ResponseEnvelope::new(status, headers, parse_body(&text), duration_ms)
}

/// JSON when the payload parses, the raw text otherwise
pub(crate) fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn describe(error: &reqwest::Error, timeout: Duration) -> String {
    if error.is_timeout() {
        format!("request timed out after {}ms", timeout.as_millis())
    } else if error.is_connect() {
        format!("connection failed: {}", error)
    } else {
        format!("request failed: {}", error)
    }
}

pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
