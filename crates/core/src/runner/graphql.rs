//! GraphQL-over-HTTP runner

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::http::dispatch;
use super::{base_url, case_timeout, join_url};
use crate::error::{Error, Result};
use crate::registry::{RunnerOptions, TestRunner};
use crate::types::{ResponseEnvelope, TestCase};
use crate::variables::stringify;

const DEFAULT_ENDPOINT: &str = "/graphql";

/// POSTs `{query, variables, operationName}` to the endpoint named by
/// `url`, `endpoint` or `path` (default `/graphql`)
pub struct GraphqlRunner {
    client: reqwest::Client,
    options: RunnerOptions,
}

impl GraphqlRunner {
    pub fn new(options: &RunnerOptions) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(options.timeout).build()?;
        Ok(Self {
            client,
            options: options.clone(),
        })
    }
}

/// Request payload sent over the wire
pub fn graphql_payload(request: &Map<String, Value>) -> Value {
    let mut payload = json!({
        "query": request.get("query").cloned().unwrap_or(Value::Null),
        "variables": request.get("variables").cloned().unwrap_or_else(|| json!({})),
    });
    if let Some(name) = request.get("operationName").or_else(|| request.get("operation_name")) {
        payload["operationName"] = name.clone();
    }
    payload
}

#[async_trait]
impl TestRunner for GraphqlRunner {
    fn protocol(&self) -> &str {
        "graphql"
    }

    async fn execute(&self, case: &TestCase) -> Result<ResponseEnvelope> {
        let request = case
            .request
            .as_object()
            .ok_or_else(|| Error::Runner(format!("{}: graphql request must be a mapping", case.id)))?;

        let endpoint = request
            .get("url")
            .or_else(|| request.get("endpoint"))
            .or_else(|| request.get("path"))
            .map(stringify)
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let Some(url) = join_url(base_url(case, &self.options).as_deref(), &endpoint) else {
            return Ok(ResponseEnvelope::failure(
                format!("no base URL configured for graphql endpoint '{}'", endpoint),
                0,
            ));
        };

        let mut builder = self.client.post(&url);
        for (name, value) in &self.options.default_headers {
            builder = builder.header(name, value);
        }
        if let Some(headers) = request.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                builder = builder.header(name, stringify(value));
            }
        }

        let timeout = case_timeout(case, self.options.timeout);
        let builder = builder.json(&graphql_payload(request)).timeout(timeout);
        Ok(dispatch(builder, timeout).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let request = json!({
            "query": "query User($id: ID!) { user(id: $id) { name } }",
            "variables": { "id": "7" },
            "operationName": "User",
            "headers": { "authorization": "Bearer t" }
        });
        let payload = graphql_payload(request.as_object().unwrap());
        assert_eq!(payload["variables"], json!({ "id": "7" }));
        assert_eq!(payload["operationName"], json!("User"));
        assert!(payload.get("headers").is_none());
    }

    #[test]
    fn test_payload_defaults_variables() {
        let payload = graphql_payload(json!({ "query": "{ ping }" }).as_object().unwrap());
        assert_eq!(payload["variables"], json!({}));
        assert!(payload.get("operationName").is_none());
    }

    #[tokio::test]
    async fn test_missing_base_url() {
        let runner = GraphqlRunner::new(&RunnerOptions::default()).unwrap();
        let case: TestCase = serde_json::from_value(json!({
            "id": "gql",
            "protocol": "graphql",
            "request": { "query": "{ ping }" }
        }))
        .unwrap();
        let envelope = runner.execute(&case).await.unwrap();
        assert_eq!(envelope.status, 0);
        assert!(envelope.error.unwrap().contains("/graphql"));
    }
}
