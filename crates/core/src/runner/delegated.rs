//! Runner for protocols carried by an injected transport

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::warn;

use super::case_timeout;
use super::http::elapsed_ms;
use crate::error::Result;
use crate::registry::{RunnerOptions, TestRunner, Transport};
use crate::types::{ResponseEnvelope, TestCase};

/// gRPC and WebSocket runner. Requests go through the configured
/// [`Transport`]; transport errors and timeouts become failed envelopes.
pub struct DelegatedRunner {
    protocol: String,
    transport: Option<Arc<dyn Transport>>,
    options: RunnerOptions,
}

impl DelegatedRunner {
    pub fn new(protocol: &str, options: &RunnerOptions) -> Self {
        Self {
            protocol: protocol.to_string(),
            transport: options.transport.clone(),
            options: options.clone(),
        }
    }
}

#[async_trait]
impl TestRunner for DelegatedRunner {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    async fn execute(&self, case: &TestCase) -> Result<ResponseEnvelope> {
        let Some(transport) = &self.transport else {
            warn!("{}: no {} transport configured", case.id, self.protocol);
            return Ok(ResponseEnvelope::failure(
                format!("no transport configured for {}", self.protocol),
                0,
            ));
        };

        let timeout = case_timeout(case, self.options.timeout);
        let start = Instant::now();
        let outcome = tokio::time::timeout(timeout, transport.send(&self.protocol, &case.request, timeout)).await;
        Ok(match outcome {
            Ok(Ok(envelope)) => envelope,
            Ok(Err(e)) => ResponseEnvelope::failure(e, elapsed_ms(start)),
            Err(_) => ResponseEnvelope::failure(
                format!("request timed out after {}ms", timeout.as_millis()),
                elapsed_ms(start),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct FixedTransport;

    #[async_trait]
    impl Transport for FixedTransport {
        async fn send(&self, protocol: &str, request: &Value, _timeout: Duration) -> Result<ResponseEnvelope> {
            match request.get("method").and_then(Value::as_str) {
                Some("Slow") => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(ResponseEnvelope::new(0, BTreeMap::new(), Value::Null, 5000))
                }
                Some("Broken") => Err(Error::Runner("stream reset".to_string())),
                _ => Ok(ResponseEnvelope::new(
                    0,
                    BTreeMap::new(),
                    json!({ "protocol": protocol, "code": 0 }),
                    3,
                )),
            }
        }
    }

    fn grpc_case(method: &str) -> TestCase {
        serde_json::from_value(json!({
            "id": "grpc-case",
            "protocol": "grpc",
            "metadata": { "timeout": 50 },
            "request": { "service": "Users", "method": method }
        }))
        .unwrap()
    }

    fn runner() -> DelegatedRunner {
        let options = RunnerOptions {
            transport: Some(Arc::new(FixedTransport)),
            ..Default::default()
        };
        DelegatedRunner::new("grpc", &options)
    }

    #[tokio::test]
    async fn test_without_transport() {
        let runner = DelegatedRunner::new("websocket", &RunnerOptions::default());
        let envelope = runner.execute(&grpc_case("Get")).await.unwrap();
        assert_eq!(envelope.status, 0);
        assert_eq!(envelope.error.as_deref(), Some("no transport configured for websocket"));
    }

    #[tokio::test]
    async fn test_transport_response_passes_through() {
        let envelope = runner().execute(&grpc_case("Get")).await.unwrap();
        assert_eq!(envelope.body["protocol"], json!("grpc"));
        assert!(!envelope.is_failure());
    }

    #[tokio::test]
    async fn test_transport_error_and_timeout() {
        let broken = runner().execute(&grpc_case("Broken")).await.unwrap();
        assert!(broken.error.unwrap().contains("stream reset"));

        let slow = runner().execute(&grpc_case("Slow")).await.unwrap();
        assert_eq!(slow.error.as_deref(), Some("request timed out after 50ms"));
    }
}
