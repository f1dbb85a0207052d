//! OPA-compatible policy evaluator
//!
//! Queries the Data API: `POST {url}/v1/data/{path}` with `{"input": ...}`,
//! answered by `{"result": ...}`. A response without `result` means the
//! rule is undefined for this input, which is an error rather than an
//! implicit decision.

use async_trait::async_trait;
use relay_core::config::PolicyConfig;
use relay_core::prelude::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

/// Data API request envelope
#[derive(Serialize)]
struct DataRequest<'a> {
    input: &'a RouteInput,
}

/// Data API response envelope
#[derive(Debug, Deserialize)]
struct DataResponse {
    #[serde(default)]
    result: Option<RouteOutput>,
}

/// Policy evaluator backed by an OPA server
pub struct OpaEvaluator {
    client: Client,
    endpoint: Url,
    query: String,
    max_error_body_bytes: usize,
}

impl OpaEvaluator {
    pub fn new(config: &PolicyConfig) -> Result<Self> {
        let path = query_path(&config.query)?;
        let base = config.url.trim_end_matches('/');
        let endpoint = if path.is_empty() {
            format!("{}/v1/data", base)
        } else {
            format!("{}/v1/data/{}", base, path)
        };
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| RelayError::config(format!("invalid policy URL {:?}: {}", endpoint, e)))?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RelayError::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            query: config.query.clone(),
            max_error_body_bytes: config.max_error_body_bytes,
        })
    }

    /// Data API URL the query resolves to
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Convert a dotted query (`data.route.allow`) into a Data API path (`route/allow`)
pub fn query_path(query: &str) -> Result<String> {
    let mut segments = query.split('.');
    if segments.next() != Some("data") {
        return Err(RelayError::config(format!(
            "policy query must start with \"data\", got {:?}",
            query
        )));
    }

    let rest: Vec<&str> = segments.collect();
    if rest.iter().any(|s| s.is_empty()) {
        return Err(RelayError::config(format!("malformed policy query {:?}", query)));
    }
    Ok(rest.join("/"))
}

#[async_trait]
impl PolicyEvaluator for OpaEvaluator {
    async fn evaluate(&self, input: &RouteInput) -> Result<RouteOutput> {
        let input_json = input.to_json().map_err(|e| RelayError::Serialization {
            message: format!("failed to encode policy input: {}", e),
            source: Some(Box::new(e)),
        })?;

        debug!(query = %self.query, endpoint = %self.endpoint, "Evaluating routing policy");

        let resp = self
            .client
            .post(self.endpoint.clone())
            .json(&DataRequest { input })
            .send()
            .await
            .map_err(|e| {
                let message = if e.is_timeout() {
                    "policy request timed out"
                } else {
                    "policy request failed"
                };
                RelayError::eval_with_source(message, input_json.clone(), e)
            })?;

        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| {
            RelayError::eval_with_source("failed to read policy response", input_json.clone(), e)
        })?;

        if !status.is_success() {
            let limit = body.len().min(self.max_error_body_bytes);
            let body = String::from_utf8_lossy(&body[..limit]);
            warn!(status = status.as_u16(), query = %self.query, "Policy server returned an error");
            return Err(RelayError::eval(
                format!("policy server returned {}: {}", status, body),
                input_json,
            ));
        }

        let response: DataResponse = serde_json::from_slice(&body).map_err(|e| {
            RelayError::eval_with_source("malformed policy response", input_json.clone(), e)
        })?;

        match response.result {
            Some(output) => {
                debug!(destinations = output.len(), "Policy decision received");
                Ok(output)
            }
            None => Err(RelayError::eval(
                format!("policy decision {} is undefined", self.query),
                input_json,
            )),
        }
    }

    fn name(&self) -> &'static str {
        "opa"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{GcsObject, GoogleCloudStorageEvent, S3Object};
    use serde_json::json;
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn input() -> RouteInput {
        let mut env = BTreeMap::new();
        env.insert("stage".to_string(), "test".to_string());
        RouteInput::new(
            SourceObject::GoogleCloudStorage(GoogleCloudStorageEvent::new(GcsObject::new(
                "src", "a.json",
            ))),
            env,
        )
    }

    fn evaluator(url: &str) -> OpaEvaluator {
        OpaEvaluator::new(&PolicyConfig {
            url: url.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_query_path() {
        assert_eq!(query_path("data.route").unwrap(), "route");
        assert_eq!(query_path("data.a.b").unwrap(), "a/b");
        assert_eq!(query_path("data").unwrap(), "");
        assert!(query_path("route").is_err());
        assert!(query_path("data..route").is_err());
    }

    #[test]
    fn test_endpoint() {
        let opa = evaluator("http://opa:8181/");
        assert_eq!(opa.endpoint().as_str(), "http://opa:8181/v1/data/route");
    }

    #[tokio::test]
    async fn test_evaluate_returns_destinations() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/data/route"))
            .and(body_partial_json(json!({
                "input": {"gcs": {"object": {"bucket": "src"}}, "env": {"stage": "test"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"s3": [{"region": "us-east-1", "bucket": "dst", "key": "a.json"}]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let output = evaluator(&server.uri()).evaluate(&input()).await.unwrap();
        assert_eq!(output.s3, vec![S3Object::new("us-east-1", "dst", "a.json")]);
        assert!(output.abs.is_empty());
    }

    #[tokio::test]
    async fn test_empty_result_is_a_decision() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {}})))
            .mount(&server)
            .await;

        let output = evaluator(&server.uri()).evaluate(&input()).await.unwrap();
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_undefined_decision_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        match evaluator(&server.uri()).evaluate(&input()).await {
            Err(RelayError::Eval { input, .. }) => assert!(input.contains("\"stage\":\"test\"")),
            other => panic!("Expected Eval error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_error_and_bad_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/data/route"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        assert!(matches!(
            evaluator(&server.uri()).evaluate(&input()).await,
            Err(RelayError::Eval { .. })
        ));

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;
        assert!(matches!(
            evaluator(&server.uri()).evaluate(&input()).await,
            Err(RelayError::Eval { .. })
        ));
    }

    #[tokio::test]
    async fn test_error_body_is_truncated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("x".repeat(10_000)))
            .mount(&server)
            .await;

        let opa = OpaEvaluator::new(&PolicyConfig {
            url: server.uri(),
            max_error_body_bytes: 16,
            ..Default::default()
        })
        .unwrap();

        match opa.evaluate(&input()).await {
            Err(RelayError::Eval { message, .. }) => {
                assert!(message.contains("503"));
                assert!(message.ends_with(&"x".repeat(16)));
                assert!(!message.contains(&"x".repeat(17)));
            }
            other => panic!("Expected Eval error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let opa = evaluator("http://127.0.0.1:1");
        assert!(matches!(
            opa.evaluate(&input()).await,
            Err(RelayError::Eval { .. })
        ));
    }
}
