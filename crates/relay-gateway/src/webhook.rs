//! Event Grid webhook validation
//!
//! Event Grid proves that an endpoint wants its events with a handshake:
//! the endpoint must call a callback URL issued by Event Grid. Since the
//! callback URL comes from the request, it is checked against the Event
//! Grid domain before anything is sent to it.

use relay_core::config::WebhookConfig;
use relay_core::prelude::*;
use relay_core::ValidationResponse;
use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

/// Header carrying the CloudEvents handshake origin
pub const ORIGIN_HEADER: &str = "webhook-request-origin";

/// Header carrying the CloudEvents handshake callback URL
pub const CALLBACK_HEADER: &str = "webhook-request-callback";

/// Header announcing the Event Grid event type
pub const EVENT_TYPE_HEADER: &str = "aeg-event-type";

/// Webhook handshake validator
pub struct WebhookValidator {
    client: Client,
    config: WebhookConfig,
}

impl WebhookValidator {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.callback_timeout)
            .build()
            .map_err(|e| RelayError::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Check that a callback URL points at Event Grid over https.
    ///
    /// Runs before any network call; anything unexpected is rejected.
    pub fn check_callback_url(&self, callback_url: &str) -> Result<Url> {
        let rejected = |message: String| RelayError::Auth {
            message,
            callback_url: Some(callback_url.to_string()),
            status: None,
            body: None,
            source: None,
        };

        let url = Url::parse(callback_url)
            .map_err(|e| rejected(format!("callback URL is not a valid URL: {}", e)))?;

        if url.scheme() != "https" {
            return Err(rejected(format!(
                "callback URL scheme must be https, got {}",
                url.scheme()
            )));
        }

        let host = url.host_str().unwrap_or_default();
        if !host.ends_with(&self.config.validation_domain_suffix) {
            return Err(rejected(format!(
                "callback host {:?} is not under {}",
                host, self.config.validation_domain_suffix
            )));
        }

        Ok(url)
    }

    /// Complete a subscription handshake by calling the callback URL
    pub async fn validate_subscription(&self, callback_url: &str) -> Result<()> {
        let url = self.check_callback_url(callback_url)?;
        self.confirm(url).await?;
        info!(callback_url, "Event Grid subscription validated");
        Ok(())
    }

    /// POST to an already checked callback URL; only 2xx counts
    pub(crate) async fn confirm(&self, url: Url) -> Result<()> {
        let callback_url = url.to_string();
        debug!(callback_url = %callback_url, "Calling validation callback");

        let resp = self.client.post(url).send().await.map_err(|e| RelayError::Auth {
            message: "validation callback request failed".to_string(),
            callback_url: Some(callback_url.clone()),
            status: None,
            body: None,
            source: Some(Box::new(e)),
        })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = resp.bytes().await.unwrap_or_default();
        let limit = body.len().min(self.config.max_error_body_bytes);
        let body = String::from_utf8_lossy(&body[..limit]).into_owned();

        warn!(callback_url = %callback_url, status = status.as_u16(), body = %body, "Validation callback rejected");
        Err(RelayError::Auth {
            message: format!("validation callback returned {}", status),
            callback_url: Some(callback_url),
            status: Some(status.as_u16()),
            body: Some(body),
            source: None,
        })
    }

    /// Compare the handshake origin header with the expected identity
    pub fn authenticate_origin(&self, origin: Option<&str>) -> bool {
        origin == Some(self.config.expected_origin.as_str())
    }

    /// Handle an Event Grid schema `SubscriptionValidation` delivery.
    ///
    /// Events with a `validationUrl` are confirmed through the callback.
    /// When an event only carries a `validationCode`, the code is echoed
    /// back synchronously and returned here.
    pub async fn handle_validation_events(
        &self,
        events: &[ValidationEvent],
    ) -> Result<Option<ValidationResponse>> {
        if events.is_empty() {
            return Err(RelayError::auth("subscription validation carried no events"));
        }

        let mut response = None;
        for event in events {
            match (&event.data.validation_url, &event.data.validation_code) {
                (Some(url), _) => self.validate_subscription(url).await?,
                (None, Some(code)) => {
                    if response.is_none() {
                        info!(event_id = %event.id, "Echoing Event Grid validation code");
                        response = Some(ValidationResponse {
                            validation_response: code.clone(),
                        });
                    }
                }
                (None, None) => {
                    return Err(RelayError::auth(
                        "validation event has neither validationUrl nor validationCode",
                    ))
                }
            }
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::ValidationData;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn validator() -> WebhookValidator {
        WebhookValidator::new(WebhookConfig::default()).unwrap()
    }

    #[test]
    fn test_callback_url_checks() {
        let v = validator();

        assert!(v
            .check_callback_url("https://rp-foo.eventgrid.azure.net/eventsubscriptions/x/validate?id=1")
            .is_ok());
        assert!(v
            .check_callback_url("https://rp-japaneast.eventgrid.azure.net:553/validate")
            .is_ok());

        let rejected = [
            "http://rp-foo.eventgrid.azure.net/validate",
            "https://evil.example.com/validate",
            "https://eventgrid.azure.net.evil.example.com/validate",
            "not a url",
            "",
        ];
        for url in rejected {
            match v.check_callback_url(url) {
                Err(RelayError::Auth { callback_url, .. }) => {
                    assert_eq!(callback_url.as_deref(), Some(url))
                }
                other => panic!("{url} should be rejected, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_rejected_url_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        // Plain http on a local address fails the scheme/host check
        let result = validator()
            .validate_subscription(&format!("{}/validate", server.uri()))
            .await;
        assert!(matches!(result, Err(RelayError::Auth { .. })));
    }

    #[tokio::test]
    async fn test_confirm_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/validate"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/validate", server.uri())).unwrap();
        validator().confirm(url).await.unwrap();
    }

    #[tokio::test]
    async fn test_confirm_failure_carries_status_and_truncated_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("x".repeat(4096)))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/validate", server.uri())).unwrap();
        match validator().confirm(url).await {
            Err(RelayError::Auth {
                status,
                body,
                callback_url,
                ..
            }) => {
                assert_eq!(status, Some(403));
                assert_eq!(body.map(|b| b.len()), Some(1024));
                assert!(callback_url.unwrap().ends_with("/validate"));
            }
            other => panic!("Expected Auth error, got {other:?}"),
        }
    }

    #[test]
    fn test_authenticate_origin() {
        let v = validator();
        assert!(v.authenticate_origin(Some("eventgrid.azure.net")));
        assert!(!v.authenticate_origin(Some("example.com")));
        assert!(!v.authenticate_origin(None));
    }

    #[tokio::test]
    async fn test_validation_code_is_echoed() {
        let events = vec![ValidationEvent {
            id: "1".to_string(),
            data: ValidationData {
                validation_code: Some("code-123".to_string()),
                validation_url: None,
            },
        }];

        let response = validator().handle_validation_events(&events).await.unwrap();
        assert_eq!(response.unwrap().validation_response, "code-123");
    }

    #[tokio::test]
    async fn test_validation_url_must_be_event_grid() {
        let events = vec![ValidationEvent {
            id: "1".to_string(),
            data: ValidationData {
                validation_code: Some("code".to_string()),
                validation_url: Some("https://evil.example.com/validate".to_string()),
            },
        }];

        assert!(validator().handle_validation_events(&events).await.is_err());
        assert!(validator().handle_validation_events(&[]).await.is_err());
    }
}
