//! Configuration types for Blob Relay
//!
//! Uses the `config` crate for layered configuration from files and environment.

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Root configuration for the relay
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Webhook handshake configuration
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Policy evaluator configuration
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Azure Blob Storage backend
    #[serde(default)]
    pub azure: AzureConfig,

    /// Google Cloud Storage backend
    #[serde(default)]
    pub gcs: GcsConfig,

    /// Amazon S3 backend
    #[serde(default)]
    pub s3: S3Config,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ============================================================================
// Server Configuration
// ============================================================================

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen: String,

    /// Deadline for handling one delivery, replication included
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(300)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Webhook handshake configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Host suffix a validation callback URL must end with
    #[serde(default = "default_validation_domain_suffix")]
    pub validation_domain_suffix: String,

    /// Expected `WebHook-Request-Origin` header value
    #[serde(default = "default_expected_origin")]
    pub expected_origin: String,

    /// Timeout for the validation callback request
    #[serde(with = "humantime_serde", default = "default_callback_timeout")]
    pub callback_timeout: Duration,

    /// Callback response bytes kept for diagnostics
    #[serde(default = "default_max_error_body_bytes")]
    pub max_error_body_bytes: usize,

    /// Require the origin header on POST deliveries too
    #[serde(default)]
    pub enforce_origin_on_delivery: bool,
}

fn default_validation_domain_suffix() -> String {
    ".eventgrid.azure.net".to_string()
}

fn default_expected_origin() -> String {
    "eventgrid.azure.net".to_string()
}

fn default_callback_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_error_body_bytes() -> usize {
    1024
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            validation_domain_suffix: default_validation_domain_suffix(),
            expected_origin: default_expected_origin(),
            callback_timeout: default_callback_timeout(),
            max_error_body_bytes: default_max_error_body_bytes(),
            enforce_origin_on_delivery: false,
        }
    }
}

// ============================================================================
// Policy Configuration
// ============================================================================

/// Policy evaluator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Base URL of the OPA-compatible policy server
    #[serde(default = "default_policy_url")]
    pub url: String,

    /// Dotted query path, e.g. `data.route`
    #[serde(default = "default_policy_query")]
    pub query: String,

    /// Request timeout
    #[serde(with = "humantime_serde", default = "default_policy_timeout")]
    pub timeout: Duration,

    /// Values passed to the policy as `input.env`
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Bytes of an error response body kept in the error
    #[serde(default = "default_max_error_body_bytes")]
    pub max_error_body_bytes: usize,
}

fn default_policy_url() -> String {
    "http://localhost:8181".to_string()
}

fn default_policy_query() -> String {
    "data.route".to_string()
}

fn default_policy_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            url: default_policy_url(),
            query: default_policy_query(),
            timeout: default_policy_timeout(),
            env: BTreeMap::new(),
            max_error_body_bytes: default_max_error_body_bytes(),
        }
    }
}

// ============================================================================
// Backend Configurations
// ============================================================================

/// Azure Blob Storage configuration (service principal)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AzureConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

impl AzureConfig {
    fn has_credentials(&self) -> bool {
        self.tenant_id.is_some() || self.client_id.is_some() || self.client_secret.is_some()
    }
}

/// Google Cloud Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GcsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Service account JSON file; application default credentials when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_file: Option<String>,
}

/// Amazon S3 configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default)]
    pub enabled: bool,

    /// Custom endpoint for S3-compatible stores
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Static credentials; the default AWS provider chain when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,

    /// Allow plain HTTP endpoints
    #[serde(default)]
    pub allow_http: bool,
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log output: "stdout", "stderr", or a file path
    #[serde(default = "default_log_output")]
    pub log_output: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_log_output() -> String {
    "stdout".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            log_output: default_log_output(),
        }
    }
}

// ============================================================================
// Configuration Loading
// ============================================================================

impl RelayConfig {
    /// Load configuration from file and environment
    pub fn load(path: Option<&str>) -> std::result::Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default values
        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        // Add config file if specified
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment variables: BLOB_RELAY_<SECTION>__<KEY>
        builder = builder.add_source(
            config::Environment::with_prefix("BLOB_RELAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Check settings that serde cannot express
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.policy.url)
            .map_err(|e| RelayError::config(format!("invalid policy.url {:?}: {}", self.policy.url, e)))?;

        if !self.policy.query.starts_with("data.") && self.policy.query != "data" {
            return Err(RelayError::config(format!(
                "policy.query must start with \"data\", got {:?}",
                self.policy.query
            )));
        }

        if self.azure.enabled {
            if self.azure.tenant_id.as_deref().unwrap_or_default().is_empty() {
                return Err(RelayError::config("azure.tenant_id is required"));
            }
            if self.azure.client_id.as_deref().unwrap_or_default().is_empty() {
                return Err(RelayError::config("azure.client_id is required"));
            }
            if self.azure.client_secret.as_deref().unwrap_or_default().is_empty() {
                return Err(RelayError::config("azure.client_secret is required"));
            }
        } else if self.azure.has_credentials() {
            tracing::warn!("Azure configuration is ignored because Azure is disabled");
        }

        if !self.gcs.enabled && self.gcs.credential_file.is_some() {
            tracing::warn!("GCS configuration is ignored because GCS is disabled");
        }

        if !self.s3.enabled && (self.s3.endpoint.is_some() || self.s3.access_key_id.is_some()) {
            tracing::warn!("S3 configuration is ignored because S3 is disabled");
        }

        if self.s3.access_key_id.is_some() != self.s3.secret_access_key.is_some() {
            return Err(RelayError::config(
                "s3.access_key_id and s3.secret_access_key must be set together",
            ));
        }

        if !matches!(self.observability.log_format.as_str(), "json" | "pretty") {
            return Err(RelayError::config(format!(
                "invalid log format {:?}",
                self.observability.log_format
            )));
        }

        Ok(())
    }
}
