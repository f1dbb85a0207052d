//! # Relay Gateway
//!
//! HTTP front end of Blob Relay. Receives Azure Event Grid deliveries,
//! completes subscription handshakes, asks the routing policy where a new
//! blob should go, and streams it there.
//!
//! ## Features
//!
//! - CloudEvents (OPTIONS) and Event Grid schema handshakes
//! - OPA-compatible routing policy client
//! - Sequential, fail-fast replication across Azure, GCS and S3
//! - Health and stats endpoints
//!
//! ## Running
//!
//! ```bash
//! blob-relay --config relay.toml
//! BLOB_RELAY_POLICY__URL=http://opa:8181 blob-relay
//! ```

pub mod admin_api;
pub mod policy;
pub mod replicator;
pub mod server;
pub mod webhook;

pub use admin_api::*;
pub use policy::*;
pub use replicator::*;
pub use server::*;
pub use webhook::*;

use chrono::{DateTime, Utc};
use relay_core::prelude::*;
use relay_core::{
    decode_delivery, normalize, Delivery, ErrorContext, ErrorContextExt, RelayMetrics,
    ValidationResponse,
};
use relay_storage::StorageRegistry;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// What happened to a delivery that was handled successfully
#[derive(Debug)]
pub enum Outcome {
    /// Subscription handshake completed, with an optional code to echo
    Validated(Option<ValidationResponse>),
    /// Event type is not routed
    Ignored,
    /// Policy chose no destinations
    NoDestinations,
    /// Object copied to every destination
    Replicated(BytesCopiedReport),
}

/// Main relay orchestrator
pub struct Relay {
    config: RelayConfig,
    validator: WebhookValidator,
    evaluator: Arc<dyn PolicyEvaluator>,
    replicator: Replicator,
    metrics: RelayMetrics,
    started_at: DateTime<Utc>,
    received: AtomicU64,
    ignored: AtomicU64,
    replicated: AtomicU64,
    failed: AtomicU64,
    bytes_copied: AtomicU64,
}

impl Relay {
    /// Create a relay from explicit policy and storage strategies
    pub fn new(
        config: RelayConfig,
        evaluator: Arc<dyn PolicyEvaluator>,
        storage: StorageRegistry,
    ) -> Result<Self> {
        let validator = WebhookValidator::new(config.webhook.clone())?;

        Ok(Self {
            config,
            validator,
            evaluator,
            replicator: Replicator::new(storage),
            metrics: RelayMetrics::new("relay"),
            started_at: Utc::now(),
            received: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            replicated: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            bytes_copied: AtomicU64::new(0),
        })
    }

    /// Create a relay with the OPA evaluator and the configured cloud backends
    pub fn from_config(config: RelayConfig) -> Result<Self> {
        let evaluator = Arc::new(OpaEvaluator::new(&config.policy)?);
        let storage = StorageRegistry::from_config(&config)?;
        Self::new(config, evaluator, storage)
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn storage(&self) -> &StorageRegistry {
        self.replicator.storage()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// CloudEvents handshake: check the origin, then confirm the callback
    pub async fn handle_handshake(
        &self,
        origin: Option<&str>,
        callback_url: Option<&str>,
    ) -> Result<()> {
        let result = self.handshake(origin, callback_url).await;
        let status = if result.is_ok() { "success" } else { "failure" };
        self.metrics.record_validation(status);
        result.with_context(ErrorContext::new("relay", "handshake"))
    }

    async fn handshake(&self, origin: Option<&str>, callback_url: Option<&str>) -> Result<()> {
        if !self.validator.authenticate_origin(origin) {
            return Err(RelayError::auth(format!(
                "unexpected webhook origin {:?}",
                origin.unwrap_or_default()
            )));
        }
        let callback_url =
            callback_url.ok_or_else(|| RelayError::auth("missing webhook callback URL"))?;
        self.validator.validate_subscription(callback_url).await
    }

    /// Handle a POST delivery: a validation control message or a notification
    pub async fn handle_delivery(
        &self,
        event_type: Option<&str>,
        origin: Option<&str>,
        body: &[u8],
    ) -> Result<Outcome> {
        if self.config.webhook.enforce_origin_on_delivery
            && !self.validator.authenticate_origin(origin)
        {
            return Err(RelayError::auth("delivery origin rejected"));
        }

        match decode_delivery(event_type, body)? {
            Delivery::SubscriptionValidation(events) => {
                let result = self.validator.handle_validation_events(&events).await;
                let status = if result.is_ok() { "success" } else { "failure" };
                self.metrics.record_validation(status);
                let response =
                    result.with_context(ErrorContext::new("relay", "subscription_validation"))?;
                Ok(Outcome::Validated(response))
            }
            Delivery::Notification(event) => self.handle_cloud_event(event).await,
        }
    }

    /// Route a decoded change notification
    pub async fn handle_cloud_event(&self, event: CloudEvent) -> Result<Outcome> {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_received(&event.event_type);

        if !event.is_blob_created() {
            self.ignored.fetch_add(1, Ordering::Relaxed);
            self.metrics.record_ignored(&event.event_type);
            info!(event_id = %event.id, event_type = %event.event_type, "Ignoring unhandled event type");
            return Ok(Outcome::Ignored);
        }

        let ctx = ErrorContext::new("relay", "route").with_event(&event.id, &event.subject);
        let result = match normalize(&event) {
            Ok(source) => self.route(source).await,
            Err(e) => Err(e),
        };

        if let Err(ref e) = result {
            self.failed.fetch_add(1, Ordering::Relaxed);
            self.metrics.record_error(e.kind());
        }
        result.with_context(ctx)
    }

    /// Evaluate the policy for `source` and replicate to its destinations
    pub async fn route(&self, source: SourceObject) -> Result<Outcome> {
        let input = RouteInput::new(source, self.config.policy.env.clone());

        let started = Instant::now();
        let output = self.evaluator.evaluate(&input).await?;
        self.metrics.record_policy(started.elapsed(), output.len());

        if output.is_empty() {
            info!(
                source = %input.source().location(),
                evaluator = self.evaluator.name(),
                "Policy selected no destinations"
            );
            return Ok(Outcome::NoDestinations);
        }

        debug!(
            source = %input.source().location(),
            destinations = output.len(),
            "Replicating object"
        );
        let report = self.replicator.replicate(input.source(), &output).await?;

        self.replicated
            .fetch_add(report.destinations.len() as u64, Ordering::Relaxed);
        self.bytes_copied
            .fetch_add(report.total_bytes, Ordering::Relaxed);
        Ok(Outcome::Replicated(report))
    }

    /// Get statistics
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            received: self.received.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            replicated: self.replicated.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
        }
    }
}

/// Relay statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Change notifications received
    pub received: u64,
    /// Notifications acknowledged without routing
    pub ignored: u64,
    /// Destination copies completed
    pub replicated: u64,
    /// Notifications that failed after decoding
    pub failed: u64,
    pub bytes_copied: u64,
}
