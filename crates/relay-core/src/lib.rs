//! # Relay Core
//!
//! Core types, event normalization, and strategy traits for Blob Relay.
//!
//! Blob Relay receives storage change notifications, asks a policy where the
//! changed object should go, and streams it there. This crate holds the parts
//! that do not touch the network:
//! - The canonical event and route data model
//! - Normalization of provider payloads into a [`SourceObject`]
//! - The strategy traits implemented by storage backends and policy clients
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐     ┌────────────┐     ┌────────────┐     ┌────────────┐
//! │ Webhook  │────►│ Normalizer │────►│   Policy   │────►│ Replicator │
//! │Validator │     │            │     │ Evaluator  │     │            │
//! └──────────┘     └────────────┘     └────────────┘     └─────┬──────┘
//!                                                              │
//!                                                   ┌──────────┴──────────┐
//!                                                   │   StorageBackend    │
//!                                                   │   abs / gcs / s3    │
//!                                                   └─────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod message;
pub mod metrics;
pub mod normalize;
pub mod route;
pub mod strategy;

pub use config::*;
pub use error::*;
pub use message::*;
pub use metrics::*;
pub use normalize::*;
pub use route::*;
pub use strategy::*;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::RelayConfig;
    pub use crate::error::{RelayError, Result};
    pub use crate::message::{CloudEvent, ValidationEvent};
    pub use crate::route::{
        BackendKind, ObjectLocation, RouteInput, RouteOutput, SourceObject,
    };
    pub use crate::strategy::{ByteStream, ObjectWriter, PolicyEvaluator, StorageBackend};
}
