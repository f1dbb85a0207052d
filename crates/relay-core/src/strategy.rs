//! Strategy Pattern Traits for Blob Relay
//!
//! The pipeline only talks to storage and policy through these traits, so
//! backends and evaluators can be swapped without touching the executor.
//!
//! ## Strategy Hierarchy
//!
//! ```text
//! StorageBackend (one per backend kind)
//!     ├── open_read  -> ByteStream
//!     └── open_write -> Box<dyn ObjectWriter>
//!                          ├── write  (accept bytes)
//!                          ├── close  (wait for upload, surface its error)
//!                          └── abort  (discard partial upload)
//!
//! PolicyEvaluator
//!     └── evaluate(RouteInput) -> RouteOutput
//! ```

use crate::error::Result;
use crate::route::{BackendKind, ObjectLocation, RouteInput, RouteOutput};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// Type alias for boxed async streams of object bytes
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

// ============================================================================
// Storage Strategies
// ============================================================================

/// Write session for a single destination object.
///
/// Bytes accepted by `write` may still be in flight; the object only exists
/// once `close` returns `Ok`. Dropping a writer without calling `close`
/// cancels the upload.
#[async_trait]
pub trait ObjectWriter: Send {
    /// Hand a chunk to the upload
    async fn write(&mut self, chunk: Bytes) -> Result<()>;

    /// Finish the upload and wait for the backend to confirm it.
    ///
    /// Returns the number of bytes committed.
    async fn close(self: Box<Self>) -> Result<u64>;

    /// Give up on the upload without committing anything
    async fn abort(self: Box<Self>);
}

/// Storage backend strategy - reads and writes objects of one kind
///
/// Implementations:
/// - `ObjectStoreBackend`: Azure Blob Storage, GCS, S3 via `object_store`
/// - In-memory stores for testing
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Backend kind this implementation serves
    fn kind(&self) -> BackendKind;

    /// Open a read stream for an object
    async fn open_read(&self, location: &ObjectLocation) -> Result<ByteStream>;

    /// Open a write session for an object
    async fn open_write(&self, location: &ObjectLocation) -> Result<Box<dyn ObjectWriter>>;
}

// ============================================================================
// Policy Strategies
// ============================================================================

/// Policy evaluator strategy - decides replication destinations
///
/// Implementations:
/// - `OpaEvaluator`: queries an OPA-compatible policy server over HTTP
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    /// Evaluate the routing policy.
    ///
    /// Any failure is an error; implementations never fall back to a
    /// default decision. An empty output means "replicate nowhere".
    async fn evaluate(&self, input: &RouteInput) -> Result<RouteOutput>;

    /// Name for logs and metrics
    fn name(&self) -> &'static str;
}
