//! # Relay Storage
//!
//! Storage backends for Blob Relay, built on the `object_store` crate.
//!
//! ## Backends
//!
//! - `AzureResolver`: Azure Blob Storage with service principal credentials
//! - `GcsResolver`: Google Cloud Storage (service account file or ADC)
//! - `S3Resolver`: Amazon S3 and S3-compatible endpoints
//! - `MemoryResolver`: in-memory stores for tests
//!
//! Every resolver plugs into [`ObjectStoreBackend`], which implements the
//! core `StorageBackend` trait. Writes go through [`UploadWriter`]: a
//! background task that owns the upload and reports its result on close.

pub mod backend;
pub mod cloud;
pub mod memory;
pub mod registry;
pub mod upload;

pub use backend::*;
pub use cloud::*;
pub use memory::*;
pub use registry::*;
pub use upload::*;
