//! `StorageBackend` implementation over the `object_store` crate

use crate::upload::UploadWriter;
use async_trait::async_trait;
use futures::StreamExt;
use object_store::path::Path;
use object_store::ObjectStore;
use relay_core::prelude::*;
use std::sync::Arc;
use tracing::debug;

/// Maps an [`ObjectLocation`] to the store that holds it and the path inside.
///
/// One resolver per backend kind. Azure stores are scoped to an account and
/// container, GCS to a bucket, S3 to a region and bucket.
pub trait StoreResolver: Send + Sync {
    /// Backend kind this resolver serves
    fn kind(&self) -> BackendKind;

    /// Store and object path for `location`
    fn resolve(&self, location: &ObjectLocation) -> Result<(Arc<dyn ObjectStore>, Path)>;
}

/// Parse an object key into an `object_store` path.
///
/// Keys are passed through verbatim: a key the store would rewrite (leading
/// or trailing `/`, empty or relative segments) is rejected instead.
pub fn object_path(key: &str) -> Result<Path> {
    let path = Path::parse(key)
        .map_err(|e| RelayError::storage_with_source(format!("invalid object key {:?}", key), e))?;
    if path.as_ref() != key {
        return Err(RelayError::storage(format!(
            "object key {:?} would be stored as {:?}",
            key,
            path.as_ref()
        )));
    }
    Ok(path)
}

/// Error for a location handed to a backend of another kind
pub(crate) fn wrong_kind(kind: BackendKind, location: &ObjectLocation) -> RelayError {
    RelayError::storage(format!("{} backend cannot address {}", kind, location))
}

/// Storage backend backed by an `object_store` implementation
pub struct ObjectStoreBackend<R: StoreResolver> {
    resolver: R,
}

impl<R: StoreResolver> ObjectStoreBackend<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }
}

#[async_trait]
impl<R: StoreResolver + 'static> StorageBackend for ObjectStoreBackend<R> {
    fn kind(&self) -> BackendKind {
        self.resolver.kind()
    }

    async fn open_read(&self, location: &ObjectLocation) -> Result<ByteStream> {
        let (store, path) = self.resolver.resolve(location)?;
        debug!(location = %location, "Opening object for read");

        let result = store.get(&path).await.map_err(|e| {
            RelayError::storage_with_source(format!("failed to open {}", location), e)
        })?;

        let name = location.to_string();
        let stream = result.into_stream().map(move |chunk| {
            chunk.map_err(|e| RelayError::storage_with_source(format!("failed reading {}", name), e))
        });
        Ok(Box::pin(stream))
    }

    async fn open_write(&self, location: &ObjectLocation) -> Result<Box<dyn ObjectWriter>> {
        let (store, path) = self.resolver.resolve(location)?;
        debug!(location = %location, "Opening object for write");
        Ok(Box::new(UploadWriter::spawn(store, path, location.clone())))
    }
}
