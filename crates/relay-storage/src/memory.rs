//! In-memory stores for testing and local runs

use crate::backend::{object_path, wrong_kind, ObjectStoreBackend, StoreResolver};
use bytes::Bytes;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::ObjectStore;
use relay_core::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Resolver handing out one `InMemory` store per container or bucket
#[derive(Clone)]
pub struct MemoryResolver {
    kind: BackendKind,
    stores: Arc<Mutex<HashMap<String, Arc<InMemory>>>>,
}

impl MemoryResolver {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            stores: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn store_for(&self, location: &ObjectLocation) -> Result<(Arc<InMemory>, Path)> {
        if location.kind() != self.kind {
            return Err(wrong_kind(self.kind, location));
        }

        let key = match location {
            ObjectLocation::Azure(o) => format!("{}/{}", o.storage_account, o.container),
            ObjectLocation::Gcs(o) => o.bucket.clone(),
            ObjectLocation::S3(o) => format!("{}/{}", o.region, o.bucket),
        };

        let mut stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
        let store = stores
            .entry(key)
            .or_insert_with(|| Arc::new(InMemory::new()))
            .clone();
        Ok((store, object_path(location.key())?))
    }

    /// Seed an object
    pub async fn put_object(&self, location: &ObjectLocation, data: impl Into<Bytes>) -> Result<()> {
        let (store, path) = self.store_for(location)?;
        let data: Bytes = data.into();
        store
            .put(&path, data.into())
            .await
            .map_err(|e| RelayError::storage_with_source(format!("failed to seed {}", location), e))?;
        Ok(())
    }

    /// Read an object back; `None` when it does not exist
    pub async fn get_object(&self, location: &ObjectLocation) -> Result<Option<Bytes>> {
        let (store, path) = self.store_for(location)?;
        let result = match store.get(&path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => {
                return Err(RelayError::storage_with_source(
                    format!("failed to open {}", location),
                    e,
                ))
            }
        };
        let data = result
            .bytes()
            .await
            .map_err(|e| RelayError::storage_with_source(format!("failed reading {}", location), e))?;
        Ok(Some(data))
    }
}

impl StoreResolver for MemoryResolver {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn resolve(&self, location: &ObjectLocation) -> Result<(Arc<dyn ObjectStore>, Path)> {
        let (store, path) = self.store_for(location)?;
        Ok((store as Arc<dyn ObjectStore>, path))
    }
}

/// Storage backend over in-memory stores
pub type MemoryBackend = ObjectStoreBackend<MemoryResolver>;

impl MemoryBackend {
    /// Empty in-memory backend of the given kind
    pub fn in_memory(kind: BackendKind) -> Self {
        ObjectStoreBackend::new(MemoryResolver::new(kind))
    }
}
