//! Backend registry keyed by backend kind

use crate::backend::ObjectStoreBackend;
use crate::cloud::{AzureResolver, GcsResolver, S3Resolver};
use relay_core::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Configured storage backends, at most one per kind
#[derive(Clone, Default)]
pub struct StorageRegistry {
    backends: HashMap<BackendKind, Arc<dyn StorageBackend>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: register a backend, replacing any of the same kind
    pub fn with_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    /// Build the enabled cloud backends from configuration
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let mut registry = Self::new();

        if config.azure.enabled {
            let resolver = AzureResolver::from_config(&config.azure)?;
            registry = registry.with_backend(Arc::new(ObjectStoreBackend::new(resolver)));
        }
        if config.gcs.enabled {
            let resolver = GcsResolver::from_config(&config.gcs);
            registry = registry.with_backend(Arc::new(ObjectStoreBackend::new(resolver)));
        }
        if config.s3.enabled {
            let resolver = S3Resolver::new(config.s3.clone());
            registry = registry.with_backend(Arc::new(ObjectStoreBackend::new(resolver)));
        }

        info!(backends = ?registry.kinds(), "Storage backends configured");
        Ok(registry)
    }

    /// Backend for `kind`, if configured
    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn StorageBackend>> {
        self.backends.get(&kind).cloned()
    }

    /// Configured kinds in a stable order
    pub fn kinds(&self) -> Vec<BackendKind> {
        let mut kinds: Vec<_> = self.backends.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
