//! Cloud store resolvers: Azure Blob Storage, Google Cloud Storage, Amazon S3
//!
//! Stores are built lazily per container/bucket and cached, so repeated
//! events for the same bucket share one HTTP client.

use crate::backend::{object_path, wrong_kind, StoreResolver};
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path;
use object_store::ObjectStore;
use relay_core::config::{AzureConfig, GcsConfig, S3Config};
use relay_core::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Cache of built stores keyed by container or bucket
#[derive(Default)]
struct StoreCache {
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl StoreCache {
    fn get_or_build<F>(&self, key: String, build: F) -> Result<Arc<dyn ObjectStore>>
    where
        F: FnOnce() -> Result<Arc<dyn ObjectStore>>,
    {
        let mut stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(store) = stores.get(&key) {
            return Ok(store.clone());
        }
        let store = build()?;
        info!(store = %key, "Object store client created");
        stores.insert(key, store.clone());
        Ok(store)
    }
}

fn build_error(kind: BackendKind, e: object_store::Error) -> RelayError {
    RelayError::storage_with_source(format!("failed to build {} client", kind), e)
}

// ============================================================================
// Azure Blob Storage
// ============================================================================

/// Azure Blob Storage with service principal (client secret) credentials
pub struct AzureResolver {
    tenant_id: String,
    client_id: String,
    client_secret: String,
    cache: StoreCache,
}

impl AzureResolver {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cache: StoreCache::default(),
        }
    }

    /// Build from configuration; all three credentials are required
    pub fn from_config(config: &AzureConfig) -> Result<Self> {
        let require = |value: &Option<String>, name: &str| {
            value
                .clone()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| RelayError::config(format!("azure.{} is required", name)))
        };
        Ok(Self::new(
            require(&config.tenant_id, "tenant_id")?,
            require(&config.client_id, "client_id")?,
            require(&config.client_secret, "client_secret")?,
        ))
    }
}

impl StoreResolver for AzureResolver {
    fn kind(&self) -> BackendKind {
        BackendKind::AzureBlobStorage
    }

    fn resolve(&self, location: &ObjectLocation) -> Result<(Arc<dyn ObjectStore>, Path)> {
        let ObjectLocation::Azure(object) = location else {
            return Err(wrong_kind(self.kind(), location));
        };

        let key = format!("{}/{}", object.storage_account, object.container);
        let store = self.cache.get_or_build(key, || {
            let store = MicrosoftAzureBuilder::new()
                .with_account(&object.storage_account)
                .with_container_name(&object.container)
                .with_client_secret_authorization(
                    &self.client_id,
                    &self.client_secret,
                    &self.tenant_id,
                )
                .build()
                .map_err(|e| build_error(self.kind(), e))?;
            Ok(Arc::new(store) as Arc<dyn ObjectStore>)
        })?;

        Ok((store, object_path(&object.blob_name)?))
    }
}

// ============================================================================
// Google Cloud Storage
// ============================================================================

/// Google Cloud Storage with a service account file or default credentials
pub struct GcsResolver {
    credential_file: Option<String>,
    cache: StoreCache,
}

impl GcsResolver {
    pub fn new(credential_file: Option<String>) -> Self {
        Self {
            credential_file,
            cache: StoreCache::default(),
        }
    }

    pub fn from_config(config: &GcsConfig) -> Self {
        Self::new(config.credential_file.clone())
    }
}

impl StoreResolver for GcsResolver {
    fn kind(&self) -> BackendKind {
        BackendKind::GoogleCloudStorage
    }

    fn resolve(&self, location: &ObjectLocation) -> Result<(Arc<dyn ObjectStore>, Path)> {
        let ObjectLocation::Gcs(object) = location else {
            return Err(wrong_kind(self.kind(), location));
        };

        let store = self.cache.get_or_build(object.bucket.clone(), || {
            let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(&object.bucket);
            if let Some(ref path) = self.credential_file {
                builder = builder.with_service_account_path(path);
            }
            let store = builder.build().map_err(|e| build_error(self.kind(), e))?;
            Ok(Arc::new(store) as Arc<dyn ObjectStore>)
        })?;

        Ok((store, object_path(&object.name)?))
    }
}

// ============================================================================
// Amazon S3
// ============================================================================

/// Amazon S3 or an S3-compatible endpoint
pub struct S3Resolver {
    config: S3Config,
    cache: StoreCache,
}

impl S3Resolver {
    pub fn new(config: S3Config) -> Self {
        Self {
            config,
            cache: StoreCache::default(),
        }
    }
}

impl StoreResolver for S3Resolver {
    fn kind(&self) -> BackendKind {
        BackendKind::AmazonS3
    }

    fn resolve(&self, location: &ObjectLocation) -> Result<(Arc<dyn ObjectStore>, Path)> {
        let ObjectLocation::S3(object) = location else {
            return Err(wrong_kind(self.kind(), location));
        };

        let key = format!("{}/{}", object.region, object.bucket);
        let store = self.cache.get_or_build(key, || {
            let mut builder = AmazonS3Builder::from_env()
                .with_region(&object.region)
                .with_bucket_name(&object.bucket)
                .with_allow_http(self.config.allow_http);
            if let Some(ref endpoint) = self.config.endpoint {
                builder = builder.with_endpoint(endpoint);
            }
            if let (Some(key_id), Some(secret)) =
                (&self.config.access_key_id, &self.config.secret_access_key)
            {
                builder = builder
                    .with_access_key_id(key_id)
                    .with_secret_access_key(secret);
            }
            let store = builder.build().map_err(|e| build_error(self.kind(), e))?;
            Ok(Arc::new(store) as Arc<dyn ObjectStore>)
        })?;

        Ok((store, object_path(&object.key)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{AzureBlobObject, GcsObject};

    #[test]
    fn test_azure_from_config_requires_credentials() {
        let mut config = AzureConfig {
            enabled: true,
            tenant_id: Some("tenant".to_string()),
            client_id: Some("client".to_string()),
            client_secret: None,
        };
        assert!(matches!(
            AzureResolver::from_config(&config),
            Err(RelayError::Configuration { .. })
        ));

        config.client_secret = Some("secret".to_string());
        assert!(AzureResolver::from_config(&config).is_ok());
    }

    #[test]
    fn test_resolvers_reject_other_kinds() {
        let gcs_location = ObjectLocation::Gcs(GcsObject::new("bucket", "key"));
        let azure = AzureResolver::new("t", "c", "s");
        assert!(matches!(
            azure.resolve(&gcs_location),
            Err(RelayError::Storage { .. })
        ));

        let azure_location = ObjectLocation::Azure(AzureBlobObject::new("acct", "c", "key"));
        let s3 = S3Resolver::new(S3Config::default());
        assert!(s3.resolve(&azure_location).is_err());
    }

    #[test]
    fn test_azure_store_is_cached_per_container() {
        let azure = AzureResolver::new("tenant", "client", "secret");
        let a = ObjectLocation::Azure(AzureBlobObject::new("acct", "logs", "a/b.json"));
        let b = ObjectLocation::Azure(AzureBlobObject::new("acct", "logs", "c.json"));

        let (store_a, path_a) = azure.resolve(&a).unwrap();
        let (store_b, _) = azure.resolve(&b).unwrap();
        assert!(Arc::ptr_eq(&store_a, &store_b));
        assert_eq!(path_a.as_ref(), "a/b.json");
    }
}
