//! Route types exchanged with the policy evaluator
//!
//! A [`RouteInput`] describes the object that changed; a [`RouteOutput`]
//! lists where it should be copied. Field names are part of the policy
//! contract and must not change.

use crate::message::CloudEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Storage backend kinds understood by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "abs")]
    AzureBlobStorage,
    #[serde(rename = "gcs")]
    GoogleCloudStorage,
    #[serde(rename = "s3")]
    AmazonS3,
}

impl BackendKind {
    /// Key used in policy documents and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AzureBlobStorage => "abs",
            Self::GoogleCloudStorage => "gcs",
            Self::AmazonS3 => "s3",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Backend coordinates
// ============================================================================

/// Azure Blob Storage coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureBlobObject {
    pub storage_account: String,
    pub container: String,
    pub blob_name: String,
}

impl AzureBlobObject {
    pub fn new(
        storage_account: impl Into<String>,
        container: impl Into<String>,
        blob_name: impl Into<String>,
    ) -> Self {
        Self {
            storage_account: storage_account.into(),
            container: container.into(),
            blob_name: blob_name.into(),
        }
    }
}

/// Google Cloud Storage coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcsObject {
    pub bucket: String,
    pub name: String,
}

impl GcsObject {
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
        }
    }
}

/// Amazon S3 coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Object {
    pub region: String,
    pub bucket: String,
    pub key: String,
}

impl S3Object {
    pub fn new(region: impl Into<String>, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

/// Location of an object in exactly one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectLocation {
    #[serde(rename = "abs")]
    Azure(AzureBlobObject),
    #[serde(rename = "gcs")]
    Gcs(GcsObject),
    #[serde(rename = "s3")]
    S3(S3Object),
}

impl ObjectLocation {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Azure(_) => BackendKind::AzureBlobStorage,
            Self::Gcs(_) => BackendKind::GoogleCloudStorage,
            Self::S3(_) => BackendKind::AmazonS3,
        }
    }

    /// Object key within its container or bucket
    pub fn key(&self) -> &str {
        match self {
            Self::Azure(o) => &o.blob_name,
            Self::Gcs(o) => &o.name,
            Self::S3(o) => &o.key,
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Azure(o) => write!(f, "abs://{}/{}/{}", o.storage_account, o.container, o.blob_name),
            Self::Gcs(o) => write!(f, "gs://{}/{}", o.bucket, o.name),
            Self::S3(o) => write!(f, "s3://{}/{} ({})", o.bucket, o.key, o.region),
        }
    }
}

// ============================================================================
// Source objects
// ============================================================================

/// Changed Azure blob with the event that announced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureBlobStorageEvent {
    pub event: CloudEvent,
    pub object: AzureBlobSourceObject,
}

/// Azure blob coordinates plus the size and type declared by the event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureBlobSourceObject {
    #[serde(flatten)]
    pub location: AzureBlobObject,
    #[serde(rename = "contentLength")]
    pub content_length: i64,
    #[serde(rename = "contentType")]
    pub content_type: String,
}

/// Pub/Sub notification for a GCS change; carries no fields yet and is
/// serialized as `{}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GooglePubSubEvent {}

/// SNS notification for an S3 change; carries no fields yet and is
/// serialized as `{}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmazonSnsEvent {}

/// Changed GCS object with the event that announced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleCloudStorageEvent {
    #[serde(default)]
    pub event: GooglePubSubEvent,
    pub object: GcsObject,
}

impl GoogleCloudStorageEvent {
    pub fn new(object: GcsObject) -> Self {
        Self {
            event: GooglePubSubEvent::default(),
            object,
        }
    }
}

/// Changed S3 object with the event that announced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmazonS3Event {
    #[serde(default)]
    pub event: AmazonSnsEvent,
    pub object: S3Object,
}

impl AmazonS3Event {
    pub fn new(object: S3Object) -> Self {
        Self {
            event: AmazonSnsEvent::default(),
            object,
        }
    }
}

/// The object a change notification refers to.
///
/// Exactly one backend kind; serialized as a single `abs`, `gcs` or `s3` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SourceObject {
    #[serde(rename = "abs")]
    AzureBlobStorage(AzureBlobStorageEvent),
    #[serde(rename = "gcs")]
    GoogleCloudStorage(GoogleCloudStorageEvent),
    #[serde(rename = "s3")]
    AmazonS3(AmazonS3Event),
}

impl SourceObject {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::AzureBlobStorage(_) => BackendKind::AzureBlobStorage,
            Self::GoogleCloudStorage(_) => BackendKind::GoogleCloudStorage,
            Self::AmazonS3(_) => BackendKind::AmazonS3,
        }
    }

    /// Where to read the object from
    pub fn location(&self) -> ObjectLocation {
        match self {
            Self::AzureBlobStorage(ev) => ObjectLocation::Azure(ev.object.location.clone()),
            Self::GoogleCloudStorage(ev) => ObjectLocation::Gcs(ev.object.clone()),
            Self::AmazonS3(ev) => ObjectLocation::S3(ev.object.clone()),
        }
    }
}

// ============================================================================
// Policy input / output
// ============================================================================

/// Input document handed to the policy evaluator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteInput {
    #[serde(flatten)]
    source: SourceObject,
    env: BTreeMap<String, String>,
}

impl RouteInput {
    pub fn new(source: SourceObject, env: BTreeMap<String, String>) -> Self {
        Self { source, env }
    }

    pub fn source(&self) -> &SourceObject {
        &self.source
    }

    /// Deterministic JSON encoding used for the evaluator and error reports
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Destinations chosen by the policy, grouped by backend kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteOutput {
    #[serde(default)]
    pub abs: Vec<AzureBlobObject>,
    #[serde(default)]
    pub gcs: Vec<GcsObject>,
    #[serde(default)]
    pub s3: Vec<S3Object>,
}

impl RouteOutput {
    /// Number of destinations across all kinds
    pub fn len(&self) -> usize {
        self.abs.len() + self.gcs.len() + self.s3.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destinations in execution order: `abs`, then `gcs`, then `s3`,
    /// each in the order the policy returned them.
    pub fn destinations(&self) -> Vec<ObjectLocation> {
        self.abs
            .iter()
            .cloned()
            .map(ObjectLocation::Azure)
            .chain(self.gcs.iter().cloned().map(ObjectLocation::Gcs))
            .chain(self.s3.iter().cloned().map(ObjectLocation::S3))
            .collect()
    }
}
