//! Replication executor
//!
//! Copies a source object to every destination chosen by the policy.
//! Destinations run one after another; the first failure stops the run.

use futures::StreamExt;
use relay_core::prelude::*;
use relay_core::{LatencyTimer, RelayMetrics};
use relay_storage::StorageRegistry;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bytes written per destination, in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BytesCopiedReport {
    pub destinations: Vec<(ObjectLocation, u64)>,
    pub total_bytes: u64,
}

impl BytesCopiedReport {
    fn push(&mut self, destination: ObjectLocation, bytes: u64) {
        self.total_bytes += bytes;
        self.destinations.push((destination, bytes));
    }
}

/// Streams objects between storage backends
pub struct Replicator {
    storage: StorageRegistry,
    metrics: RelayMetrics,
}

impl Replicator {
    pub fn new(storage: StorageRegistry) -> Self {
        Self {
            storage,
            metrics: RelayMetrics::new("replicator"),
        }
    }

    pub fn storage(&self) -> &StorageRegistry {
        &self.storage
    }

    /// Copy `source` to every destination in `output`.
    ///
    /// Order is `abs`, `gcs`, `s3`, each list as returned by the policy.
    pub async fn replicate(
        &self,
        source: &SourceObject,
        output: &RouteOutput,
    ) -> Result<BytesCopiedReport> {
        let metrics = self.metrics.clone();
        let _timer = LatencyTimer::start(move |d| metrics.record_replication_latency(d));

        let source_location = source.location();
        let mut report = BytesCopiedReport::default();

        for destination in output.destinations() {
            let backend = destination.kind().as_str();
            match self.copy_one(source, &source_location, &destination).await {
                Ok(bytes) => {
                    self.metrics.record_replication(backend, "success", bytes);
                    info!(
                        source = %source_location,
                        destination = %destination,
                        bytes,
                        "Object replicated"
                    );
                    report.push(destination, bytes);
                }
                Err(e) => {
                    self.metrics.record_replication(backend, "failure", 0);
                    warn!(
                        source = %source_location,
                        destination = %destination,
                        error = %e,
                        "Replication failed; skipping remaining destinations"
                    );
                    return Err(e.into_replication(&destination));
                }
            }
        }

        Ok(report)
    }

    async fn copy_one(
        &self,
        source: &SourceObject,
        source_location: &ObjectLocation,
        destination: &ObjectLocation,
    ) -> Result<u64> {
        let reader_backend = self
            .storage
            .get(source.kind())
            .ok_or(RelayError::UnsupportedSource { kind: source.kind() })?;
        let writer_backend = self.storage.get(destination.kind()).ok_or_else(|| {
            RelayError::replication(
                format!("no {} backend configured", destination.kind()),
                destination.clone(),
            )
        })?;

        copy_object(reader_backend, writer_backend, source_location, destination).await
    }
}

/// Stream one object from `reader_backend` to `writer_backend`.
///
/// A failed copy aborts the writer so nothing partial is committed.
pub async fn copy_object(
    reader_backend: Arc<dyn StorageBackend>,
    writer_backend: Arc<dyn StorageBackend>,
    source: &ObjectLocation,
    destination: &ObjectLocation,
) -> Result<u64> {
    let mut reader = reader_backend.open_read(source).await?;
    let mut writer = writer_backend.open_write(destination).await?;

    let mut read = 0u64;
    let mut copied = Ok(());
    while let Some(chunk) = reader.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                copied = Err(e);
                break;
            }
        };
        read += chunk.len() as u64;
        if let Err(e) = writer.write(chunk).await {
            copied = Err(e);
            break;
        }
    }
    drop(reader);

    if let Err(e) = copied {
        writer.abort().await;
        return Err(e);
    }

    let written = writer.close().await?;
    if written != read {
        return Err(RelayError::storage(format!(
            "wrote {} bytes but read {}",
            written, read
        )));
    }

    debug!(source = %source, destination = %destination, bytes = written, "Copy complete");
    Ok(written)
}
