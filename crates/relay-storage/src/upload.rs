//! Background upload writer
//!
//! Bytes handed to [`UploadWriter::write`] go through a bounded channel to a
//! task that owns the actual upload. Small objects are sent with a single
//! PUT; once the buffered size reaches [`SINGLE_PUT_LIMIT`] the task switches
//! to a multipart upload. `close` waits for the task and returns its result,
//! so an upload failure is never lost. A multipart upload that never
//! completes is aborted on the store, including when the writer is dropped.

use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::Path;
use object_store::{MultipartUpload, ObjectStore, PutPayload};
use relay_core::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

/// Objects up to this size are uploaded with one request
pub const SINGLE_PUT_LIMIT: usize = 5 * 1024 * 1024;

/// Size of each multipart part except the last
const PART_SIZE: usize = SINGLE_PUT_LIMIT;

/// Chunks queued between the copy loop and the upload task
const CHANNEL_DEPTH: usize = 8;

/// Parts uploaded concurrently once multipart is in use
const MAX_CONCURRENT_PARTS: usize = 4;

/// Time a dropped writer's task gets to discard its upload
const ABANDON_GRACE: Duration = Duration::from_secs(10);

enum UploadMessage {
    Chunk(Bytes),
    Finish,
}

/// Writer that streams into an `object_store` upload
pub struct UploadWriter {
    location: ObjectLocation,
    tx: Option<mpsc::Sender<UploadMessage>>,
    done: Option<oneshot::Receiver<Result<u64>>>,
    task: Option<JoinHandle<()>>,
}

impl UploadWriter {
    /// Start the upload task for `path` in `store`
    pub fn spawn(store: Arc<dyn ObjectStore>, path: Path, location: ObjectLocation) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let (done_tx, done_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let result = run_upload(store, path, rx).await;
            let _ = done_tx.send(result);
        });

        Self {
            location,
            tx: Some(tx),
            done: Some(done_rx),
            task: Some(task),
        }
    }

    /// Result reported by the upload task, used when it stopped early
    async fn task_result(&mut self) -> Result<u64> {
        match self.done.take() {
            Some(rx) => rx
                .await
                .map_err(|_| RelayError::storage(format!("upload of {} was cancelled", self.location)))?,
            None => Err(RelayError::storage(format!(
                "upload of {} already finished",
                self.location
            ))),
        }
    }

    async fn send(&mut self, message: UploadMessage) -> Result<()> {
        let sent = match self.tx.as_ref() {
            Some(tx) => tx.send(message).await.is_ok(),
            None => false,
        };
        if sent {
            return Ok(());
        }

        // The task only stops listening after a failure
        self.tx = None;
        match self.task_result().await {
            Err(e) => Err(e),
            Ok(_) => Err(RelayError::storage(format!(
                "upload of {} stopped accepting data",
                self.location
            ))),
        }
    }
}

#[async_trait]
impl ObjectWriter for UploadWriter {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.send(UploadMessage::Chunk(chunk)).await
    }

    async fn close(mut self: Box<Self>) -> Result<u64> {
        self.send(UploadMessage::Finish).await?;
        self.tx = None;
        let written = self.task_result().await?;
        debug!(location = %self.location, bytes = written, "Upload committed");
        Ok(written)
    }

    async fn abort(mut self: Box<Self>) {
        // Closing the channel without Finish makes the task discard the upload
        self.tx = None;
        if let Err(e) = self.task_result().await {
            debug!(location = %self.location, error = %e, "Upload aborted");
        }
    }
}

impl Drop for UploadWriter {
    fn drop(&mut self) {
        let Some(mut task) = self.task.take() else {
            return;
        };
        if task.is_finished() {
            return;
        }

        // Closing the channel lets the task discard its upload; it is only
        // killed if that takes longer than the grace period.
        self.tx = None;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            task.abort();
            return;
        };
        let location = self.location.clone();
        runtime.spawn(async move {
            if tokio::time::timeout(ABANDON_GRACE, &mut task).await.is_err() {
                warn!(location = %location, "Abandoned upload did not stop in time");
                task.abort();
            }
        });
    }
}

async fn run_upload(
    store: Arc<dyn ObjectStore>,
    path: Path,
    mut rx: mpsc::Receiver<UploadMessage>,
) -> Result<u64> {
    let mut pending: Vec<Bytes> = Vec::new();
    let mut buffered = 0usize;

    loop {
        match rx.recv().await {
            Some(UploadMessage::Chunk(chunk)) => {
                buffered += chunk.len();
                pending.push(chunk);

                if buffered >= SINGLE_PUT_LIMIT {
                    let upload = store.put_multipart(&path).await.map_err(|e| {
                        RelayError::storage_with_source(
                            format!("failed to start multipart upload of {}", path),
                            e,
                        )
                    })?;
                    return run_multipart(upload, &path, pending, rx).await;
                }
            }
            Some(UploadMessage::Finish) => {
                let payload: PutPayload = pending.into_iter().collect();
                store.put(&path, payload).await.map_err(|e| {
                    RelayError::storage_with_source(format!("failed to write {}", path), e)
                })?;
                return Ok(buffered as u64);
            }
            None => return Err(abandoned(&path)),
        }
    }
}

/// Drive a multipart upload to completion, discarding it on any other outcome
async fn run_multipart(
    upload: Box<dyn MultipartUpload>,
    path: &Path,
    pending: Vec<Bytes>,
    mut rx: mpsc::Receiver<UploadMessage>,
) -> Result<u64> {
    let mut parts = PartUpload::new(upload);

    match parts.stream(pending, &mut rx).await {
        Ok(true) => Ok(parts.written),
        Ok(false) => {
            parts.discard(path).await;
            Err(abandoned(path))
        }
        Err(e) => {
            parts.discard(path).await;
            Err(RelayError::storage_with_source(
                format!("multipart upload of {} failed", path),
                e,
            ))
        }
    }
}

fn abandoned(path: &Path) -> RelayError {
    RelayError::storage(format!("upload of {} abandoned before completion", path))
}

/// Multipart upload with a bounded number of parts in flight
struct PartUpload {
    upload: Box<dyn MultipartUpload>,
    in_flight: JoinSet<object_store::Result<()>>,
    buffer: Vec<Bytes>,
    buffered: usize,
    written: u64,
}

impl PartUpload {
    fn new(upload: Box<dyn MultipartUpload>) -> Self {
        Self {
            upload,
            in_flight: JoinSet::new(),
            buffer: Vec::new(),
            buffered: 0,
            written: 0,
        }
    }

    /// Upload `pending` and then everything received; `Ok(false)` if the
    /// sender went away before `Finish`.
    async fn stream(
        &mut self,
        pending: Vec<Bytes>,
        rx: &mut mpsc::Receiver<UploadMessage>,
    ) -> object_store::Result<bool> {
        for chunk in pending {
            self.push(chunk).await?;
        }
        loop {
            match rx.recv().await {
                Some(UploadMessage::Chunk(chunk)) => self.push(chunk).await?,
                Some(UploadMessage::Finish) => {
                    self.complete().await?;
                    return Ok(true);
                }
                None => return Ok(false),
            }
        }
    }

    async fn push(&mut self, chunk: Bytes) -> object_store::Result<()> {
        self.written += chunk.len() as u64;
        self.buffered += chunk.len();
        self.buffer.push(chunk);
        if self.buffered >= PART_SIZE {
            self.flush_part().await?;
        }
        Ok(())
    }

    async fn flush_part(&mut self) -> object_store::Result<()> {
        while self.in_flight.len() >= MAX_CONCURRENT_PARTS {
            self.join_one().await?;
        }
        let payload: PutPayload = std::mem::take(&mut self.buffer).into_iter().collect();
        self.buffered = 0;
        self.in_flight.spawn(self.upload.put_part(payload));
        Ok(())
    }

    async fn join_one(&mut self) -> object_store::Result<()> {
        match self.in_flight.join_next().await {
            Some(Ok(result)) => result,
            Some(Err(e)) => Err(object_store::Error::Generic {
                store: "multipart",
                source: Box::new(e),
            }),
            None => Ok(()),
        }
    }

    async fn complete(&mut self) -> object_store::Result<()> {
        if !self.buffer.is_empty() {
            self.flush_part().await?;
        }
        while !self.in_flight.is_empty() {
            self.join_one().await?;
        }
        self.upload.complete().await?;
        Ok(())
    }

    async fn discard(mut self, path: &Path) {
        self.in_flight.shutdown().await;
        if let Err(e) = self.upload.abort().await {
            warn!(path = %path, error = %e, "Failed to abort multipart upload");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::BoxStream;
    use object_store::memory::InMemory;
    use object_store::{
        GetOptions, GetResult, ListResult, ObjectMeta, PutMultipartOpts, PutOptions, PutResult,
        UploadPart,
    };
    use relay_core::GcsObject;
    use std::fmt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// `InMemory` wrapper counting multipart aborts, optionally failing parts
    #[derive(Debug, Default)]
    struct TrackingStore {
        inner: InMemory,
        aborts: Arc<AtomicUsize>,
        fail_parts: bool,
    }

    impl fmt::Display for TrackingStore {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "TrackingStore")
        }
    }

    #[derive(Debug)]
    struct TrackingUpload {
        inner: Box<dyn MultipartUpload>,
        aborts: Arc<AtomicUsize>,
        fail_parts: bool,
    }

    #[async_trait]
    impl MultipartUpload for TrackingUpload {
        fn put_part(&mut self, data: PutPayload) -> UploadPart {
            if self.fail_parts {
                return Box::pin(async {
                    Err(object_store::Error::Generic {
                        store: "tracking",
                        source: "part rejected".into(),
                    })
                });
            }
            self.inner.put_part(data)
        }

        async fn complete(&mut self) -> object_store::Result<PutResult> {
            self.inner.complete().await
        }

        async fn abort(&mut self) -> object_store::Result<()> {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            self.inner.abort().await
        }
    }

    #[async_trait]
    impl ObjectStore for TrackingStore {
        async fn put_opts(
            &self,
            location: &Path,
            payload: PutPayload,
            opts: PutOptions,
        ) -> object_store::Result<PutResult> {
            self.inner.put_opts(location, payload, opts).await
        }

        async fn put_multipart_opts(
            &self,
            location: &Path,
            opts: PutMultipartOpts,
        ) -> object_store::Result<Box<dyn MultipartUpload>> {
            Ok(Box::new(TrackingUpload {
                inner: self.inner.put_multipart_opts(location, opts).await?,
                aborts: self.aborts.clone(),
                fail_parts: self.fail_parts,
            }))
        }

        async fn get_opts(
            &self,
            location: &Path,
            options: GetOptions,
        ) -> object_store::Result<GetResult> {
            self.inner.get_opts(location, options).await
        }

        async fn delete(&self, location: &Path) -> object_store::Result<()> {
            self.inner.delete(location).await
        }

        fn list(&self, prefix: Option<&Path>) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
            self.inner.list(prefix)
        }

        async fn list_with_delimiter(&self, prefix: Option<&Path>) -> object_store::Result<ListResult> {
            self.inner.list_with_delimiter(prefix).await
        }

        async fn copy(&self, from: &Path, to: &Path) -> object_store::Result<()> {
            self.inner.copy(from, to).await
        }

        async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> object_store::Result<()> {
            self.inner.copy_if_not_exists(from, to).await
        }
    }

    async fn wait_for_aborts(aborts: &AtomicUsize, expected: usize) {
        for _ in 0..200 {
            if aborts.load(Ordering::SeqCst) >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(aborts.load(Ordering::SeqCst), expected);
    }

    fn location() -> ObjectLocation {
        ObjectLocation::Gcs(GcsObject::new("bucket", "out.bin"))
    }

    #[tokio::test]
    async fn test_small_object_single_put() {
        let store = Arc::new(InMemory::new());
        let path = Path::from("out.bin");
        let mut writer = Box::new(UploadWriter::spawn(store.clone(), path.clone(), location()));

        writer.write(Bytes::from_static(b"hello ")).await.unwrap();
        writer.write(Bytes::from_static(b"world")).await.unwrap();
        assert_eq!(writer.close().await.unwrap(), 11);

        let stored = store.get(&path).await.unwrap().bytes().await.unwrap();
        assert_eq!(stored.as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn test_empty_object() {
        let store = Arc::new(InMemory::new());
        let path = Path::from("empty");
        let writer = Box::new(UploadWriter::spawn(store.clone(), path.clone(), location()));

        assert_eq!(writer.close().await.unwrap(), 0);
        let stored = store.get(&path).await.unwrap().bytes().await.unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_large_object_multipart() {
        let store = Arc::new(InMemory::new());
        let path = Path::from("large.bin");
        let mut writer = Box::new(UploadWriter::spawn(store.clone(), path.clone(), location()));

        let chunk = Bytes::from(vec![7u8; 1024 * 1024]);
        for _ in 0..7 {
            writer.write(chunk.clone()).await.unwrap();
        }
        let written = writer.close().await.unwrap();
        assert_eq!(written, 7 * 1024 * 1024);

        let meta = store.head(&path).await.unwrap();
        assert_eq!(meta.size as u64, written);
    }

    #[tokio::test]
    async fn test_abort_commits_nothing() {
        let store = Arc::new(InMemory::new());
        let path = Path::from("partial");
        let mut writer = Box::new(UploadWriter::spawn(store.clone(), path.clone(), location()));

        writer.write(Bytes::from_static(b"partial data")).await.unwrap();
        writer.abort().await;

        assert!(matches!(
            store.get(&path).await,
            Err(object_store::Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_dropped_writer_discards_multipart_upload() {
        let store = Arc::new(TrackingStore::default());
        let aborts = store.aborts.clone();
        let path = Path::from("dropped.bin");
        let mut writer = Box::new(UploadWriter::spawn(store.clone(), path.clone(), location()));

        let chunk = Bytes::from(vec![1u8; 1024 * 1024]);
        for _ in 0..6 {
            writer.write(chunk.clone()).await.unwrap();
        }
        drop(writer);

        wait_for_aborts(&aborts, 1).await;
        assert!(matches!(
            store.get(&path).await,
            Err(object_store::Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_part_discards_multipart_upload() {
        let store = Arc::new(TrackingStore {
            fail_parts: true,
            ..Default::default()
        });
        let path = Path::from("failed.bin");
        let mut writer = Box::new(UploadWriter::spawn(store.clone(), path.clone(), location()));

        let chunk = Bytes::from(vec![2u8; 1024 * 1024]);
        for _ in 0..6 {
            writer.write(chunk.clone()).await.unwrap();
        }

        assert!(matches!(writer.close().await, Err(RelayError::Storage { .. })));
        assert_eq!(store.aborts.load(Ordering::SeqCst), 1);
        assert!(matches!(
            store.get(&path).await,
            Err(object_store::Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_completed_upload_is_not_discarded() {
        let store = Arc::new(TrackingStore::default());
        let path = Path::from("kept.bin");
        let mut writer = Box::new(UploadWriter::spawn(store.clone(), path.clone(), location()));

        let chunk = Bytes::from(vec![3u8; 3 * 1024 * 1024]);
        for _ in 0..4 {
            writer.write(chunk.clone()).await.unwrap();
        }
        assert_eq!(writer.close().await.unwrap(), 12 * 1024 * 1024);

        assert_eq!(store.aborts.load(Ordering::SeqCst), 0);
        let meta = store.head(&path).await.unwrap();
        assert_eq!(meta.size, 12 * 1024 * 1024);
    }
}
