use async_trait::async_trait;
use boring_storage::error::{StorageError, StorageResult};
use boring_storage::traits::{
    ByteStream, ContinuationToken, ListingOptions, ObjectMeta, ObjectStore, PageStream, PutMode,
    StreamingUpload,
};
use boring_storage::MemoryBackend;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Memory backend whose listings fail with `Unavailable` after one page,
/// a configurable number of times.
#[allow(dead_code)]
pub struct FlakyListingBackend {
    inner: MemoryBackend,
    failures_left: AtomicUsize,
    pub list_calls: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl FlakyListingBackend {
    pub fn new(inner: MemoryBackend, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
            list_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ObjectStore for FlakyListingBackend {
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        self.inner.get_stream(key).await
    }

    async fn put(&self, key: &str, data: Bytes, mode: PutMode) -> StorageResult<()> {
        self.inner.put(key, data, mode).await
    }

    async fn put_stream(
        &self,
        key: &str,
        mode: PutMode,
    ) -> StorageResult<Box<dyn StreamingUpload>> {
        self.inner.put_stream(key, mode).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn copy(&self, from: &str, to: &str) -> StorageResult<()> {
        self.inner.copy(from, to).await
    }

    fn list_pages<'a>(
        &'a self,
        prefix: &str,
        options: ListingOptions,
        resume: Option<ContinuationToken>,
    ) -> PageStream<'a> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let fail = self.take_failure();
        let pages = self.inner.list_pages(prefix, options, resume);
        if !fail {
            return pages;
        }
        Box::pin(pages.take(1).chain(futures::stream::once(async {
            Err(StorageError::Unavailable("connection reset".to_string()))
        })))
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}
