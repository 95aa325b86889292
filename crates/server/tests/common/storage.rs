//! Storage test utilities.

use async_trait::async_trait;
use boring_storage::traits::PageStream;
use boring_storage::{
    ByteStream, ContinuationToken, ListingOptions, MemoryBackend, ObjectMeta, ObjectStore,
    PutMode, StorageResult, StreamingUpload,
};
use bytes::Bytes;
use std::time::Duration;

/// Base of the URLs handed out by `PresigningStore`.
pub const PRESIGN_BASE: &str = "https://bucket.example.com";

/// An in-memory store that signs download URLs the way a cloud bucket does.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct PresigningStore {
    inner: MemoryBackend,
}

#[async_trait]
impl ObjectStore for PresigningStore {
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
        self.inner.list_pages(prefix, options, resume)
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        Ok(format!("{PRESIGN_BASE}/{key}?expires={}", ttl.as_secs()))
    }

    fn backend_name(&self) -> &'static str {
        "presigning-memory"
    }
}
