//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// A boxed stream of listing entries.
pub type EntryStream<'a> = Pin<Box<dyn Stream<Item = StorageResult<ObjectEntry>> + Send + 'a>>;

/// A boxed stream of listing pages.
pub type PageStream<'a> = Pin<Box<dyn Stream<Item = StorageResult<ListingPage>> + Send + 'a>>;

/// Page size constraints for listing operations.
pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const MIN_PAGE_SIZE: usize = 1;
pub const MAX_PAGE_SIZE: usize = 10000;

/// How many times `list_entries` restarts a listing after a transient failure.
pub const MAX_LIST_RESTARTS: u32 = 3;

/// Write semantics for `put` and `put_stream`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PutMode {
    /// Replace any existing object.
    #[default]
    Overwrite,
    /// Fail with `AlreadyExists` if the key is already present.
    Create,
}

/// A listed object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
}

/// Position to resume a listing from.
///
/// Listings are ordered by key, so a token is simply the last key already
/// seen. Every backend resumes strictly after it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    pub fn after(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn start_after(&self) -> &str {
        &self.0
    }
}

/// A single page of listing results.
#[derive(Clone, Debug)]
pub struct ListingPage {
    /// Entries in this page, in ascending key order.
    pub entries: Vec<ObjectEntry>,

    /// Token for the next page; `None` on the last page.
    pub next_token: Option<ContinuationToken>,
}

/// Options for listing operations.
#[derive(Clone, Debug)]
pub struct ListingOptions {
    /// Number of entries per page, clamped to [MIN_PAGE_SIZE, MAX_PAGE_SIZE].
    pub page_size: usize,
}

impl ListingOptions {
    pub fn new(page_size: usize) -> Self {
        Self { page_size }
    }

    pub fn normalized_page_size(&self) -> usize {
        self.page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
    }
}

impl Default for ListingOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Flat key/value object store.
///
/// Keys are `/`-separated strings. Listing uses plain string prefixes, so
/// `modules/namespace=acme/` and `namespace=` are both valid prefixes.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Get an object's metadata without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Get an object as a byte stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Put an object atomically.
    async fn put(&self, key: &str, data: Bytes, mode: PutMode) -> StorageResult<()>;

    /// Start a streaming upload. Content becomes visible on `finish`.
    async fn put_stream(&self, key: &str, mode: PutMode)
    -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Copy an object, overwriting the destination.
    async fn copy(&self, from: &str, to: &str) -> StorageResult<()>;

    /// List objects whose key starts with `prefix`, one page at a time.
    ///
    /// Pages come back in ascending key order. When `resume` is set the
    /// listing starts strictly after the token's key.
    fn list_pages<'a>(
        &'a self,
        prefix: &str,
        options: ListingOptions,
        resume: Option<ContinuationToken>,
    ) -> PageStream<'a>;

    /// Produce a time-limited URL for reading `key` directly from the backend.
    async fn presign_get(&self, key: &str, _ttl: Duration) -> StorageResult<String> {
        Err(StorageError::Unsupported(format!(
            "{} cannot sign download URLs for {key}",
            self.backend_name()
        )))
    }

    /// Produce a time-limited URL for writing `key` directly to the backend.
    async fn presign_put(&self, key: &str, _ttl: Duration) -> StorageResult<String> {
        Err(StorageError::Unsupported(format!(
            "{} cannot sign upload URLs for {key}",
            self.backend_name()
        )))
    }

    /// Static identifier for the backend type, used in logs and metrics.
    fn backend_name(&self) -> &'static str;

    /// Verify backend connectivity. Called once at startup.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
    /// Content type (if available).
    pub content_type: Option<String>,
}

/// Trait for streaming uploads.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Finish the upload and return the total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}

/// Flat, restartable listing on top of `list_pages`.
///
/// Implemented for every `ObjectStore`; do not implement it manually.
pub trait ObjectStoreListExt: ObjectStore {
    /// List every entry under `prefix`.
    ///
    /// A retryable failure mid-listing restarts from the last key yielded,
    /// up to `MAX_LIST_RESTARTS` times without progress.
    fn list_entries<'a>(&'a self, prefix: &str) -> EntryStream<'a> {
        let prefix = prefix.to_string();
        Box::pin(async_stream::try_stream! {
            let mut last_key: Option<String> = None;
            let mut restarts = 0u32;
            'listing: loop {
                let resume = last_key.clone().map(ContinuationToken::after);
                let mut pages = self.list_pages(&prefix, ListingOptions::default(), resume);
                while let Some(page) = pages.next().await {
                    match page {
                        Ok(page) => {
                            if !page.entries.is_empty() {
                                restarts = 0;
                            }
                            for entry in page.entries {
                                last_key = Some(entry.key.clone());
                                yield entry;
                            }
                        }
                        Err(e) if e.is_retryable() && restarts < MAX_LIST_RESTARTS => {
                            restarts += 1;
                            tracing::warn!(
                                prefix = %prefix,
                                after = ?last_key,
                                attempt = restarts,
                                error = %e,
                                "listing interrupted, restarting"
                            );
                            let backoff = Duration::from_millis(100 * u64::from(restarts));
                            tokio::time::sleep(backoff).await;
                            continue 'listing;
                        }
                        Err(e) => Err(e)?,
                    }
                }
                break;
            }
        })
    }

    /// Collect every key under `prefix`.
    fn list_keys<'a>(
        &'a self,
        prefix: &str,
    ) -> Pin<Box<dyn std::future::Future<Output = StorageResult<Vec<String>>> + Send + 'a>> {
        let entries = self.list_entries(prefix);
        Box::pin(async move {
            entries
                .map(|entry| entry.map(|e| e.key))
                .collect::<Vec<_>>()
                .await
                .into_iter()
                .collect()
        })
    }
}

impl<T: ObjectStore + ?Sized> ObjectStoreListExt for T {}

/// Drive `stream` into a new upload of `key`, aborting on any error.
pub async fn write_stream(
    store: &dyn ObjectStore,
    key: &str,
    mut stream: ByteStream,
    mode: PutMode,
) -> StorageResult<u64> {
    let mut upload = store.put_stream(key, mode).await?;
    while let Some(chunk) = stream.next().await {
        let written = match chunk {
            Ok(chunk) => upload.write(chunk).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if let Err(abort_err) = upload.abort().await {
                tracing::warn!(key, error = %abort_err, "failed to abort upload");
            }
            return Err(e);
        }
    }
    upload.finish().await
}
