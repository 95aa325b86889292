//! In-memory storage backend, used for tests and ephemeral registries.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    ByteStream, ContinuationToken, ListingOptions, ListingPage, ObjectEntry, ObjectMeta,
    ObjectStore, PageStream, PutMode, StreamingUpload,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, PoisonError, RwLock};
use time::OffsetDateTime;

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: OffsetDateTime,
}

type Objects = Arc<RwLock<BTreeMap<String, StoredObject>>>;

/// Object store backed by an ordered map.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    objects: Objects,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &str) -> StorageResult<StoredObject> {
        super::validate_key(key)?;
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

fn insert(objects: &Objects, key: &str, data: Bytes, mode: PutMode) -> StorageResult<()> {
    let mut guard = objects.write().unwrap_or_else(PoisonError::into_inner);
    if mode == PutMode::Create && guard.contains_key(key) {
        return Err(StorageError::AlreadyExists(key.to_string()));
    }
    guard.insert(
        key.to_string(),
        StoredObject {
            data,
            last_modified: OffsetDateTime::now_utc(),
        },
    );
    Ok(())
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let object = self.lookup(key)?;
        Ok(ObjectMeta {
            size: object.data.len() as u64,
            last_modified: Some(object.last_modified),
            content_type: None,
        })
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        Ok(self.lookup(key)?.data)
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let data = self.lookup(key)?.data;
        Ok(Box::pin(futures::stream::once(async move { Ok(data) })))
    }

    async fn put(&self, key: &str, data: Bytes, mode: PutMode) -> StorageResult<()> {
        super::validate_key(key)?;
        insert(&self.objects, key, data, mode)
    }

    async fn put_stream(
        &self,
        key: &str,
        mode: PutMode,
    ) -> StorageResult<Box<dyn StreamingUpload>> {
        super::validate_key(key)?;
        if mode == PutMode::Create && self.lookup(key).is_ok() {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }
        Ok(Box::new(MemoryUpload {
            objects: Arc::clone(&self.objects),
            key: key.to_string(),
            mode,
            buffer: BytesMut::new(),
        }))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        super::validate_key(key)?;
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> StorageResult<()> {
        super::validate_key(to)?;
        let object = self.lookup(from)?;
        insert(&self.objects, to, object.data, PutMode::Overwrite)
    }

    fn list_pages<'a>(
        &'a self,
        prefix: &str,
        options: ListingOptions,
        resume: Option<ContinuationToken>,
    ) -> PageStream<'a> {
        let prefix = prefix.to_string();
        let page_size = options.normalized_page_size();

        Box::pin(async_stream::stream! {
            let mut after = resume.map(|t| t.start_after().to_string());
            loop {
                // Each page is a fresh snapshot, so concurrent writes show up
                // in later pages the same way they would on a remote store.
                let (entries, more) = {
                    let guard = self.objects.read().unwrap_or_else(PoisonError::into_inner);
                    let lower = match &after {
                        Some(key) => Bound::Excluded(key.as_str()),
                        None => Bound::Included(prefix.as_str()),
                    };
                    let mut matching = guard
                        .range::<str, _>((lower, Bound::Unbounded))
                        .skip_while(|(k, _)| k.as_str() < prefix.as_str())
                        .take_while(|(k, _)| k.starts_with(&prefix))
                        .map(|(k, v)| ObjectEntry { key: k.clone(), size: v.data.len() as u64 });
                    let entries: Vec<_> = matching.by_ref().take(page_size).collect();
                    let more = matching.next().is_some();
                    (entries, more)
                };

                if entries.is_empty() {
                    break;
                }
                let next_token = more
                    .then(|| entries.last().map(|e| ContinuationToken::after(e.key.clone())))
                    .flatten();
                after = next_token.as_ref().map(|t| t.start_after().to_string());
                yield Ok(ListingPage { entries, next_token });
                if after.is_none() {
                    break;
                }
            }
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryUpload {
    objects: Objects,
    key: String,
    mode: PutMode,
    buffer: BytesMut,
}

#[async_trait]
impl StreamingUpload for MemoryUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let size = self.buffer.len() as u64;
        insert(&self.objects, &self.key, self.buffer.freeze(), self.mode)?;
        Ok(size)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}
