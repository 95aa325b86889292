//! Google Cloud Storage and Azure Blob Storage backends via `object_store`.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    ByteStream, ContinuationToken, ListingOptions, ListingPage, ObjectEntry, ObjectMeta,
    ObjectStore, PageStream, PutMode, StreamingUpload,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::path::Path as CloudPath;
use object_store::signer::Signer;
use object_store::{ObjectStore as CloudStore, PutPayload};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Object store for GCS or Azure, addressed through `object_store`.
///
/// Only GCS can presign; Azure callers fall back to proxied downloads.
pub struct CloudBackend {
    name: &'static str,
    inner: Arc<dyn CloudStore>,
    signer: Option<Arc<dyn Signer>>,
    prefix: Option<String>,
}

impl std::fmt::Debug for CloudBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudBackend")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("presign", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

fn normalize_prefix(prefix: Option<String>) -> Option<String> {
    prefix
        .map(|p| p.trim_matches('/').to_string())
        .filter(|p| !p.is_empty())
}

impl CloudBackend {
    /// Google Cloud Storage. Credentials come from `service_account_path` or
    /// the usual `GOOGLE_*` environment variables.
    pub fn gcs(
        bucket: &str,
        prefix: Option<String>,
        service_account_path: Option<String>,
    ) -> StorageResult<Self> {
        let mut builder =
            object_store::gcp::GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);
        if let Some(path) = service_account_path {
            builder = builder.with_service_account_path(path);
        }
        let store = Arc::new(
            builder
                .build()
                .map_err(|e| StorageError::Config(format!("gcs: {e}")))?,
        );
        Ok(Self {
            name: "gcs",
            inner: store.clone(),
            signer: Some(store),
            prefix: normalize_prefix(prefix),
        })
    }

    /// Azure Blob Storage. Without `access_key` the `AZURE_*` environment
    /// variables are used.
    pub fn azure(
        account: &str,
        container: &str,
        prefix: Option<String>,
        access_key: Option<String>,
    ) -> StorageResult<Self> {
        let mut builder = object_store::azure::MicrosoftAzureBuilder::from_env()
            .with_account(account)
            .with_container_name(container);
        if let Some(key) = access_key {
            builder = builder.with_access_key(key);
        }
        let store = builder
            .build()
            .map_err(|e| StorageError::Config(format!("azure: {e}")))?;
        Ok(Self {
            name: "azure",
            inner: Arc::new(store),
            signer: None,
            prefix: normalize_prefix(prefix),
        })
    }

    /// Wrap an arbitrary `object_store` implementation.
    pub fn from_store(
        name: &'static str,
        inner: Arc<dyn CloudStore>,
        prefix: Option<String>,
    ) -> Self {
        Self {
            name,
            inner,
            signer: None,
            prefix: normalize_prefix(prefix),
        }
    }

    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) if key.is_empty() => prefix.clone(),
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    fn path(&self, key: &str) -> StorageResult<CloudPath> {
        super::validate_key(key)?;
        CloudPath::parse(self.full_key(key))
            .map_err(|e| StorageError::InvalidKey(format!("{key}: {e}")))
    }

    fn strip_prefix(&self, location: &CloudPath) -> String {
        let full = location.as_ref();
        match &self.prefix {
            Some(prefix) => full
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .unwrap_or(full)
                .to_string(),
            None => full.to_string(),
        }
    }
}

fn map_error(err: object_store::Error, key: &str) -> StorageError {
    use object_store::Error as E;
    match err {
        E::NotFound { .. } => StorageError::NotFound(key.to_string()),
        E::AlreadyExists { .. } | E::Precondition { .. } => {
            StorageError::AlreadyExists(key.to_string())
        }
        E::NotSupported { .. } | E::NotImplemented => {
            StorageError::Unsupported(format!("{key}: {err}"))
        }
        E::InvalidPath { .. } => StorageError::InvalidKey(format!("{key}: {err}")),
        E::Generic { .. } => StorageError::Unavailable(format!("{key}: {err}")),
        other => StorageError::Backend(Box::new(other)),
    }
}

#[async_trait]
impl ObjectStore for CloudBackend {
    #[instrument(skip(self), fields(backend = self.name))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let meta = self
            .inner
            .head(&self.path(key)?)
            .await
            .map_err(|e| map_error(e, key))?;
        let timestamp = meta.last_modified.timestamp();
        Ok(ObjectMeta {
            size: meta.size as u64,
            last_modified: time::OffsetDateTime::from_unix_timestamp(timestamp).ok(),
            content_type: None,
        })
    }

    #[instrument(skip(self), fields(backend = self.name))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let result = self
            .inner
            .get(&self.path(key)?)
            .await
            .map_err(|e| map_error(e, key))?;
        result.bytes().await.map_err(|e| map_error(e, key))
    }

    #[instrument(skip(self), fields(backend = self.name))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let result = self
            .inner
            .get(&self.path(key)?)
            .await
            .map_err(|e| map_error(e, key))?;
        let key = key.to_string();
        Ok(Box::pin(
            result
                .into_stream()
                .map(move |chunk| chunk.map_err(|e| map_error(e, &key))),
        ))
    }

    #[instrument(skip(self, data), fields(backend = self.name, size = data.len()))]
    async fn put(&self, key: &str, data: Bytes, mode: PutMode) -> StorageResult<()> {
        let cloud_mode = match mode {
            PutMode::Overwrite => object_store::PutMode::Overwrite,
            PutMode::Create => object_store::PutMode::Create,
        };
        self.inner
            .put_opts(
                &self.path(key)?,
                PutPayload::from(data),
                object_store::PutOptions::from(cloud_mode),
            )
            .await
            .map_err(|e| map_error(e, key))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = self.name))]
    async fn put_stream(
        &self,
        key: &str,
        mode: PutMode,
    ) -> StorageResult<Box<dyn StreamingUpload>> {
        self.path(key)?;
        if mode == PutMode::Create && self.exists(key).await? {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }
        Ok(Box::new(CloudUpload {
            backend: CloudBackend {
                name: self.name,
                inner: Arc::clone(&self.inner),
                signer: None,
                prefix: self.prefix.clone(),
            },
            key: key.to_string(),
            mode,
            chunks: Vec::new(),
            bytes_written: 0,
        }))
    }

    #[instrument(skip(self), fields(backend = self.name))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        match self.inner.delete(&self.path(key)?).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(map_error(e, key)),
        }
    }

    #[instrument(skip(self), fields(backend = self.name))]
    async fn copy(&self, from: &str, to: &str) -> StorageResult<()> {
        self.inner
            .copy(&self.path(from)?, &self.path(to)?)
            .await
            .map_err(|e| map_error(e, from))
    }

    fn list_pages<'a>(
        &'a self,
        prefix: &str,
        options: ListingOptions,
        resume: Option<ContinuationToken>,
    ) -> PageStream<'a> {
        let prefix = prefix.to_string();
        let page_size = options.normalized_page_size();

        Box::pin(async_stream::try_stream! {
            // object_store prefixes match whole path segments, so list the
            // deepest directory the prefix names and filter the rest.
            let dir = match prefix.rfind('/') {
                Some(idx) => self.full_key(&prefix[..idx]),
                None => self.prefix.clone().unwrap_or_default(),
            };
            let dir_path = if dir.is_empty() {
                None
            } else {
                let path = CloudPath::parse(&dir)
                    .map_err(|e| StorageError::InvalidKey(format!("{prefix}: {e}")))?;
                Some(path)
            };
            let listing = match &resume {
                Some(token) => {
                    let after = token.start_after();
                    let offset = CloudPath::parse(self.full_key(after))
                        .map_err(|e| StorageError::InvalidKey(format!("{after}: {e}")))?;
                    self.inner.list_with_offset(dir_path.as_ref(), &offset)
                }
                None => self.inner.list(dir_path.as_ref()),
            };

            let mut pages = listing
                .map(|item| item.map(|meta| ObjectEntry {
                    key: self.strip_prefix(&meta.location),
                    size: meta.size as u64,
                }))
                .filter(|item| futures::future::ready(match item {
                    Ok(entry) => entry.key.starts_with(&prefix),
                    Err(_) => true,
                }))
                .chunks(page_size);

            while let Some(chunk) = pages.next().await {
                let mut entries = Vec::with_capacity(chunk.len());
                for item in chunk {
                    entries.push(item.map_err(|e| map_error(e, &prefix))?);
                }
                let next_token = (entries.len() == page_size)
                    .then(|| entries.last().map(|e| ContinuationToken::after(e.key.clone())))
                    .flatten();
                yield ListingPage { entries, next_token };
            }
        })
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        let Some(signer) = &self.signer else {
            return Err(StorageError::Unsupported(format!(
                "{} cannot sign download URLs for {key}",
                self.name
            )));
        };
        let url = signer
            .signed_url(http::Method::GET, &self.path(key)?, ttl)
            .await
            .map_err(|e| map_error(e, key))?;
        Ok(url.to_string())
    }

    async fn presign_put(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        let Some(signer) = &self.signer else {
            return Err(StorageError::Unsupported(format!(
                "{} cannot sign upload URLs for {key}",
                self.name
            )));
        };
        let url = signer
            .signed_url(http::Method::PUT, &self.path(key)?, ttl)
            .await
            .map_err(|e| map_error(e, key))?;
        Ok(url.to_string())
    }

    fn backend_name(&self) -> &'static str {
        self.name
    }

    async fn health_check(&self) -> StorageResult<()> {
        let dir = self
            .prefix
            .as_deref()
            .map(CloudPath::parse)
            .transpose()
            .map_err(|e| StorageError::Config(format!("invalid prefix: {e}")))?;
        let mut listing = self.inner.list(dir.as_ref());
        match listing.next().await {
            Some(Err(e)) => Err(map_error(e, "")),
            _ => Ok(()),
        }
    }
}

/// Buffers the whole object and writes it in one conditional put.
struct CloudUpload {
    backend: CloudBackend,
    key: String,
    mode: PutMode,
    chunks: Vec<Bytes>,
    bytes_written: u64,
}

#[async_trait]
impl StreamingUpload for CloudUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.bytes_written += data.len() as u64;
        self.chunks.push(data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let cloud_mode = match self.mode {
            PutMode::Overwrite => object_store::PutMode::Overwrite,
            PutMode::Create => object_store::PutMode::Create,
        };
        let path = self.backend.path(&self.key)?;
        let payload: PutPayload = self.chunks.into_iter().collect();
        self.backend
            .inner
            .put_opts(&path, payload, object_store::PutOptions::from(cloud_mode))
            .await
            .map_err(|e| map_error(e, &self.key))?;
        Ok(self.bytes_written)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}
