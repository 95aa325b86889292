//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    ByteStream, ContinuationToken, ListingOptions, ListingPage, ObjectEntry, ObjectMeta,
    ObjectStore, PageStream, PutMode, StreamingUpload,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Marker embedded in in-flight upload file names. Listing skips these.
const PARTIAL_MARKER: &str = ".partial-";

/// Local filesystem object store.
///
/// Each key maps to a file under `root`; `/` in keys becomes a directory
/// separator. Writes land in a sibling temp file and are renamed (or
/// hard-linked, for `PutMode::Create`) into place once synced.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path on a blocking thread.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Map a key to a path inside the root, rejecting anything that would
    /// escape it, including escapes through symlinks.
    fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }
        if Path::new(key)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(format!(
                "contains unsafe path component: {key}"
            )));
        }

        let path = root.join(key);
        let root_canonical = root.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize root: {e}"),
            ))
        })?;

        // The nearest existing entry (the path itself or an ancestor) must
        // resolve inside the root. Symlinks are followed by canonicalize.
        let mut current = Some(path.as_path());
        while let Some(candidate) = current {
            match std::fs::symlink_metadata(candidate) {
                Ok(meta) => {
                    let resolved = candidate.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!(
                                "symlink target missing or invalid: {key}"
                            ))
                        } else {
                            StorageError::Io(std::io::Error::new(
                                e.kind(),
                                format!("failed to canonicalize path: {e}"),
                            ))
                        }
                    })?;
                    if !resolved.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "resolved path escapes storage root: {key}"
                        )));
                    }
                    return Ok(path);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    current = candidate.parent();
                }
                Err(err) => {
                    return Err(StorageError::Io(std::io::Error::new(
                        err.kind(),
                        format!("failed to stat path: {err}"),
                    )));
                }
            }
        }

        Ok(path)
    }

    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn temp_path_for(path: &Path) -> PathBuf {
        let suffix = format!("{PARTIAL_MARKER}{}", Uuid::new_v4());
        let name = path
            .file_name()
            .map(|n| format!("{}{suffix}", n.to_string_lossy()))
            .unwrap_or(suffix);
        path.with_file_name(name)
    }

    /// Collect every file key starting with `prefix`, sorted.
    async fn collect_entries(&self, prefix: &str) -> StorageResult<Vec<ObjectEntry>> {
        // Walk from the deepest directory the prefix fully names.
        let dir_prefix = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let base_path = if dir_prefix.is_empty() {
            self.root.clone()
        } else {
            self.key_path(dir_prefix).await?
        };

        let mut entries = Vec::new();
        match fs::symlink_metadata(&base_path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(entries),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(StorageError::Io(e)),
        }

        let mut stack = vec![base_path];
        while let Some(dir) = stack.pop() {
            let mut read_dir = match fs::read_dir(&dir).await {
                Ok(read_dir) => read_dir,
                // Removed concurrently.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::Io(e)),
            };
            while let Some(entry) = read_dir.next_entry().await? {
                let path = entry.path();
                // file_type() does not follow symlinks; links are never listed.
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file()
                    && let Ok(rel) = path.strip_prefix(&self.root)
                {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    if key.starts_with(prefix) && !key.contains(PARTIAL_MARKER) {
                        let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                        entries.push(ObjectEntry { key, size });
                    }
                }
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

fn map_not_found(key: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

/// Move a synced temp file into place according to `mode`.
async fn commit(
    temp_path: &Path,
    final_path: &Path,
    key: &str,
    mode: PutMode,
) -> StorageResult<()> {
    match mode {
        PutMode::Overwrite => {
            if let Err(e) = fs::rename(temp_path, final_path).await {
                let _ = fs::remove_file(temp_path).await;
                return Err(StorageError::Io(e));
            }
            Ok(())
        }
        PutMode::Create => {
            // link(2) fails with EEXIST if another writer got there first.
            let linked = fs::hard_link(temp_path, final_path).await;
            let _ = fs::remove_file(temp_path).await;
            match linked {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    Err(StorageError::AlreadyExists(key.to_string()))
                }
                Err(e) => Err(StorageError::Io(e)),
            }
        }
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.key_path(key).await?;
        let metadata = fs::metadata(&path).await.map_err(map_not_found(key))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }

        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(|t| t.into()),
            content_type: None,
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_path(key).await?;
        let data = fs::read(&path).await.map_err(map_not_found(key))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        use tokio::io::AsyncReadExt;

        let path = self.key_path(key).await?;
        let file = fs::File::open(&path).await.map_err(map_not_found(key))?;

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes, mode: PutMode) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        if mode == PutMode::Create && fs::try_exists(&path).await? {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }
        self.ensure_parent(&path).await?;

        let temp_path = Self::temp_path_for(&path);
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
        }
        commit(&temp_path, &path, key, mode).await
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn put_stream(
        &self,
        key: &str,
        mode: PutMode,
    ) -> StorageResult<Box<dyn StreamingUpload>> {
        let path = self.key_path(key).await?;
        if mode == PutMode::Create && fs::try_exists(&path).await? {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }
        self.ensure_parent(&path).await?;

        let temp_path = Self::temp_path_for(&path);
        let file = fs::File::create(&temp_path).await?;

        Ok(Box::new(FilesystemUpload {
            file,
            key: key.to_string(),
            temp_path,
            final_path: path,
            mode,
            bytes_written: 0,
        }))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn copy(&self, from: &str, to: &str) -> StorageResult<()> {
        let from_path = self.key_path(from).await?;
        let to_path = self.key_path(to).await?;
        self.ensure_parent(&to_path).await?;

        let temp_path = Self::temp_path_for(&to_path);
        fs::copy(&from_path, &temp_path)
            .await
            .map_err(map_not_found(from))?;
        commit(&temp_path, &to_path, to, PutMode::Overwrite).await
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
            let mut entries = self.collect_entries(&prefix).await?;
            if let Some(token) = resume {
                entries.retain(|e| e.key.as_str() > token.start_after());
            }

            let mut remaining = entries.into_iter().peekable();
            while remaining.peek().is_some() {
                let page: Vec<ObjectEntry> = remaining.by_ref().take(page_size).collect();
                let next_token = if remaining.peek().is_some() {
                    page.last().map(|e| ContinuationToken::after(e.key.clone()))
                } else {
                    None
                };
                yield ListingPage { entries: page, next_token };
            }
        })
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}

/// Streaming upload for filesystem backend.
struct FilesystemUpload {
    file: fs::File,
    key: String,
    temp_path: PathBuf,
    final_path: PathBuf,
    mode: PutMode,
    bytes_written: u64,
}

#[async_trait]
impl StreamingUpload for FilesystemUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.file.write_all(&data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let Self {
            file,
            key,
            temp_path,
            final_path,
            mode,
            bytes_written,
        } = *self;
        file.sync_all().await?;
        drop(file);
        commit(&temp_path, &final_path, &key, mode).await?;
        Ok(bytes_written)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
        Ok(())
    }
}
