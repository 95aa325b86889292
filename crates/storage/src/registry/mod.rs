//! Registry storage layer.
//!
//! `RegistryStorage` composes an `ObjectStore` with the key `Layout` to
//! answer module and provider queries, accept publisher uploads, populate
//! the mirror tree and migrate legacy keys.

mod migrate;
mod modules;
mod providers;

pub use migrate::{MigrationKind, MigrationReport};
pub use modules::ModuleArtifact;
pub use providers::{ProviderRelease, ReleaseArchive};

use crate::error::{StorageError, StorageResult};
use crate::traits::ObjectStore;
use boring_core::config::RegistryConfig;
use boring_core::{ArchiveFormat, Layout};
use std::sync::Arc;
use std::time::Duration;

/// Where a client can fetch an object from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadLocation {
    /// A backend-issued, time-limited URL.
    Presigned(String),
    /// The backend cannot issue URLs; the registry must serve this key itself.
    Object(String),
}

/// Module and provider operations on top of an object store.
#[derive(Clone)]
pub struct RegistryStorage {
    store: Arc<dyn ObjectStore>,
    layout: Layout,
    archive_format: ArchiveFormat,
    signed_url_expiry: Duration,
}

impl std::fmt::Debug for RegistryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryStorage")
            .field("backend", &self.store.backend_name())
            .field("layout", &self.layout)
            .field("archive_format", &self.archive_format)
            .finish_non_exhaustive()
    }
}

impl RegistryStorage {
    pub fn new(store: Arc<dyn ObjectStore>, config: &RegistryConfig) -> Self {
        Self {
            store,
            layout: config.layout(),
            archive_format: config.archive_format.clone(),
            signed_url_expiry: config.signed_url_expiry(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn archive_format(&self) -> &ArchiveFormat {
        &self.archive_format
    }

    /// Resolve how a client should download `key`.
    ///
    /// Backends without URL signing yield `DownloadLocation::Object`.
    pub async fn locate(&self, key: &str) -> StorageResult<DownloadLocation> {
        match self.store.presign_get(key, self.signed_url_expiry).await {
            Ok(url) => Ok(DownloadLocation::Presigned(url)),
            Err(StorageError::Unsupported(_)) => Ok(DownloadLocation::Object(key.to_string())),
            Err(e) => Err(e),
        }
    }
}
