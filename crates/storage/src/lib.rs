//! Object storage backends and the registry storage layer.
//!
//! This crate provides:
//! - The `ObjectStore` abstraction with create-only writes and resumable listings
//! - Backends: local filesystem, in-memory, S3-compatible, GCS and Azure
//! - `RegistryStorage`, which maps modules and providers onto object keys

pub mod backends;
pub mod error;
pub mod registry;
pub mod traits;

pub use backends::{
    cloud::CloudBackend, filesystem::FilesystemBackend, memory::MemoryBackend, s3::S3Backend,
};
pub use error::{StorageError, StorageResult};
pub use registry::{
    DownloadLocation, MigrationKind, MigrationReport, ModuleArtifact, ProviderRelease,
    RegistryStorage, ReleaseArchive,
};
pub use traits::{
    ByteStream, ContinuationToken, ListingOptions, ListingPage, ObjectEntry, ObjectMeta,
    ObjectStore, ObjectStoreListExt, PutMode, StreamingUpload, write_stream,
};

use boring_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::Memory => Ok(Arc::new(MemoryBackend::new())),
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::Gcs {
            bucket,
            prefix,
            service_account_path,
        } => {
            let backend = CloudBackend::gcs(
                bucket,
                prefix.clone(),
                service_account_path
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned()),
            )?;
            Ok(Arc::new(backend))
        }
        StorageConfig::Azure {
            account,
            container,
            prefix,
            access_key,
        } => {
            let backend =
                CloudBackend::azure(account, container, prefix.clone(), access_key.clone())?;
            Ok(Arc::new(backend))
        }
    }
}
