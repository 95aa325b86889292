//! Provider releases, hosted and mirrored.

use super::modules::sort_versions;
use super::{DownloadLocation, RegistryStorage};
use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectStoreListExt, PutMode, write_stream};
use boring_core::layout::ProviderScope;
use boring_core::provider::default_protocols;
use boring_core::{
    Platform, ProviderIdentity, ProviderVersion, ReleaseFile, ReleaseFileKind, Sha256Sums,
    SigningKeys,
};
use bytes::Bytes;
use futures::TryStreamExt;
use std::collections::BTreeMap;
use tracing::instrument;

/// Everything a client needs to install one provider platform.
#[derive(Clone, Debug)]
pub struct ProviderRelease {
    pub identity: ProviderIdentity,
    pub filename: String,
    pub protocols: Vec<String>,
    /// Hex SHA-256 of the archive, taken from SHA256SUMS.
    pub shasum: String,
    pub signing_keys: SigningKeys,
    pub archive: DownloadLocation,
    pub shasums: DownloadLocation,
    pub shasums_signature: DownloadLocation,
}

/// A stored platform archive and its SHA256SUMS digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseArchive {
    pub platform: Platform,
    pub filename: String,
    pub sha256: [u8; 32],
}

#[derive(Default)]
struct VersionListing {
    platforms: Vec<Platform>,
    has_manifest: bool,
}

impl RegistryStorage {
    /// Resolve one provider platform: stat the archive, look its digest up
    /// in SHA256SUMS and attach the namespace signing keys.
    #[instrument(skip(self), fields(provider = %provider))]
    pub async fn get_provider(
        &self,
        scope: ProviderScope<'_>,
        provider: &ProviderIdentity,
    ) -> StorageResult<ProviderRelease> {
        let (namespace, name, version) = (&provider.namespace, &provider.name, &provider.version);
        let archive_key = self.layout.provider_archive_key(scope, provider);
        self.store.head(&archive_key).await?;

        let sums = self.sha256sums(scope, namespace, name, version).await?;
        let filename = provider.archive_filename();
        let shasum = sums.hex(&filename).ok_or_else(|| {
            boring_core::Error::InvalidSha256Sums(format!("no entry for {filename}"))
        })?;

        let signing_keys = self.signing_keys(scope, namespace).await?;
        let protocols = self.read_protocols(scope, namespace, name, version).await?;

        let sums_key = self.layout.sums_key(scope, namespace, name, version);
        let sig_key = self
            .layout
            .sums_signature_key(scope, namespace, name, version);

        Ok(ProviderRelease {
            identity: provider.clone(),
            filename,
            protocols,
            shasum,
            signing_keys,
            archive: self.locate(&archive_key).await?,
            shasums: self.locate(&sums_key).await?,
            shasums_signature: self.locate(&sig_key).await?,
        })
    }

    /// Every version of a provider with at least one platform archive,
    /// lowest first.
    #[instrument(skip(self))]
    pub async fn list_provider_versions(
        &self,
        scope: ProviderScope<'_>,
        namespace: &str,
        name: &str,
    ) -> StorageResult<Vec<ProviderVersion>> {
        let base = self.layout.provider_base(scope, namespace, name);
        let mut listing: BTreeMap<String, VersionListing> = BTreeMap::new();

        let mut entries = self.store.list_entries(&base);
        while let Some(entry) = entries.try_next().await? {
            let Some(object) = self.layout.parse_provider_key(scope, &entry.key) else {
                continue;
            };
            if object.namespace != namespace || object.name != name {
                continue;
            }
            let version = listing.entry(object.version).or_default();
            match &object.file.kind {
                ReleaseFileKind::Manifest => version.has_manifest = true,
                _ => {
                    if let Some(platform) = object.file.platform()
                        && !version.platforms.contains(&platform)
                    {
                        version.platforms.push(platform);
                    }
                }
            }
        }
        drop(entries);

        let mut versions = Vec::new();
        for version in sort_versions(listing.keys().cloned()) {
            let Some(found) = listing.remove(&version) else {
                continue;
            };
            if found.platforms.is_empty() {
                continue;
            }
            let protocols = if found.has_manifest {
                self.read_protocols(scope, namespace, name, &version)
                    .await?
            } else {
                default_protocols()
            };
            versions.push(ProviderVersion {
                version,
                protocols,
                platforms: found.platforms,
            });
        }

        if versions.is_empty() {
            return Err(StorageError::NotFound(format!("provider {namespace}/{name}")));
        }
        Ok(versions)
    }

    /// Read the namespace's `signing-keys.json`.
    pub async fn signing_keys(
        &self,
        scope: ProviderScope<'_>,
        namespace: &str,
    ) -> StorageResult<SigningKeys> {
        let key = self.layout.signing_keys_key(scope, namespace);
        let data = self.store.get(&key).await?;
        Ok(SigningKeys::from_json(&data)?)
    }

    pub async fn put_signing_keys(
        &self,
        scope: ProviderScope<'_>,
        namespace: &str,
        keys: &SigningKeys,
        mode: PutMode,
    ) -> StorageResult<()> {
        let key = self.layout.signing_keys_key(scope, namespace);
        self.store
            .put(&key, Bytes::from(keys.to_json()?), mode)
            .await
    }

    /// Read and parse a version's SHA256SUMS.
    pub async fn sha256sums(
        &self,
        scope: ProviderScope<'_>,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> StorageResult<Sha256Sums> {
        let data = self
            .store
            .get(&self.layout.sums_key(scope, namespace, name, version))
            .await?;
        Ok(Sha256Sums::parse(&data)?)
    }

    pub async fn provider_file_exists(
        &self,
        scope: ProviderScope<'_>,
        namespace: &str,
        file: &ReleaseFile,
    ) -> StorageResult<bool> {
        self.store
            .exists(&self.layout.provider_file_key(scope, namespace, file))
            .await
    }

    /// Store one release file. Only canonical release filenames are
    /// accepted and existing files are never replaced.
    #[instrument(skip(self, data))]
    pub async fn upload_provider_release_file(
        &self,
        scope: ProviderScope<'_>,
        namespace: &str,
        filename: &str,
        data: ByteStream,
    ) -> StorageResult<u64> {
        let file = ReleaseFile::parse(filename)?;
        let key = self.layout.provider_file_key(scope, namespace, &file);
        let size = write_stream(self.store.as_ref(), &key, data, PutMode::Create).await?;
        tracing::info!(key = %key, size, "provider release file uploaded");
        Ok(size)
    }

    /// Platform archives stored for one version, joined with their digests.
    ///
    /// Archives without a SHA256SUMS entry are skipped.
    #[instrument(skip(self))]
    pub async fn release_archives(
        &self,
        scope: ProviderScope<'_>,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> StorageResult<Vec<ReleaseArchive>> {
        let sums = self.sha256sums(scope, namespace, name, version).await?;
        let prefix = self
            .layout
            .provider_version_prefix(scope, namespace, name, version);

        let mut archives = Vec::new();
        let mut entries = self.store.list_entries(&prefix);
        while let Some(entry) = entries.try_next().await? {
            let Some(object) = self.layout.parse_provider_key(scope, &entry.key) else {
                continue;
            };
            let ReleaseFileKind::Archive { ext, .. } = &object.file.kind else {
                continue;
            };
            let Some(platform) = object.file.platform().filter(|_| ext == "zip") else {
                continue;
            };
            let filename = object.file.filename();
            match sums.get(&filename) {
                Some(digest) => archives.push(ReleaseArchive {
                    platform,
                    filename,
                    sha256: *digest,
                }),
                None => tracing::warn!(key = %entry.key, "archive missing from SHA256SUMS"),
            }
        }

        if archives.is_empty() {
            return Err(StorageError::NotFound(format!(
                "provider {namespace}/{name} {version}"
            )));
        }
        Ok(archives)
    }

    /// Protocol versions from the release manifest, or the default set.
    async fn read_protocols(
        &self,
        scope: ProviderScope<'_>,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> StorageResult<Vec<String>> {
        let manifest = ReleaseFile {
            name: name.to_string(),
            version: version.to_string(),
            kind: ReleaseFileKind::Manifest,
        };
        let key = self.layout.provider_file_key(scope, namespace, &manifest);
        let data = match self.store.get(&key).await {
            Ok(data) => data,
            Err(StorageError::NotFound(_)) => return Ok(default_protocols()),
            Err(e) => return Err(e),
        };
        Ok(protocols_from_manifest(&data).unwrap_or_else(|| {
            tracing::warn!(key = %key, "unreadable provider manifest, using default protocols");
            default_protocols()
        }))
    }
}

/// `{"version":1,"metadata":{"protocol_versions":["5.0"]}}`
fn protocols_from_manifest(data: &[u8]) -> Option<Vec<String>> {
    let manifest: serde_json::Value = serde_json::from_slice(data).ok()?;
    let protocols: Vec<String> = manifest
        .get("metadata")?
        .get("protocol_versions")?
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    (!protocols.is_empty()).then_some(protocols)
}
