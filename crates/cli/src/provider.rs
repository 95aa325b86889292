//! Provider publishing: validate a signed release directory and upload it.
//!
//! A release directory holds, for one or more provider versions:
//!
//! - `terraform-provider-<name>_<version>_SHA256SUMS`
//! - `terraform-provider-<name>_<version>_SHA256SUMS.sig`
//! - every file listed in SHA256SUMS (platform archives, optionally the manifest)
//! - optionally `signing-keys.json` for the namespace
//!
//! Nothing is uploaded for a release until every listed file is present and
//! matches its digest and the signature verifies.

use crate::PublishSummary;
use crate::archive::file_stream;
use crate::error::{PublishError, PublishResult};
use boring_core::{
    ProviderScope, ReleaseFile, ReleaseFileKind, SIGNING_KEYS_FILE, Sha256Sums, SigningKeys,
};
use boring_storage::{PutMode, RegistryStorage, StorageError};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

const HASH_CHUNK: usize = 64 * 1024;

/// Flags controlling `upload provider`.
#[derive(Clone, Debug)]
pub struct ProviderOptions {
    pub namespace: String,
    /// Publish into the mirror tree of this upstream host instead of the
    /// hosted tree.
    pub mirror_hostname: Option<String>,
    pub ignore_existing: bool,
}

impl ProviderOptions {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            mirror_hostname: None,
            ignore_existing: true,
        }
    }

    fn scope(&self) -> ProviderScope<'_> {
        match &self.mirror_hostname {
            Some(hostname) => ProviderScope::Mirror { hostname },
            None => ProviderScope::Hosted,
        }
    }
}

/// A SHA256SUMS file found in the release directory.
struct Release {
    sums_file: ReleaseFile,
    sums_path: PathBuf,
}

pub struct ProviderPublisher {
    registry: RegistryStorage,
    options: ProviderOptions,
}

impl ProviderPublisher {
    pub fn new(registry: RegistryStorage, options: ProviderOptions) -> Self {
        Self { registry, options }
    }

    /// Validate and upload every release found directly in `dir`.
    pub async fn publish_dir(&self, dir: &Path) -> PublishResult<PublishSummary> {
        let releases = find_releases(dir).await?;
        if releases.is_empty() {
            return Err(PublishError::NoRelease(dir.to_path_buf()));
        }

        let mut summary = PublishSummary::default();
        for release in releases {
            self.publish_release(dir, &release, &mut summary).await?;
        }
        Ok(summary)
    }

    async fn publish_release(
        &self,
        dir: &Path,
        release: &Release,
        summary: &mut PublishSummary,
    ) -> PublishResult<()> {
        let (name, version) = (&release.sums_file.name, &release.sums_file.version);
        let namespace = &self.options.namespace;
        let sums_data = read(&release.sums_path).await?;
        let sums = Sha256Sums::parse(&sums_data)?;
        let signature_file = ReleaseFile::sums_signature(name, version).filename();
        let signature_path = dir.join(&signature_file);
        if !signature_path.is_file() {
            return Err(PublishError::MissingFile(signature_path));
        }
        let signature = read(&signature_path).await?;

        for (filename, expected) in sums.entries() {
            let path = dir.join(filename);
            if !path.is_file() {
                return Err(PublishError::MissingFile(path));
            }
            let actual = sha256_file(&path).await?;
            if &actual != expected {
                return Err(PublishError::Checksum {
                    file: filename.to_string(),
                    expected: hex::encode(expected),
                    actual: hex::encode(actual),
                });
            }
        }

        let (keys, local_keys) = self.signing_keys(dir).await?;
        let key_id = boring_signer::verify_release(&keys, &sums_data, &signature)?;
        tracing::info!(
            provider = %format!("{namespace}/{name}"),
            version = %version,
            key_id = %key_id,
            "release signature verified"
        );

        if local_keys {
            self.store_signing_keys(&keys).await?;
        }

        // SHA256SUMS and its signature go last so a partially uploaded
        // release never lists archives that are missing.
        let mut uploads: Vec<String> = sums.entries().map(|(f, _)| f.to_string()).collect();
        uploads.push(release.sums_file.filename());
        uploads.push(signature_file);
        for filename in uploads {
            let path = dir.join(&filename);
            if self.upload_file(&filename, &path).await? {
                summary.uploaded.push(filename);
            } else {
                summary.skipped.push(filename);
            }
        }
        Ok(())
    }

    /// Keys from the release directory, else the ones already in storage.
    ///
    /// The flag is true when the keys came from the directory.
    async fn signing_keys(&self, dir: &Path) -> PublishResult<(SigningKeys, bool)> {
        let local = dir.join(SIGNING_KEYS_FILE);
        let (keys, is_local) = if local.is_file() {
            (SigningKeys::from_json(&read(&local).await?)?, true)
        } else {
            match self
                .registry
                .signing_keys(self.options.scope(), &self.options.namespace)
                .await
            {
                Ok(keys) => (keys, false),
                Err(StorageError::NotFound(_)) => {
                    return Err(PublishError::NoSigningKeys(self.options.namespace.clone()));
                }
                Err(e) => return Err(e.into()),
            }
        };
        if keys.is_empty() {
            return Err(PublishError::NoSigningKeys(self.options.namespace.clone()));
        }
        Ok((keys, is_local))
    }

    async fn store_signing_keys(&self, keys: &SigningKeys) -> PublishResult<()> {
        let namespace = &self.options.namespace;
        match self
            .registry
            .put_signing_keys(self.options.scope(), namespace, keys, PutMode::Create)
            .await
        {
            Ok(()) => {
                tracing::info!(namespace = %namespace, "signing keys uploaded");
                Ok(())
            }
            Err(StorageError::AlreadyExists(_)) => {
                tracing::debug!(namespace = %namespace, "signing keys already stored");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Upload one release file. Returns false when it was already stored and
    /// existing files are ignored.
    async fn upload_file(&self, filename: &str, path: &Path) -> PublishResult<bool> {
        let scope = self.options.scope();
        let namespace = &self.options.namespace;
        let file = ReleaseFile::parse(filename)?;
        if self
            .registry
            .provider_file_exists(scope, namespace, &file)
            .await?
        {
            return self.existing(filename);
        }

        let stream = file_stream(path).await?;
        match self
            .registry
            .upload_provider_release_file(scope, namespace, filename, stream)
            .await
        {
            Ok(_) => Ok(true),
            Err(StorageError::AlreadyExists(_)) => self.existing(filename),
            Err(e) => Err(e.into()),
        }
    }

    fn existing(&self, filename: &str) -> PublishResult<bool> {
        if self.options.ignore_existing {
            tracing::info!(file = %filename, "release file already exists, skipping");
            Ok(false)
        } else {
            Err(PublishError::AlreadyExists(filename.to_string()))
        }
    }
}

async fn find_releases(dir: &Path) -> PublishResult<Vec<Release>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(PublishError::io(dir))?;
    let mut releases = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(PublishError::io(dir))? {
        let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        match ReleaseFile::parse(&filename) {
            Ok(file) if file.kind == ReleaseFileKind::Sums => releases.push(Release {
                sums_file: file,
                sums_path: entry.path(),
            }),
            _ => {}
        }
    }
    releases.sort_by(|a, b| a.sums_path.cmp(&b.sums_path));
    Ok(releases)
}

async fn read(path: &Path) -> PublishResult<Vec<u8>> {
    tokio::fs::read(path).await.map_err(PublishError::io(path))
}

async fn sha256_file(path: &Path) -> PublishResult<[u8; 32]> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(PublishError::io(path))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK];
    loop {
        let n = file.read(&mut buf).await.map_err(PublishError::io(path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}
