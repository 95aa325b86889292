//! Module artifacts.

use super::{DownloadLocation, RegistryStorage};
use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectStoreListExt, PutMode, write_stream};
use boring_core::ModuleIdentity;
use futures::TryStreamExt;
use std::collections::BTreeSet;
use tracing::instrument;

/// A stored module archive and where to download it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleArtifact {
    pub module: ModuleIdentity,
    pub key: String,
    pub size: u64,
    pub location: DownloadLocation,
}

impl RegistryStorage {
    /// Look up a module version with a single stat on its canonical key.
    #[instrument(skip(self), fields(module = %module))]
    pub async fn get_module(&self, module: &ModuleIdentity) -> StorageResult<ModuleArtifact> {
        let key = self.layout.module_key(module, &self.archive_format);
        let meta = self.store.head(&key).await?;
        let location = self.locate(&key).await?;
        Ok(ModuleArtifact {
            module: module.clone(),
            key,
            size: meta.size,
            location,
        })
    }

    pub async fn module_exists(&self, module: &ModuleIdentity) -> StorageResult<bool> {
        self.store
            .exists(&self.layout.module_key(module, &self.archive_format))
            .await
    }

    /// All published versions of a module, lowest first.
    ///
    /// Returns `NotFound` when the module has no versions at all.
    #[instrument(skip(self))]
    pub async fn list_module_versions(
        &self,
        namespace: &str,
        name: &str,
        provider: &str,
    ) -> StorageResult<Vec<String>> {
        let base = self.layout.module_base(namespace, name, provider);
        let versions: BTreeSet<String> = self
            .store
            .list_entries(&base)
            .try_filter_map(|entry| {
                let version = self.layout.parse_module_key(&entry.key).map(|m| m.version);
                futures::future::ready(Ok(version))
            })
            .try_collect()
            .await?;

        if versions.is_empty() {
            return Err(StorageError::NotFound(format!(
                "module {namespace}/{name}/{provider}"
            )));
        }
        Ok(sort_versions(versions))
    }

    /// Store a module archive. Fails with `AlreadyExists` if any writer,
    /// including a concurrent one, stored this version first.
    #[instrument(skip(self, archive), fields(module = %module))]
    pub async fn upload_module(
        &self,
        module: &ModuleIdentity,
        archive: ByteStream,
    ) -> StorageResult<u64> {
        module.semver()?;
        let key = self.layout.module_key(module, &self.archive_format);
        let size = write_stream(self.store.as_ref(), &key, archive, PutMode::Create).await?;
        tracing::info!(key = %key, size, "module uploaded");
        Ok(size)
    }
}

/// Order versions by SemVer precedence; unparsable versions sort last.
pub(crate) fn sort_versions(versions: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut versions: Vec<(Option<semver::Version>, String)> = versions
        .into_iter()
        .map(|v| (semver::Version::parse(&v).ok(), v))
        .collect();
    versions.sort_by(|(a_semver, a), (b_semver, b)| match (a_semver, b_semver) {
        (Some(x), Some(y)) => x.cmp(y).then_with(|| a.cmp(b)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.cmp(b),
    });
    versions.into_iter().map(|(_, v)| v).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_support::registry;
    use crate::traits::ObjectStore;
    use bytes::Bytes;

    fn archive(data: &'static [u8]) -> ByteStream {
        Box::pin(futures::stream::once(async move { Ok(Bytes::from_static(data)) }))
    }

    fn module(version: &str) -> ModuleIdentity {
        ModuleIdentity::new("acme", "tls", "aws", version).unwrap()
    }

    #[tokio::test]
    async fn upload_then_get_and_list() {
        let (registry, backend) = registry();
        for (version, data) in [("0.1.0", b"v1"), ("0.10.0", b"v2"), ("0.2.0", b"v3")] {
            registry
                .upload_module(&module(version), archive(data))
                .await
                .unwrap();
        }

        let versions = registry
            .list_module_versions("acme", "tls", "aws")
            .await
            .unwrap();
        assert_eq!(versions, vec!["0.1.0", "0.2.0", "0.10.0"]);

        let artifact = registry.get_module(&module("0.1.0")).await.unwrap();
        assert_eq!(
            artifact.key,
            "modules/namespace=acme/name=tls/provider=aws/version=0.1.0/acme-tls-aws-0.1.0.tar.gz"
        );
        assert_eq!(artifact.size, 2);
        assert_eq!(artifact.location, DownloadLocation::Object(artifact.key.clone()));
        assert_eq!(backend.get(&artifact.key).await.unwrap(), Bytes::from("v1"));
    }

    #[tokio::test]
    async fn second_upload_conflicts_and_keeps_original() {
        let (registry, backend) = registry();
        registry
            .upload_module(&module("1.0.0"), archive(b"first"))
            .await
            .unwrap();

        let err = registry
            .upload_module(&module("1.0.0"), archive(b"second"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));

        let artifact = registry.get_module(&module("1.0.0")).await.unwrap();
        assert_eq!(backend.get(&artifact.key).await.unwrap(), Bytes::from("first"));
    }

    #[tokio::test]
    async fn unknown_module_is_not_found() {
        let (registry, _) = registry();
        let err = registry.get_module(&module("1.0.0")).await.unwrap_err();
        assert!(err.is_not_found());
        let err = registry
            .list_module_versions("acme", "tls", "aws")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn upload_rejects_non_semver_versions() {
        let (registry, _) = registry();
        let err = registry
            .upload_module(&module("latest"), archive(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Core(_)));
    }

    #[test]
    fn sort_versions_uses_semver_precedence() {
        let sorted = sort_versions(
            ["1.0.0", "1.0.0-rc.1", "0.9.0", "weird"]
                .into_iter()
                .map(String::from),
        );
        assert_eq!(sorted, vec!["0.9.0", "1.0.0-rc.1", "1.0.0", "weird"]);
    }
}
