// RegistryStorage end to end on the filesystem backend.

mod common;

use boring_core::config::RegistryConfig;
use boring_core::{ModuleIdentity, ProviderIdentity, ProviderScope};
use boring_storage::{
    DownloadLocation, FilesystemBackend, ObjectStore, RegistryStorage, StorageError,
};
use common::{body, seeded_bytes, sha256_hex};
use std::sync::Arc;
use tempfile::TempDir;

async fn registry() -> (TempDir, RegistryStorage) {
    let temp_dir = TempDir::new().unwrap();
    let backend = FilesystemBackend::new(temp_dir.path()).await.unwrap();
    let registry = RegistryStorage::new(Arc::new(backend), &RegistryConfig::default());
    (temp_dir, registry)
}

#[tokio::test]
async fn concurrent_module_uploads_have_exactly_one_winner() {
    let (_temp_dir, registry) = registry().await;
    let module = ModuleIdentity::new("acme", "tls", "aws", "0.1.0").unwrap();

    let mut tasks = Vec::new();
    for seed in 0..8u64 {
        let registry = registry.clone();
        let module = module.clone();
        tasks.push(tokio::spawn(async move {
            let data = seeded_bytes(seed, 256 * 1024);
            let result = registry
                .upload_module(&module, body(data.clone(), 8192))
                .await;
            (data, result)
        }));
    }

    let mut winners = Vec::new();
    for task in tasks {
        let (data, result) = task.await.unwrap();
        match result {
            Ok(size) => {
                assert_eq!(size, data.len() as u64);
                winners.push(data);
            }
            Err(StorageError::AlreadyExists(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(winners.len(), 1);
    let artifact = registry.get_module(&module).await.unwrap();
    let stored = registry.store().get(&artifact.key).await.unwrap();
    assert_eq!(sha256_hex(&stored), sha256_hex(&winners[0]));
    assert!(matches!(artifact.location, DownloadLocation::Object(_)));
}

#[tokio::test]
async fn provider_release_round_trip_on_disk() {
    let (temp_dir, registry) = registry().await;
    let archive = seeded_bytes(42, 4096);
    let sums = format!(
        "{}  terraform-provider-random_3.1.0_linux_amd64.zip\n",
        sha256_hex(&archive)
    );

    registry
        .upload_provider_release_file(
            ProviderScope::Hosted,
            "hashicorp",
            "terraform-provider-random_3.1.0_linux_amd64.zip",
            body(archive, 1000),
        )
        .await
        .unwrap();
    registry
        .upload_provider_release_file(
            ProviderScope::Hosted,
            "hashicorp",
            "terraform-provider-random_3.1.0_SHA256SUMS",
            body(sums.into(), 64),
        )
        .await
        .unwrap();

    let stored = temp_dir.path().join(
        "providers/namespace=hashicorp/name=random/version=3.1.0/terraform-provider-random_3.1.0_linux_amd64.zip",
    );
    assert!(stored.is_file());

    let versions = registry
        .list_provider_versions(ProviderScope::Hosted, "hashicorp", "random")
        .await
        .unwrap();
    assert_eq!(versions[0].version, "3.1.0");

    // Without signing keys the release cannot be served.
    let identity = ProviderIdentity::new("hashicorp", "random", "3.1.0", "linux", "amd64").unwrap();
    let err = registry
        .get_provider(ProviderScope::Hosted, &identity)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
