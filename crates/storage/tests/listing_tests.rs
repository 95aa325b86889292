// Restartable listing behaviour across backends.

mod common;

use boring_storage::traits::{MAX_LIST_RESTARTS, ObjectStoreListExt};
use boring_storage::{FilesystemBackend, MemoryBackend, ObjectStore, PutMode, StorageError};
use bytes::Bytes;
use common::FlakyListingBackend;
use futures::TryStreamExt;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use tempfile::TempDir;

async fn fill(store: &dyn ObjectStore, count: usize) {
    for i in 0..count {
        store
            .put(&format!("items/{i:05}"), Bytes::from(vec![1u8; i % 7]), PutMode::Overwrite)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn listing_restarts_after_transient_failures_without_duplicates() {
    let inner = MemoryBackend::new();
    fill(&inner, 2500).await;
    let flaky = FlakyListingBackend::new(inner, 2);

    let entries: Vec<_> = flaky.list_entries("items/").try_collect().await.unwrap();

    assert_eq!(entries.len(), 2500);
    let unique: HashSet<_> = entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(unique.len(), 2500);
    assert!(entries.windows(2).all(|w| w[0].key < w[1].key));
    assert_eq!(flaky.list_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn listing_gives_up_after_repeated_failures_without_progress() {
    let flaky = FlakyListingBackend::new(MemoryBackend::new(), 100);

    let result: Result<Vec<_>, _> = flaky.list_entries("items/").try_collect().await;

    assert!(matches!(result, Err(StorageError::Unavailable(_))));
    assert_eq!(
        flaky.list_calls.load(Ordering::SeqCst),
        MAX_LIST_RESTARTS as usize + 1
    );
}

#[tokio::test]
async fn filesystem_and_memory_list_identically() {
    let temp_dir = TempDir::new().unwrap();
    let fs = FilesystemBackend::new(temp_dir.path()).await.unwrap();
    let mem = MemoryBackend::new();
    for store in [&fs as &dyn ObjectStore, &mem as &dyn ObjectStore] {
        fill(store, 150).await;
        store
            .put("items-other/x", Bytes::from("x"), PutMode::Overwrite)
            .await
            .unwrap();
    }

    for prefix in ["items/", "items", "items/0010", ""] {
        let from_fs = fs.list_keys(prefix).await.unwrap();
        let from_mem = mem.list_keys(prefix).await.unwrap();
        assert_eq!(from_fs, from_mem, "prefix {prefix:?}");
    }

    let sizes: Vec<u64> = fs
        .list_entries("items/0000")
        .map_ok(|e| e.size)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(sizes, vec![0, 1, 2, 3, 4, 5, 6, 0, 1, 2]);
}
