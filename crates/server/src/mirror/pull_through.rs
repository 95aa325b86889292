//! Pull-through copies of upstream provider releases.
//!
//! A copy job fetches one platform archive and its release metadata from the
//! upstream registry, verifies the SHA256SUMS signature and the archive
//! digest, and stores everything under the mirror tree. At most one job runs
//! per release; later requests for the same release join the running job.

use super::upstream::{Upstream, UpstreamError};
use crate::metrics;
use boring_core::layout::ProviderScope;
use boring_core::{ProviderIdentity, ReleaseFile, Sha256Sums, SigningKeys};
use boring_signer::SignerError;
use boring_storage::{ByteStream, PutMode, RegistryStorage, StorageError, StorageResult};
use bytes::Bytes;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, watch};

/// Attempts at merging signing keys when another writer creates the bundle
/// first.
const KEY_MERGE_ATTEMPTS: usize = 3;

/// One release platform on one upstream host.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CopyKey {
    pub hostname: String,
    pub provider: ProviderIdentity,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied,
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("signature verification failed: {0}")]
    Signature(#[from] SignerError),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Core(#[from] boring_core::Error),
}

type InFlight = Arc<Mutex<HashMap<CopyKey, watch::Receiver<Option<CopyOutcome>>>>>;

/// Handle on a running copy job.
pub struct CopyJob {
    rx: watch::Receiver<Option<CopyOutcome>>,
    leader: bool,
}

impl CopyJob {
    /// Whether this call started the job rather than joining it.
    pub fn started(&self) -> bool {
        self.leader
    }

    pub async fn wait(mut self) -> CopyOutcome {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome
                .clone()
                .unwrap_or_else(|| CopyOutcome::Failed("copy job produced no outcome".into())),
            Err(_) => CopyOutcome::Failed("copy job aborted".to_string()),
        }
    }
}

/// Removes the job from the in-flight map however the task ends.
struct InFlightGuard {
    in_flight: InFlight,
    key: CopyKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

pub struct PullThroughMirror {
    registry: RegistryStorage,
    upstream: Arc<dyn Upstream>,
    in_flight: InFlight,
    /// Serializes read-merge-write of namespace signing keys across jobs.
    key_merge: Arc<AsyncMutex<()>>,
}

impl PullThroughMirror {
    pub fn new(registry: RegistryStorage, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            registry,
            upstream,
            in_flight: Arc::default(),
            key_merge: Arc::default(),
        }
    }

    pub fn upstream(&self) -> &dyn Upstream {
        self.upstream.as_ref()
    }

    /// Number of copy jobs currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Start a copy of `key` in the background, or join the one already
    /// running. Must be called inside a Tokio runtime.
    pub fn ensure_copy(&self, key: CopyKey) -> CopyJob {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(rx) = in_flight.get(&key) {
            return CopyJob {
                rx: rx.clone(),
                leader: false,
            };
        }

        let (tx, rx) = watch::channel(None);
        in_flight.insert(key.clone(), rx.clone());
        drop(in_flight);

        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            key,
        };
        let registry = self.registry.clone();
        let upstream = Arc::clone(&self.upstream);
        let key_merge = Arc::clone(&self.key_merge);
        tokio::spawn(async move {
            let key = &guard.key;
            let outcome = match copy_release(&registry, upstream.as_ref(), &key_merge, key).await {
                Ok(()) => {
                    tracing::info!(
                        hostname = %key.hostname,
                        provider = %key.provider,
                        "provider release mirrored"
                    );
                    metrics::record_copy_job("success");
                    CopyOutcome::Copied
                }
                Err(e) => {
                    tracing::error!(
                        hostname = %key.hostname,
                        provider = %key.provider,
                        error = %e,
                        "pull-through copy failed"
                    );
                    metrics::record_copy_job(match e {
                        CopyError::Signature(_) | CopyError::Integrity(_) => "rejected",
                        _ => "failure",
                    });
                    CopyOutcome::Failed(e.to_string())
                }
            };
            drop(guard);
            let _ = tx.send(Some(outcome));
        });

        CopyJob { rx, leader: true }
    }
}

async fn copy_release(
    registry: &RegistryStorage,
    upstream: &dyn Upstream,
    key_merge: &AsyncMutex<()>,
    key: &CopyKey,
) -> Result<(), CopyError> {
    let scope = ProviderScope::Mirror {
        hostname: &key.hostname,
    };
    let provider = &key.provider;
    let info = upstream.download_info(&key.hostname, provider).await?;

    let sums_bytes = upstream.fetch(&info.shasums_url).await?;
    let signature = upstream.fetch(&info.shasums_signature_url).await?;
    let key_id = boring_signer::verify_release(&info.signing_keys, &sums_bytes, &signature)?;

    let sums = Sha256Sums::parse(&sums_bytes)?;
    let filename = provider.archive_filename();
    let expected = *sums
        .get(&filename)
        .ok_or_else(|| CopyError::Integrity(format!("{filename} missing from SHA256SUMS")))?;
    if sums
        .hex(&filename)
        .is_none_or(|digest| !digest.eq_ignore_ascii_case(info.shasum.trim()))
    {
        return Err(CopyError::Integrity(format!(
            "upstream shasum for {filename} disagrees with SHA256SUMS"
        )));
    }

    let archive = upstream.fetch_stream(&info.download_url).await?;
    let archive = verify_digest(archive, expected, filename.clone());
    store_once(
        registry
            .upload_provider_release_file(scope, &provider.namespace, &filename, archive)
            .await,
    )?;

    {
        let _merging = key_merge.lock().await;
        merge_signing_keys(registry, scope, &provider.namespace, &info.signing_keys).await?;
    }
    let sums_file = ReleaseFile::sums(&provider.name, &provider.version);
    let sig_file = ReleaseFile::sums_signature(&provider.name, &provider.version);
    for (file, data) in [(sums_file, sums_bytes), (sig_file, signature)] {
        let filename = file.filename();
        store_once(
            registry
                .upload_provider_release_file(scope, &provider.namespace, &filename, once(data))
                .await,
        )?;
    }

    tracing::debug!(key_id = %key_id, filename = %filename, "mirrored release verified");
    Ok(())
}

/// Treat a concurrent writer having stored the same file as success.
fn store_once(result: StorageResult<u64>) -> StorageResult<()> {
    match result {
        Ok(_) | Err(StorageError::AlreadyExists(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Add upstream keys missing from the namespace's stored key bundle.
///
/// Callers in one process hold the mirror's merge lock. A bundle created by
/// another writer in the meantime is read and merged again.
async fn merge_signing_keys(
    registry: &RegistryStorage,
    scope: ProviderScope<'_>,
    namespace: &str,
    upstream_keys: &SigningKeys,
) -> StorageResult<()> {
    for _ in 0..KEY_MERGE_ATTEMPTS {
        let (mut stored, mode) = match registry.signing_keys(scope, namespace).await {
            Ok(keys) => (keys, PutMode::Overwrite),
            Err(StorageError::NotFound(_)) => (SigningKeys::default(), PutMode::Create),
            Err(e) => return Err(e),
        };
        let before = stored.gpg_public_keys.len();
        for key in &upstream_keys.gpg_public_keys {
            let keys = &mut stored.gpg_public_keys;
            if !keys.iter().any(|k| k.key_id == key.key_id) {
                keys.push(key.clone());
            }
        }
        if stored.gpg_public_keys.len() == before && mode == PutMode::Overwrite {
            return Ok(());
        }
        match registry
            .put_signing_keys(scope, namespace, &stored, mode)
            .await
        {
            Err(StorageError::AlreadyExists(_)) => continue,
            result => return result,
        }
    }
    Err(StorageError::AlreadyExists(format!(
        "signing keys for {namespace} kept changing while merging"
    )))
}

fn once(data: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Pass `stream` through, failing at the end if its SHA-256 is not
/// `expected`. The failure aborts the upload consuming the stream.
fn verify_digest(mut stream: ByteStream, expected: [u8; 32], filename: String) -> ByteStream {
    Box::pin(async_stream::try_stream! {
        let mut hasher = Sha256::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            yield chunk;
        }
        let actual: [u8; 32] = hasher.finalize().into();
        if actual != expected {
            Err::<(), _>(StorageError::Core(boring_core::Error::InvalidSha256Sums(format!(
                "checksum mismatch for {filename}"
            ))))?;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use boring_core::config::RegistryConfig;
    use boring_core::{GpgPublicKey, Provider, ProviderVersion};
    use boring_storage::{MemoryBackend, ObjectStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const SUMS: &[u8] =
        include_bytes!("../../../../testdata/release/terraform-provider-random_3.1.0_SHA256SUMS");
    const SIG: &[u8] =
        include_bytes!("../../../../testdata/release/terraform-provider-random_3.1.0_SHA256SUMS.sig");
    const ARCHIVE: &[u8] =
        include_bytes!("../../../../testdata/release/terraform-provider-random_3.1.0_linux_amd64.zip");
    const KEYS: &[u8] = include_bytes!("../../../../testdata/signing-keys.json");

    struct FakeUpstream {
        archive: Bytes,
        archive_fetches: AtomicUsize,
        delay: Duration,
    }

    impl FakeUpstream {
        fn new(archive: &'static [u8]) -> Self {
            Self {
                archive: Bytes::from_static(archive),
                archive_fetches: AtomicUsize::new(0),
                delay: Duration::from_millis(50),
            }
        }
    }

    #[async_trait]
    impl Upstream for FakeUpstream {
        async fn versions_url(
            &self,
            hostname: &str,
            ns: &str,
            name: &str,
        ) -> Result<String, UpstreamError> {
            Ok(format!("https://{hostname}/v1/providers/{ns}/{name}/versions"))
        }

        async fn provider_versions(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<Vec<ProviderVersion>, UpstreamError> {
            Ok(vec![])
        }

        async fn download_info(
            &self,
            _: &str,
            provider: &ProviderIdentity,
        ) -> Result<Provider, UpstreamError> {
            let filename = provider.archive_filename();
            let shasum = Sha256Sums::parse(SUMS).unwrap().hex(&filename).unwrap();
            Ok(Provider {
                namespace: provider.namespace.clone(),
                name: provider.name.clone(),
                version: provider.version.clone(),
                protocols: vec!["5.0".into()],
                os: provider.os.clone(),
                arch: provider.arch.clone(),
                filename,
                download_url: "archive".into(),
                shasums_url: "sums".into(),
                shasums_signature_url: "sig".into(),
                shasum,
                signing_keys: SigningKeys::from_json(KEYS).unwrap(),
            })
        }

        async fn fetch(&self, url: &str) -> Result<Bytes, UpstreamError> {
            match url {
                "sums" => Ok(Bytes::from_static(SUMS)),
                "sig" => Ok(Bytes::from_static(SIG)),
                other => Err(UpstreamError::NotFound(other.to_string())),
            }
        }

        async fn fetch_stream(&self, _: &str) -> Result<ByteStream, UpstreamError> {
            self.archive_fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(once(self.archive.clone()))
        }
    }

    fn key() -> CopyKey {
        let provider =
            ProviderIdentity::new("hashicorp", "random", "3.1.0", "linux", "amd64").unwrap();
        CopyKey {
            hostname: "registry.terraform.io".to_string(),
            provider,
        }
    }

    fn mirror(upstream: Arc<FakeUpstream>) -> (PullThroughMirror, RegistryStorage) {
        let registry =
            RegistryStorage::new(Arc::new(MemoryBackend::new()), &RegistryConfig::default());
        (PullThroughMirror::new(registry.clone(), upstream), registry)
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_copy() {
        let upstream = Arc::new(FakeUpstream::new(ARCHIVE));
        let (mirror, registry) = mirror(Arc::clone(&upstream));

        let jobs: Vec<CopyJob> = (0..8).map(|_| mirror.ensure_copy(key())).collect();
        assert_eq!(jobs.iter().filter(|j| j.started()).count(), 1);
        for job in jobs {
            assert_eq!(job.wait().await, CopyOutcome::Copied);
        }
        assert_eq!(upstream.archive_fetches.load(Ordering::SeqCst), 1);
        assert_eq!(mirror.in_flight(), 0);

        let scope = ProviderScope::Mirror {
            hostname: "registry.terraform.io",
        };
        let archives = registry
            .release_archives(scope, "hashicorp", "random", "3.1.0")
            .await
            .unwrap();
        assert_eq!(archives.len(), 1);
        assert!(registry.signing_keys(scope, "hashicorp").await.is_ok());
    }

    #[tokio::test]
    async fn tampered_archive_is_discarded() {
        let upstream = Arc::new(FakeUpstream::new(b"not the archive"));
        let (mirror, registry) = mirror(upstream);

        let outcome = mirror.ensure_copy(key()).wait().await;
        assert!(matches!(outcome, CopyOutcome::Failed(_)));

        let scope = ProviderScope::Mirror {
            hostname: "registry.terraform.io",
        };
        let archive_key = registry
            .layout()
            .provider_archive_key(scope, &key().provider);
        assert!(!registry.store().exists(&archive_key).await.unwrap());

        // A failed job does not block a retry.
        assert!(mirror.ensure_copy(key()).started());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_key_merges_keep_every_key() {
        let registry =
            RegistryStorage::new(Arc::new(MemoryBackend::new()), &RegistryConfig::default());
        let key_merge = Arc::new(AsyncMutex::new(()));
        let scope = ProviderScope::Mirror {
            hostname: "registry.terraform.io",
        };

        let merges: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                let key_merge = Arc::clone(&key_merge);
                tokio::spawn(async move {
                    let keys = SigningKeys {
                        gpg_public_keys: vec![GpgPublicKey {
                            key_id: format!("KEY{i}"),
                            ascii_armor: "armor".to_string(),
                            trust_signature: None,
                            source: None,
                            source_url: None,
                        }],
                    };
                    let _merging = key_merge.lock().await;
                    merge_signing_keys(&registry, scope, "hashicorp", &keys).await
                })
            })
            .collect();
        for merge in merges {
            merge.await.unwrap().unwrap();
        }

        let stored = registry.signing_keys(scope, "hashicorp").await.unwrap();
        assert_eq!(stored.gpg_public_keys.len(), 8);
    }
}
