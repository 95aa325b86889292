//! Migration of legacy root-level keys into the canonical layout.

use super::RegistryStorage;
use crate::error::StorageResult;
use crate::traits::ObjectStoreListExt;
use boring_core::layout::{LEGACY_PREFIX, LegacyObject};
use futures::TryStreamExt;
use tracing::instrument;

/// Which legacy objects to migrate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationKind {
    Modules,
    Providers,
}

/// Outcome of a migration run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub dry_run: bool,
    /// `(legacy key, canonical key)` pairs copied (or, on a dry run, planned).
    pub migrated: Vec<(String, String)>,
    /// Legacy keys whose canonical copy already existed with the same size.
    pub skipped: Vec<String>,
    /// `(legacy key, reason)` pairs left in place.
    pub failed: Vec<(String, String)>,
}

impl MigrationReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

enum Outcome {
    Migrated,
    Skipped,
}

impl RegistryStorage {
    pub async fn migrate_modules(&self, dry_run: bool) -> StorageResult<MigrationReport> {
        self.migrate(MigrationKind::Modules, dry_run).await
    }

    pub async fn migrate_providers(&self, dry_run: bool) -> StorageResult<MigrationReport> {
        self.migrate(MigrationKind::Providers, dry_run).await
    }

    /// Copy every legacy object of `kind` to its canonical key, verify the
    /// copy, then delete the legacy key. Per-object failures are recorded in
    /// the report; only a failed listing aborts the run.
    #[instrument(skip(self))]
    pub async fn migrate(
        &self,
        kind: MigrationKind,
        dry_run: bool,
    ) -> StorageResult<MigrationReport> {
        let mut report = MigrationReport {
            dry_run,
            ..Default::default()
        };

        // Collect first so deletes do not race the listing.
        let legacy: Vec<_> = self.store.list_entries(LEGACY_PREFIX).try_collect().await?;

        for entry in legacy {
            let canonical = match (kind, self.layout.canonical_from_legacy(&entry.key)) {
                (MigrationKind::Modules, Some(LegacyObject::Module { canonical_key, .. })) => {
                    canonical_key
                }
                (MigrationKind::Providers, Some(LegacyObject::ProviderFile { canonical_key })) => {
                    canonical_key
                }
                (_, None) => {
                    tracing::debug!(key = %entry.key, "not a recognised legacy key");
                    continue;
                }
                _ => continue,
            };

            if dry_run {
                tracing::info!(from = %entry.key, to = %canonical, "would migrate");
                report.migrated.push((entry.key, canonical));
                continue;
            }

            match self.migrate_one(&entry.key, &canonical, entry.size).await {
                Ok(Outcome::Migrated) => {
                    tracing::info!(from = %entry.key, to = %canonical, "migrated");
                    report.migrated.push((entry.key, canonical));
                }
                Ok(Outcome::Skipped) => {
                    tracing::info!(
                        from = %entry.key,
                        to = %canonical,
                        "canonical copy already present"
                    );
                    report.skipped.push(entry.key);
                }
                Err(reason) => {
                    tracing::error!(key = %entry.key, reason = %reason, "migration failed");
                    report.failed.push((entry.key, reason));
                }
            }
        }

        tracing::info!(
            ?kind,
            dry_run,
            migrated = report.migrated.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "migration finished"
        );
        Ok(report)
    }

    async fn migrate_one(&self, from: &str, to: &str, size: u64) -> Result<Outcome, String> {
        let existing = match self.store.head(to).await {
            Ok(meta) => Some(meta.size),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.to_string()),
        };

        let outcome = match existing {
            Some(existing) if existing == size => Outcome::Skipped,
            Some(existing) => {
                return Err(format!(
                    "canonical key {to} exists with size {existing}, legacy object has {size}"
                ));
            }
            None => {
                self.store.copy(from, to).await.map_err(|e| e.to_string())?;
                let copied = self.store.head(to).await.map_err(|e| e.to_string())?;
                if copied.size != size {
                    return Err(format!(
                        "copy verification failed: expected {size} bytes, found {}",
                        copied.size
                    ));
                }
                Outcome::Migrated
            }
        };

        // The legacy object goes only once the canonical one is confirmed.
        self.store.delete(from).await.map_err(|e| e.to_string())?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_support::registry;
    use crate::traits::{ObjectStore, PutMode};
    use bytes::Bytes;

    const LEGACY_MODULE: &str =
        "namespace=acme/name=tls/provider=aws/version=0.1.0/acme-tls-aws-0.1.0.tar.gz";
    const LEGACY_ARCHIVE: &str =
        "namespace=hashicorp/name=random/version=3.1.0/terraform-provider-random_3.1.0_linux_amd64.zip";
    const LEGACY_KEYS: &str = "namespace=hashicorp/signing-keys.json";

    async fn seed(store: &dyn ObjectStore) {
        for key in [LEGACY_MODULE, LEGACY_ARCHIVE, LEGACY_KEYS, "namespace=junk/file"] {
            store
                .put(key, Bytes::from("data"), PutMode::Overwrite)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn dry_run_changes_nothing() {
        let (registry, backend) = registry();
        seed(&backend).await;

        let report = registry.migrate_modules(true).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.migrated.len(), 1);
        assert!(backend.exists(LEGACY_MODULE).await.unwrap());
        assert!(!backend.exists(&report.migrated[0].1).await.unwrap());
    }

    #[tokio::test]
    async fn modules_move_to_canonical_keys() {
        let (registry, backend) = registry();
        seed(&backend).await;

        let report = registry.migrate_modules(false).await.unwrap();
        assert!(report.is_success());
        assert_eq!(
            report.migrated,
            vec![(
                LEGACY_MODULE.to_string(),
                format!("modules/{LEGACY_MODULE}")
            )]
        );
        assert!(!backend.exists(LEGACY_MODULE).await.unwrap());
        let versions = registry
            .list_module_versions("acme", "tls", "aws")
            .await
            .unwrap();
        assert_eq!(versions, vec!["0.1.0"]);
        // Provider objects are untouched by a module migration.
        assert!(backend.exists(LEGACY_ARCHIVE).await.unwrap());
    }

    #[tokio::test]
    async fn providers_move_archives_and_signing_keys() {
        let (registry, backend) = registry();
        seed(&backend).await;

        let report = registry.migrate_providers(false).await.unwrap();
        assert_eq!(report.migrated.len(), 2);
        for key in [
            format!("providers/{LEGACY_ARCHIVE}"),
            "providers/namespace=hashicorp/signing-keys.json".to_string(),
        ] {
            assert!(backend.exists(&key).await.unwrap(), "{key}");
        }
        assert!(backend.exists("namespace=junk/file").await.unwrap());
    }

    #[tokio::test]
    async fn existing_canonical_copy_is_skipped_or_flagged() {
        let (registry, backend) = registry();
        seed(&backend).await;
        let canonical = format!("modules/{LEGACY_MODULE}");
        backend
            .put(&canonical, Bytes::from("data"), PutMode::Overwrite)
            .await
            .unwrap();

        let report = registry.migrate_modules(false).await.unwrap();
        assert_eq!(report.skipped, vec![LEGACY_MODULE.to_string()]);
        assert!(!backend.exists(LEGACY_MODULE).await.unwrap());

        backend
            .put(LEGACY_MODULE, Bytes::from("different"), PutMode::Overwrite)
            .await
            .unwrap();
        let report = registry.migrate_modules(false).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(backend.exists(LEGACY_MODULE).await.unwrap());
        assert_eq!(backend.get(&canonical).await.unwrap(), Bytes::from("data"));
    }
}
