//! Module publishing: discover `boring-registry.hcl` files, archive each
//! module directory and upload it.

use crate::PublishSummary;
use crate::archive::{self, Exclusions};
use crate::error::{PublishError, PublishResult};
use crate::metadata::ModuleMetadata;
use boring_core::{MODULE_METADATA_FILE, ModuleIdentity, VersionConstraints};
use boring_storage::{RegistryStorage, StorageError};
use regex::Regex;
use std::path::{Path, PathBuf};

/// Flags controlling `upload module`.
#[derive(Clone, Debug)]
pub struct ModuleOptions {
    /// Version for modules whose metadata does not declare one.
    pub version: Option<String>,
    /// Treat modules that are already stored as skipped instead of failing.
    pub ignore_existing: bool,
    pub constraints: Option<VersionConstraints>,
    pub version_regex: Option<Regex>,
    pub exclusions: Exclusions,
    /// Search subdirectories for metadata files, not just the given one.
    pub recursive: bool,
}

impl Default for ModuleOptions {
    fn default() -> Self {
        Self {
            version: None,
            ignore_existing: true,
            constraints: None,
            version_regex: None,
            exclusions: Exclusions::default(),
            recursive: true,
        }
    }
}

enum Outcome {
    Uploaded,
    Skipped,
}

pub struct ModulePublisher {
    registry: RegistryStorage,
    options: ModuleOptions,
}

impl ModulePublisher {
    pub fn new(registry: RegistryStorage, options: ModuleOptions) -> Self {
        Self { registry, options }
    }

    /// Publish every module found under `dir`.
    ///
    /// Stops at the first module that fails; modules published before it
    /// stay published.
    pub async fn publish_dir(&self, dir: &Path) -> PublishResult<PublishSummary> {
        let root = dir.to_path_buf();
        let recursive = self.options.recursive;
        let exclusions = self.options.exclusions.clone();
        let metadata_files =
            tokio::task::spawn_blocking(move || discover(&root, recursive, &exclusions)).await??;
        if metadata_files.is_empty() {
            tracing::warn!(dir = %dir.display(), "no {MODULE_METADATA_FILE} files found");
        }

        let mut summary = PublishSummary::default();
        for path in metadata_files {
            let metadata = ModuleMetadata::read(&path).await?;
            let module = metadata.identity(&path, self.options.version.as_deref())?;
            match self.publish_module(&path, &module).await? {
                Outcome::Uploaded => summary.uploaded.push(module.to_string()),
                Outcome::Skipped => summary.skipped.push(module.to_string()),
            }
        }
        Ok(summary)
    }

    /// Whether `module` passes the configured version filters.
    fn wanted(&self, module: &ModuleIdentity) -> PublishResult<bool> {
        if let Some(constraints) = &self.options.constraints {
            if !constraints.check(&module.semver()?) {
                tracing::info!(
                    module = %module,
                    constraints = %constraints,
                    "version does not satisfy constraints, skipping"
                );
                return Ok(false);
            }
        }
        if let Some(regex) = &self.options.version_regex {
            if !regex.is_match(&module.version) {
                tracing::info!(
                    module = %module,
                    regex = %regex,
                    "version does not match regex, skipping"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn publish_module(
        &self,
        metadata_path: &Path,
        module: &ModuleIdentity,
    ) -> PublishResult<Outcome> {
        if !self.wanted(module)? {
            return Ok(Outcome::Skipped);
        }
        if self.registry.module_exists(module).await? {
            return self.existing(module);
        }

        let root = metadata_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();
        let exclusions = self.options.exclusions.clone();
        let archive =
            tokio::task::spawn_blocking(move || archive::build(&root, &exclusions)).await??;

        let stream = archive::file_stream(archive.path()).await?;
        match self.registry.upload_module(module, stream).await {
            Ok(size) => {
                tracing::info!(module = %module, size, "module published");
                Ok(Outcome::Uploaded)
            }
            // Lost a race with another publisher.
            Err(StorageError::AlreadyExists(_)) => self.existing(module),
            Err(e) => Err(e.into()),
        }
    }

    fn existing(&self, module: &ModuleIdentity) -> PublishResult<Outcome> {
        if self.options.ignore_existing {
            tracing::info!(module = %module, "module already exists, skipping");
            Ok(Outcome::Skipped)
        } else {
            Err(PublishError::AlreadyExists(module.to_string()))
        }
    }
}

/// Metadata files below `root`, sorted. Excluded directories are not entered.
fn discover(root: &Path, recursive: bool, exclusions: &Exclusions) -> PublishResult<Vec<PathBuf>> {
    if !recursive {
        let candidate = root.join(MODULE_METADATA_FILE);
        return Ok(if candidate.is_file() {
            vec![candidate]
        } else {
            Vec::new()
        });
    }

    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir).map_err(PublishError::io(&dir))? {
            let entry = entry.map_err(PublishError::io(&dir))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(PublishError::io(&path))?;
            if file_type.is_dir() {
                if !exclusions.is_excluded(&archive::header_name(root, &path)) {
                    pending.push(path);
                }
            } else if file_type.is_file() && entry.file_name() == MODULE_METADATA_FILE {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}
