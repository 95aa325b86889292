//! Provider network mirror protocol (`/v1/mirror/{hostname}/...`).
//!
//! Without pull-through the mirror only serves what is already stored under
//! the hostname's mirror tree. With pull-through, misses are copied from the
//! upstream registry in the background:
//! - `index.json` merges local and upstream versions
//! - `<v>.json` redirects to the upstream versions document while the
//!   platform archives are copied
//! - archives redirect to the upstream download while the shared copy job
//!   runs, then stream from storage

use super::common::{Caller, RequestRoot, check_segments, stream_object};
use crate::error::{ApiError, ApiResult};
use crate::metrics::{MIRROR_CACHE_HITS, MIRROR_CACHE_MISSES};
use crate::mirror::{CopyKey, PullThroughMirror, UpstreamError};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::LOCATION;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use boring_core::layout::ProviderScope;
use boring_core::{Platform, ProviderIdentity, ReleaseFile, ReleaseFileKind};
use boring_storage::{ReleaseArchive, StorageError};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

const PROVIDER_ACCESS: &str = "registry.provider_access";

#[derive(Debug, Serialize)]
pub struct MirrorIndex {
    pub versions: BTreeMap<String, EmptyObject>,
}

#[derive(Debug, Default, Serialize)]
pub struct EmptyObject {}

#[derive(Debug, Serialize)]
pub struct MirrorVersion {
    pub archives: BTreeMap<String, MirrorArchive>,
}

#[derive(Debug, Serialize)]
pub struct MirrorArchive {
    pub url: String,
    pub hashes: Vec<String>,
}

/// `h1:` hash of an archive digest as listed in a version document.
pub fn h1_hash(sha256: &[u8; 32]) -> String {
    format!("h1:{}", STANDARD.encode(sha256))
}

fn redirect(location: &str) -> ApiResult<Response> {
    Ok((StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response())
}

/// GET /v1/mirror/{hostname}/{namespace}/{name}/{file}
///
/// `file` is `index.json`, `<version>.json` or a platform archive.
pub async fn mirror_file(
    State(state): State<AppState>,
    Path((hostname, namespace, name, file)): Path<(String, String, String, String)>,
    root: RequestRoot,
    caller: Caller,
) -> ApiResult<Response> {
    if !state.config.mirror.enabled {
        return Err(ApiError::NotFound("provider mirror is disabled".to_string()));
    }
    check_segments([
        ("hostname", hostname.as_str()),
        ("namespace", namespace.as_str()),
        ("name", name.as_str()),
    ])?;
    let request = MirrorRequest {
        state: &state,
        hostname: &hostname,
        namespace: &namespace,
        name: &name,
    };

    let response = if file == "index.json" {
        with_write_timeout(&state, request.index()).await?
    } else if file.ends_with(".zip") {
        request.archive(&file, root.as_str()).await?
    } else if let Some(version) = file.strip_suffix(".json") {
        with_write_timeout(&state, request.version(version)).await?
    } else {
        return Err(ApiError::NotFound(format!("mirror file {file}")));
    };

    let action = if file.ends_with(".zip") {
        "download"
    } else {
        "view"
    };
    caller.audit(
        &state,
        PROVIDER_ACCESS,
        action,
        format!("{hostname}/{namespace}/{name}/{file}"),
    );
    Ok(response)
}

/// Mirror metadata answers are bounded by the write timeout; archive
/// downloads are not.
async fn with_write_timeout(
    state: &AppState,
    fut: impl Future<Output = ApiResult<Response>>,
) -> ApiResult<Response> {
    tokio::time::timeout(state.config.server.write_timeout(), fut)
        .await
        .map_err(|_| ApiError::Unavailable("mirror request timed out".to_string()))?
}

struct MirrorRequest<'a> {
    state: &'a AppState,
    hostname: &'a str,
    namespace: &'a str,
    name: &'a str,
}

impl MirrorRequest<'_> {
    fn scope(&self) -> ProviderScope<'_> {
        ProviderScope::Mirror {
            hostname: self.hostname,
        }
    }

    fn pull_through(&self) -> Option<&PullThroughMirror> {
        self.state.pull_through.as_deref()
    }

    async fn index(&self) -> ApiResult<Response> {
        let mut versions = BTreeSet::new();
        match self
            .state
            .registry
            .list_provider_versions(self.scope(), self.namespace, self.name)
            .await
        {
            Ok(local) => versions.extend(local.into_iter().map(|v| v.version)),
            Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(mirror) = self.pull_through() {
            match mirror
                .upstream()
                .provider_versions(self.hostname, self.namespace, self.name)
                .await
            {
                Ok(upstream) => versions.extend(upstream.into_iter().map(|v| v.version)),
                Err(e) => tracing::warn!(
                    hostname = self.hostname,
                    namespace = self.namespace,
                    name = self.name,
                    error = %e,
                    "upstream versions unavailable, serving local versions only"
                ),
            }
        }

        if versions.is_empty() {
            return Err(ApiError::NotFound(format!(
                "provider {}/{}/{}",
                self.hostname, self.namespace, self.name
            )));
        }
        Ok(Json(MirrorIndex {
            versions: versions
                .into_iter()
                .map(|v| (v, EmptyObject::default()))
                .collect(),
        })
        .into_response())
    }

    async fn version(&self, version: &str) -> ApiResult<Response> {
        check_segments([("version", version)])?;
        let local = self
            .state
            .registry
            .release_archives(self.scope(), self.namespace, self.name, version)
            .await;

        let archives = match (local, self.pull_through()) {
            (Ok(archives), None) => archives,
            (Ok(archives), Some(mirror)) => {
                if self.is_incomplete(version, &archives).await? {
                    MIRROR_CACHE_MISSES.inc();
                    return self.start_version_copy(mirror, version).await;
                }
                MIRROR_CACHE_HITS.inc();
                archives
            }
            (Err(StorageError::NotFound(_)), Some(mirror)) => {
                MIRROR_CACHE_MISSES.inc();
                return self.start_version_copy(mirror, version).await;
            }
            (Err(e), _) => return Err(e.into()),
        };

        Ok(Json(MirrorVersion {
            archives: archives
                .into_iter()
                .map(|archive| {
                    (
                        archive.platform.to_string(),
                        MirrorArchive {
                            url: archive.filename,
                            hashes: vec![h1_hash(&archive.sha256)],
                        },
                    )
                })
                .collect(),
        })
        .into_response())
    }

    /// Whether the stored SHA256SUMS lists platforms with no stored archive.
    async fn is_incomplete(&self, version: &str, archives: &[ReleaseArchive]) -> ApiResult<bool> {
        let sums = self
            .state
            .registry
            .sha256sums(self.scope(), self.namespace, self.name, version)
            .await?;
        let stored: BTreeSet<&Platform> = archives.iter().map(|a| &a.platform).collect();
        Ok(sums.platforms().iter().any(|p| !stored.contains(p)))
    }

    /// Queue copies of the upstream platforms of `version` that are not
    /// stored yet and send the client to the upstream versions document
    /// meanwhile.
    async fn start_version_copy(
        &self,
        mirror: &PullThroughMirror,
        version: &str,
    ) -> ApiResult<Response> {
        let upstream = mirror.upstream();
        let versions = upstream
            .provider_versions(self.hostname, self.namespace, self.name)
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?;
        let release = versions
            .into_iter()
            .find(|v| v.version == version)
            .ok_or_else(|| {
                ApiError::NotFound(format!(
                    "provider {}/{}/{} {version}",
                    self.hostname, self.namespace, self.name
                ))
            })?;

        for platform in &release.platforms {
            let file = ReleaseFile::archive(self.name, version, &platform.os, &platform.arch);
            if self
                .state
                .registry
                .provider_file_exists(self.scope(), self.namespace, &file)
                .await?
            {
                continue;
            }
            let provider = ProviderIdentity::new(
                self.namespace,
                self.name,
                version,
                &platform.os,
                &platform.arch,
            )?;
            self.ensure_copy(mirror, provider);
        }

        let location = upstream
            .versions_url(self.hostname, self.namespace, self.name)
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?;
        redirect(&location)
    }

    fn ensure_copy(&self, mirror: &PullThroughMirror, provider: ProviderIdentity) {
        let platform = provider.platform();
        let job = mirror.ensure_copy(CopyKey {
            hostname: self.hostname.to_string(),
            provider,
        });
        if job.started() {
            tracing::info!(
                hostname = self.hostname,
                namespace = self.namespace,
                name = self.name,
                platform = %platform,
                "pull-through copy started"
            );
        }
    }

    async fn archive(&self, file: &str, root: &str) -> ApiResult<Response> {
        let release = ReleaseFile::parse(file)?;
        let ReleaseFileKind::Archive { os, arch, .. } = &release.kind else {
            return Err(ApiError::NotFound(format!("mirror file {file}")));
        };
        if release.name != self.name {
            return Err(ApiError::Invalid(format!(
                "{file} does not belong to provider {}",
                self.name
            )));
        }
        let provider =
            ProviderIdentity::new(self.namespace, self.name, &release.version, os, arch)?;
        let registry = &self.state.registry;
        let key = registry
            .layout()
            .provider_archive_key(self.scope(), &provider);

        let stored = registry.store().exists(&key).await?;
        let Some(mirror) = self.pull_through() else {
            if !stored {
                return Err(ApiError::NotFound(format!("mirror file {file}")));
            }
            let location = registry.locate(&key).await?;
            return redirect(&self.state.proxy.download_url(root, location));
        };

        if stored {
            MIRROR_CACHE_HITS.inc();
            return stream_object(registry.store().as_ref(), &key).await;
        }

        // Not stored yet: copy in the background and send the client
        // upstream until the copy lands.
        MIRROR_CACHE_MISSES.inc();
        let info = mirror
            .upstream()
            .download_info(self.hostname, &provider)
            .await
            .map_err(|e| match e {
                UpstreamError::NotFound(_) => ApiError::NotFound(format!("mirror file {file}")),
                e => ApiError::Upstream(e.to_string()),
            })?;
        self.ensure_copy(mirror, provider);
        redirect(&info.download_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn h1_hash_is_base64_of_digest() {
        assert_eq!(
            h1_hash(&[0u8; 32]),
            "h1:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="
        );
    }

    #[test]
    fn index_renders_empty_objects() {
        let index = MirrorIndex {
            versions: [("3.1.0".to_string(), EmptyObject::default())].into(),
        };
        assert_eq!(
            serde_json::to_value(index).unwrap(),
            serde_json::json!({"versions": {"3.1.0": {}}})
        );
    }
}
