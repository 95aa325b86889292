//! Provider registry protocol (`/v1/providers`).

use super::common::{Caller, RequestRoot, check_segments};
use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use boring_core::layout::ProviderScope;
use boring_core::{Provider, ProviderIdentity, ProviderVersion};
use serde::Serialize;

const PROVIDER_ACCESS: &str = "registry.provider_access";

#[derive(Debug, Serialize)]
pub struct ProviderVersionsResponse {
    pub versions: Vec<ProviderVersion>,
}

/// GET /v1/providers/{namespace}/{name}/versions
pub async fn list_provider_versions(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    caller: Caller,
) -> ApiResult<Json<ProviderVersionsResponse>> {
    check_segments([("namespace", namespace.as_str()), ("name", name.as_str())])?;

    let versions = state
        .registry
        .list_provider_versions(ProviderScope::Hosted, &namespace, &name)
        .await?;
    caller.audit(&state, PROVIDER_ACCESS, "list", format!("{namespace}/{name}"));

    Ok(Json(ProviderVersionsResponse { versions }))
}

/// GET /v1/providers/{namespace}/{name}/{version}/download/{os}/{arch}
pub async fn download_provider(
    State(state): State<AppState>,
    Path((namespace, name, version, os, arch)): Path<(String, String, String, String, String)>,
    root: RequestRoot,
    caller: Caller,
) -> ApiResult<Json<Provider>> {
    let identity = ProviderIdentity::new(namespace, name, version, os, arch)?;
    let release = state
        .registry
        .get_provider(ProviderScope::Hosted, &identity)
        .await?;
    caller.audit(&state, PROVIDER_ACCESS, "download", identity.to_string());

    let root = root.as_str();
    Ok(Json(Provider {
        namespace: identity.namespace.clone(),
        name: identity.name.clone(),
        version: identity.version.clone(),
        protocols: release.protocols,
        os: identity.os.clone(),
        arch: identity.arch.clone(),
        filename: release.filename,
        download_url: state.proxy.download_url(root, release.archive),
        shasums_url: state.proxy.download_url(root, release.shasums),
        shasums_signature_url: state.proxy.download_url(root, release.shasums_signature),
        shasum: release.shasum,
        signing_keys: release.signing_keys,
    }))
}
