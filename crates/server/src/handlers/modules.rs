//! Module registry protocol (`/v1/modules`).

use super::common::{Caller, RequestRoot, check_segments};
use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use boring_core::ModuleIdentity;
use serde::Serialize;

/// Header carrying the module download location.
pub const TERRAFORM_GET: &str = "x-terraform-get";

const MODULE_ACCESS: &str = "registry.module_access";

#[derive(Debug, Serialize)]
pub struct ModuleVersionsResponse {
    pub modules: Vec<ModuleVersions>,
}

#[derive(Debug, Serialize)]
pub struct ModuleVersions {
    pub versions: Vec<ModuleVersion>,
}

#[derive(Debug, Serialize)]
pub struct ModuleVersion {
    pub version: String,
}

/// GET /v1/modules/{namespace}/{name}/{provider}/versions
pub async fn list_module_versions(
    State(state): State<AppState>,
    Path((namespace, name, provider)): Path<(String, String, String)>,
    caller: Caller,
) -> ApiResult<Json<ModuleVersionsResponse>> {
    check_segments([
        ("namespace", namespace.as_str()),
        ("name", name.as_str()),
        ("provider", provider.as_str()),
    ])?;

    let versions = state
        .registry
        .list_module_versions(&namespace, &name, &provider)
        .await?;
    caller.audit(&state, MODULE_ACCESS, "list", format!("{namespace}/{name}/{provider}"));

    Ok(Json(ModuleVersionsResponse {
        modules: vec![ModuleVersions {
            versions: versions
                .into_iter()
                .map(|version| ModuleVersion { version })
                .collect(),
        }],
    }))
}

/// GET /v1/modules/{namespace}/{name}/{provider}/{version}/download
///
/// Answers 204 with the archive location in `X-Terraform-Get`.
pub async fn download_module(
    State(state): State<AppState>,
    Path((namespace, name, provider, version)): Path<(String, String, String, String)>,
    root: RequestRoot,
    caller: Caller,
) -> ApiResult<Response> {
    let module = ModuleIdentity::new(namespace, name, provider, version)?;
    let artifact = state.registry.get_module(&module).await?;
    let url = state.proxy.download_url(root.as_str(), artifact.location);
    caller.audit(&state, MODULE_ACCESS, "download", module.to_string());

    tracing::debug!(module = %module, key = %artifact.key, "module download resolved");
    Ok((StatusCode::NO_CONTENT, [(TERRAFORM_GET, url)]).into_response())
}
