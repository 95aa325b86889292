//! Download proxy (`/v1/proxy/...`).

use super::common::{attachment, stream_object};
use crate::error::ApiResult;
use crate::proxy::{ProxyError, ProxyTarget};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_DISPOSITION, HeaderName};
use axum::http::{HeaderMap, Response};
use time::OffsetDateTime;

/// Headers that describe a single connection and are never forwarded.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// GET /v1/proxy/{target}
pub async fn proxy_unsigned(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> ApiResult<Response<Body>> {
    let target = state.proxy.resolve_unsigned(&target)?;
    serve(&state, target).await
}

/// GET /v1/proxy/{signature}/{expiry}/{target}
pub async fn proxy_signed(
    State(state): State<AppState>,
    Path((signature, expiry, target)): Path<(String, String, String)>,
) -> ApiResult<Response<Body>> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let target = state
        .proxy
        .resolve_signed(&signature, &expiry, &target, now)?;
    serve(&state, target).await
}

async fn serve(state: &AppState, target: ProxyTarget) -> ApiResult<Response<Body>> {
    match &target {
        ProxyTarget::Storage(key) => {
            if !state.registry.layout().is_registry_key(key) {
                return Err(ProxyError::BadUrl(format!("{key} is outside the registry")).into());
            }
            stream_object(state.registry.store().as_ref(), key).await
        }
        ProxyTarget::Remote(url) => stream_remote(&state.http, url, target.file_name()).await,
    }
}

/// Relay a remote download: status, end-to-end headers and body are passed
/// through unbuffered.
async fn stream_remote(
    client: &reqwest::Client,
    url: &str,
    file_name: Option<String>,
) -> ApiResult<Response<Body>> {
    let upstream = client
        .get(url)
        .send()
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;

    let status = upstream.status();
    let mut headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    if !headers.contains_key(CONTENT_DISPOSITION)
        && let Some(disposition) = file_name.as_deref().and_then(attachment)
    {
        headers.insert(CONTENT_DISPOSITION, disposition);
    }
    if !status.is_success() {
        tracing::warn!(url, status = status.as_u16(), "proxied download returned an error status");
    }

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}
