//! Shared handler helpers.

use crate::audit::{AuditEvent, ClientInfo};
use crate::auth::UserContext;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use boring_storage::ObjectStore;
use futures::StreamExt;
use std::convert::Infallible;
use std::time::Instant;

/// Reject path variables that cannot appear inside an object key.
pub fn check_segments<'a>(segments: impl IntoIterator<Item = (&'a str, &'a str)>) -> ApiResult<()> {
    for (field, value) in segments {
        boring_core::module::validate_component(field, value).map_err(ApiError::Invalid)?;
    }
    Ok(())
}

/// Externally visible root URL of this request, without trailing slash.
///
/// `server.public_url` wins; otherwise the `Host` header and
/// `X-Forwarded-Proto` are used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestRoot(pub String);

impl RequestRoot {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromRequestParts<AppState> for RequestRoot {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(url) = &state.config.server.public_url {
            return Ok(Self(url.trim_end_matches('/').to_string()));
        }
        let host = parts
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| parts.uri.authority().map(|a| a.as_str()))
            .unwrap_or("localhost");
        let default_scheme = if state.config.server.tls_cert_file.is_some() {
            "https"
        } else {
            "http"
        };
        let scheme = parts
            .headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|s| matches!(*s, "http" | "https"))
            .unwrap_or(default_scheme);
        Ok(Self(format!("{scheme}://{host}")))
    }
}

/// Who is calling and since when, for audit events.
pub struct Caller {
    pub client: ClientInfo,
    pub user: Option<UserContext>,
    started: Instant,
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self {
            client: ClientInfo::from_parts(&parts.headers, parts.extensions.get()),
            user: parts.extensions.get::<UserContext>().cloned(),
            started: Instant::now(),
        })
    }
}

impl Caller {
    pub fn audit(
        &self,
        state: &AppState,
        event: &'static str,
        action: &'static str,
        resource: impl Into<String>,
    ) {
        state.audit.record(
            AuditEvent::new(event, action, &self.client, self.started)
                .with_user(self.user.clone())
                .with_resource(resource),
        );
    }
}

pub fn attachment(file_name: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\"")).ok()
}

fn content_type(file_name: &str) -> &'static str {
    if file_name.ends_with(".zip") {
        "application/zip"
    } else if file_name.ends_with(".tar.gz") || file_name.ends_with(".tgz") {
        "application/gzip"
    } else if file_name.ends_with(".json") {
        "application/json"
    } else {
        "application/octet-stream"
    }
}

/// Stream an object from storage as a download.
pub async fn stream_object(store: &dyn ObjectStore, key: &str) -> ApiResult<Response> {
    let meta = store.head(key).await?;
    let stream = store
        .get_stream(key)
        .await?
        .map(|result| result.map_err(|e| std::io::Error::other(e.to_string())));

    let file_name = boring_core::layout::file_name(key);
    let mut response = (
        StatusCode::OK,
        [
            (CONTENT_TYPE, content_type(file_name).to_string()),
            (CONTENT_LENGTH, meta.size.to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response();
    if let Some(disposition) = attachment(file_name) {
        response
            .headers_mut()
            .insert(CONTENT_DISPOSITION, disposition);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_with_key_syntax_are_rejected() {
        assert!(check_segments([("namespace", "acme"), ("name", "tls")]).is_ok());
        assert!(matches!(
            check_segments([("namespace", "a=b")]),
            Err(ApiError::Invalid(_))
        ));
        assert!(check_segments([("name", "..")]).is_err());
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(
            content_type("terraform-provider-random_3.1.0_linux_amd64.zip"),
            "application/zip"
        );
        assert_eq!(content_type("acme-tls-aws-0.1.0.tar.gz"), "application/gzip");
        assert_eq!(
            content_type("terraform-provider-random_3.1.0_SHA256SUMS"),
            "application/octet-stream"
        );
    }
}
