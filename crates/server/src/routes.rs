//! Route configuration.

use crate::auth::auth_middleware;
use crate::discovery::discovery;
use crate::error::ErrorResponse;
use crate::handlers;
use crate::metrics::{metrics_handler, track_requests};
use crate::proxy::PROXY_PATH;
use crate::state::AppState;
use crate::trace::{TRACE_ID_HEADER, trace_id_middleware};
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router, middleware};
use std::any::Any;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let server = &state.config.server;

    // Protocol metadata answers are bounded by the write timeout.
    let protocol_routes = Router::new()
        .route(
            "/v1/modules/{namespace}/{name}/{provider}/versions",
            get(handlers::list_module_versions),
        )
        .route(
            "/v1/modules/{namespace}/{name}/{provider}/{version}/download",
            get(handlers::download_module),
        )
        .route(
            "/v1/providers/{namespace}/{name}/versions",
            get(handlers::list_provider_versions),
        )
        .route(
            "/v1/providers/{namespace}/{name}/{version}/download/{os}/{arch}",
            get(handlers::download_provider),
        )
        .layer(TimeoutLayer::new(server.write_timeout()));

    // Downloads may stream large files slowly and carry no write timeout.
    // Mirror metadata answers apply it themselves.
    let download_routes = Router::new()
        .route(
            "/v1/mirror/{hostname}/{namespace}/{name}/{file}",
            get(handlers::mirror_file),
        )
        .route(&format!("{PROXY_PATH}/{{target}}"), get(handlers::proxy_unsigned));

    let authenticated = protocol_routes
        .merge(download_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Signed proxy URLs are their own credential; discovery and health
    // are intentionally unauthenticated.
    let public = Router::new()
        .route("/.well-known/terraform.json", get(discovery))
        .route("/health", get(handlers::health_check))
        .route(
            &format!("{PROXY_PATH}/{{signature}}/{{expiry}}/{{target}}"),
            get(handlers::proxy_signed),
        );

    let app = Router::new()
        .merge(authenticated)
        .merge(public)
        .layer(middleware::from_fn(track_requests));
    with_transport(app, server.read_timeout()).with_state(state)
}

/// Outermost layers: body read timeout, panic recovery, request tracing.
fn with_transport<S>(router: Router<S>, read_timeout: Duration) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(RequestBodyTimeoutLayer::new(read_timeout))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(middleware::from_fn(trace_id_middleware))
}

/// Router of the telemetry listener.
pub fn create_telemetry_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(handlers::health_check))
        .with_state(state)
}

fn request_span(req: &Request) -> tracing::Span {
    let trace_id = req
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    tracing::info_span!(
        "request",
        method = %req.method(),
        uri = %req.uri(),
        trace_id = %trace_id,
    )
}

fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown panic payload".to_string());
    let correlation_id = uuid::Uuid::new_v4();
    tracing::error!(correlation_id = %correlation_id, panic = %detail, "handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(format!(
            "internal server error (correlation id: {correlation_id})"
        ))),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use tower::ServiceExt;

    #[tokio::test]
    async fn handler_panic_becomes_500_with_correlation_id() {
        async fn boom() -> &'static str {
            panic!("boom")
        }
        let app = with_transport(
            Router::new().route("/boom", get(boom)),
            Duration::from_secs(5),
        );

        let response = app
            .oneshot(Request::get("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().contains_key(TRACE_ID_HEADER));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let errors = body["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 1);
        let message = errors[0].as_str().unwrap();
        let id = message
            .strip_prefix("internal server error (correlation id: ")
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok(), "{message}");
        assert!(!message.contains("boom"));
    }
}
