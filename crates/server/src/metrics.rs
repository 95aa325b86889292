//! Prometheus metrics for the registry server.
//!
//! Metrics are served by the telemetry listener (`server.telemetry_bind`),
//! not by the public API router, so the scrape endpoint can be
//! network-restricted on its own.

use axum::extract::{MatchedPath, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{self, Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static MIRROR_CACHE_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "boring_registry_mirror_cache_hits_total",
        "Mirror requests answered from local storage",
    )
    .expect("metric creation failed")
});

pub static MIRROR_CACHE_MISSES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "boring_registry_mirror_cache_misses_total",
        "Mirror requests that required the upstream registry",
    )
    .expect("metric creation failed")
});

pub static MIRROR_COPY_JOBS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "boring_registry_mirror_copy_jobs_total",
            "Pull-through copy jobs by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static PROXY_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "boring_registry_proxy_failures_total",
            "Rejected or failed proxy downloads by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

pub static HTTP_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "boring_registry_http_requests_total",
            "HTTP requests by matched route and status",
        ),
        &["route", "status"],
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(MIRROR_CACHE_HITS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(MIRROR_CACHE_MISSES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(MIRROR_COPY_JOBS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PROXY_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(HTTP_REQUESTS.clone()))
            .expect("metric registration failed");
    });
}

/// Why a proxy download was refused or failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxyFailure {
    BadUrl,
    UpstreamUnreachable,
    Expired,
    BadSignature,
}

impl ProxyFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadUrl => "bad_url",
            Self::UpstreamUnreachable => "upstream_unreachable",
            Self::Expired => "expired",
            Self::BadSignature => "bad_signature",
        }
    }
}

pub fn record_proxy_failure(reason: ProxyFailure) {
    PROXY_FAILURES.with_label_values(&[reason.as_str()]).inc();
}

pub fn record_copy_job(outcome: &str) {
    MIRROR_COPY_JOBS.with_label_values(&[outcome]).inc();
}

/// Count requests by matched route template, so path parameters do not
/// explode label cardinality.
pub async fn track_requests(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let response = next.run(req).await;
    HTTP_REQUESTS
        .with_label_values(&[route.as_str(), response.status().as_str()])
        .inc();
    response
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}
