//! Module and provider registry protocol tests.

mod common;

use axum::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use boring_core::ProviderScope;
use common::*;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;

fn decode_proxy_target(url: &str) -> String {
    let encoded = url.rsplit('/').next().unwrap();
    String::from_utf8(URL_SAFE_NO_PAD.decode(encoded).unwrap()).unwrap()
}

#[tokio::test]
async fn discovery_advertises_protocol_roots() {
    let server = TestServer::new().await;

    let (status, body) = server.get_json("/.well-known/terraform.json", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"modules.v1": "/v1/modules/", "providers.v1": "/v1/providers/"})
    );
}

#[tokio::test]
async fn health_reports_backend() {
    let server = TestServer::new().await;

    let (status, body) = server.get_json("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"], "filesystem");
}

#[tokio::test]
async fn module_versions_are_listed_in_semver_order() {
    let server = TestServer::new().await;
    for version in ["0.10.0", "0.2.0", "0.1.0"] {
        seed_module(server.registry(), "acme", "tls-cert", "aws", version).await;
    }
    seed_module(server.registry(), "acme", "other", "aws", "9.9.9").await;

    let (status, body) = server
        .get_json("/v1/modules/acme/tls-cert/aws/versions", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"modules": [{"versions": [
            {"version": "0.1.0"},
            {"version": "0.2.0"},
            {"version": "0.10.0"},
        ]}]})
    );
}

#[tokio::test]
async fn unknown_module_is_not_found() {
    let server = TestServer::new().await;

    let (status, body) = server
        .get_json("/v1/modules/acme/missing/aws/versions", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);

    let (status, _) = server
        .get_json("/v1/modules/acme/missing/aws/1.0.0/download", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn module_download_points_at_the_proxy() {
    let server = TestServer::with_config(|config| config.proxy.enabled = true).await;
    let module = seed_module(server.registry(), "acme", "tls-cert", "aws", "0.1.0").await;

    let response = server
        .get("/v1/modules/acme/tls-cert/aws/0.1.0/download", None)
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let location = header(&response, "x-terraform-get").unwrap().to_string();
    assert!(location.starts_with("http://registry.test/v1/proxy/"), "{location}");

    let key = server
        .registry()
        .layout()
        .module_key(&module, server.registry().archive_format());
    assert_eq!(decode_proxy_target(&location), format!("storage:{key}"));

    let path = location.strip_prefix("http://registry.test").unwrap();
    let download = server.get(path, None).await;
    assert_eq!(download.status(), StatusCode::OK);
    assert!(
        header(&download, "content-disposition")
            .unwrap()
            .contains("acme-tls-cert-aws-0.1.0.tar.gz")
    );
    assert_eq!(&body_bytes(download).await[..], b"module archive");
}

#[tokio::test]
async fn module_download_uses_backend_signed_url_without_proxy() {
    let store = Arc::new(PresigningStore::default());
    let server = TestServer::build(
        |_| {},
        TestOptions {
            store: Some(store),
            ..TestOptions::default()
        },
    )
    .await;
    seed_module(server.registry(), "acme", "tls-cert", "aws", "0.1.0").await;

    let response = server
        .get("/v1/modules/acme/tls-cert/aws/0.1.0/download", None)
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let location = header(&response, "x-terraform-get").unwrap();
    assert!(location.starts_with(PRESIGN_BASE), "{location}");
    assert!(location.contains("acme-tls-cert-aws-0.1.0.tar.gz"));
}

#[tokio::test]
async fn public_url_overrides_host_header() {
    let server = TestServer::with_config(|config| {
        config.proxy.enabled = true;
        config.server.public_url = Some("https://registry.example.com/".to_string());
    })
    .await;
    seed_module(server.registry(), "acme", "tls-cert", "aws", "0.1.0").await;

    let response = server
        .get("/v1/modules/acme/tls-cert/aws/0.1.0/download", None)
        .await;
    let location = header(&response, "x-terraform-get").unwrap();
    assert!(location.starts_with("https://registry.example.com/v1/proxy/"), "{location}");
}

#[tokio::test]
async fn key_syntax_in_path_is_rejected() {
    let server = TestServer::new().await;

    let (status, body) = server
        .get_json("/v1/modules/acme/tls-cert/aws/version=1.0.0/download", None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"][0].is_string());
}

#[tokio::test]
async fn provider_versions_list_platforms() {
    let server = TestServer::new().await;
    seed_provider(server.registry(), ProviderScope::Hosted).await;

    let (status, body) = server
        .get_json("/v1/providers/hashicorp/random/versions", None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let versions = body["versions"].as_array().unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0]["version"], VERSION);
    let platforms: BTreeSet<(String, String)> = versions[0]["platforms"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| {
            (
                p["os"].as_str().unwrap().to_string(),
                p["arch"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        platforms,
        BTreeSet::from([
            ("darwin".to_string(), "amd64".to_string()),
            ("linux".to_string(), "amd64".to_string()),
        ])
    );
}

#[tokio::test]
async fn provider_download_describes_the_archive() {
    let server = TestServer::with_config(|config| config.proxy.enabled = true).await;
    seed_provider(server.registry(), ProviderScope::Hosted).await;

    let (status, body) = server
        .get_json(
            "/v1/providers/hashicorp/random/3.1.0/download/linux/amd64",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["os"], "linux");
    assert_eq!(body["arch"], "amd64");
    assert_eq!(body["filename"], LINUX_ZIP);
    assert_eq!(body["shasum"], LINUX_SHA256);
    assert!(body.get("namespace").is_none());
    let keys = body["signing_keys"]["gpg_public_keys"].as_array().unwrap();
    assert!(!keys.is_empty());

    for (field, file) in [
        ("download_url", LINUX_ZIP),
        ("shasums_url", SUMS_FILE),
        ("shasums_signature_url", SIG_FILE),
    ] {
        let url = body[field].as_str().unwrap();
        assert!(decode_proxy_target(url).ends_with(file), "{field}: {url}");
    }

    let path = body["download_url"]
        .as_str()
        .unwrap()
        .strip_prefix("http://registry.test")
        .unwrap()
        .to_string();
    let archive = server.get(&path, None).await;
    assert_eq!(archive.status(), StatusCode::OK);
    assert_eq!(header(&archive, "content-type"), Some("application/zip"));
    assert_eq!(&body_bytes(archive).await[..], LINUX_ARCHIVE);
}

#[tokio::test]
async fn missing_platform_is_not_found() {
    let server = TestServer::new().await;
    seed_provider(server.registry(), ProviderScope::Hosted).await;

    let (status, body) = server
        .get_json(
            "/v1/providers/hashicorp/random/3.1.0/download/windows/arm64",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(matches!(body["errors"][0], Value::String(_)));
}

#[tokio::test]
async fn trace_id_is_echoed() {
    let server = TestServer::new().await;

    let response = server.get("/health", None).await;
    assert!(header(&response, "x-trace-id").is_some());
}

#[tokio::test]
async fn telemetry_router_exposes_metrics() {
    use tower::ServiceExt;

    boring_server::metrics::register_metrics();
    let server = TestServer::new().await;
    server.get("/health", None).await;

    let router = boring_server::create_telemetry_router(server.state.clone());
    let request = axum::http::Request::builder()
        .uri("/metrics")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
    assert!(body.contains("boring_registry_http_requests_total"), "{body}");
}
