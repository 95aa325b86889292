//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use boring_core::config::AppConfig;
use boring_server::audit::AuditLog;
use boring_server::auth::Authenticator;
use boring_server::mirror::Upstream;
use boring_server::{AppState, create_router};
use boring_storage::{FilesystemBackend, ObjectStore, RegistryStorage};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

/// Options for `TestServer::build`.
#[allow(dead_code)]
#[derive(Default)]
pub struct TestOptions {
    pub auth: Authenticator,
    pub upstream: Option<Arc<dyn Upstream>>,
    pub store: Option<Arc<dyn ObjectStore>>,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, TestOptions::default()).await
    }

    pub async fn build<F>(modifier: F, options: TestOptions) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let storage_path = temp_dir.path().join("storage");
        std::fs::create_dir_all(&storage_path).expect("Failed to create storage directory");

        let store = match options.store {
            Some(store) => store,
            None => Arc::new(
                FilesystemBackend::new(&storage_path)
                    .await
                    .expect("Failed to create storage backend"),
            ),
        };

        let mut config = AppConfig::for_testing(&storage_path);
        modifier(&mut config);

        let mut state = AppState::new(config, store, options.auth, AuditLog::disabled())
            .expect("Failed to build application state");
        if let Some(upstream) = options.upstream {
            state = state.with_upstream(upstream);
        }
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    pub fn registry(&self) -> &RegistryStorage {
        &self.state.registry
    }

    /// Send a GET request through the router.
    pub async fn get(&self, uri: &str, auth_token: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method("GET")
            .uri(uri)
            .header("Host", "registry.test");
        if let Some(token) = auth_token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty()).unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Send a GET request and decode the JSON body, `Null` when empty.
    pub async fn get_json(&self, uri: &str, auth_token: Option<&str>) -> (StatusCode, Value) {
        let response = self.get(uri, auth_token).await;
        let status = response.status();
        let body = body_bytes(response).await;
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, json)
    }
}

/// Collect a response body.
#[allow(dead_code)]
pub async fn body_bytes(response: Response) -> bytes::Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

/// A response header as a string.
#[allow(dead_code)]
pub fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}
