//! Application state shared across handlers.

use crate::audit::AuditLog;
use crate::auth::Authenticator;
use crate::discovery::DiscoveryDocument;
use crate::mirror::{HttpUpstream, PullThroughMirror, Upstream, UpstreamError};
use crate::proxy::ProxyUrlService;
use boring_core::config::AppConfig;
use boring_signer::SignerError;
use boring_storage::{ObjectStore, RegistryStorage};
use std::sync::Arc;
use std::time::Duration;

/// Connect timeout for proxied remote downloads. The body itself is not
/// time-limited.
const PROXY_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: RegistryStorage,
    pub proxy: Arc<ProxyUrlService>,
    pub auth: Arc<Authenticator>,
    pub audit: AuditLog,
    pub discovery: Arc<DiscoveryDocument>,
    /// Present when `mirror.pull_through` is enabled.
    pub pull_through: Option<Arc<PullThroughMirror>>,
    /// Client for remote proxy targets.
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn ObjectStore>,
        auth: Authenticator,
        audit: AuditLog,
    ) -> Result<Self, StateError> {
        config.validate().map_err(StateError::Config)?;

        let registry = RegistryStorage::new(store, &config.registry);
        let proxy = ProxyUrlService::from_config(&config.proxy)?;
        let pull_through = if config.mirror.pull_through {
            let upstream = HttpUpstream::new(config.mirror.upstream_timeout())?;
            Some(Arc::new(PullThroughMirror::new(
                registry.clone(),
                Arc::new(upstream),
            )))
        } else {
            None
        };
        let http = reqwest::Client::builder()
            .connect_timeout(PROXY_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            discovery: Arc::new(DiscoveryDocument::new(auth.login())),
            config: Arc::new(config),
            registry,
            proxy: Arc::new(proxy),
            auth: Arc::new(auth),
            audit,
            pull_through,
            http,
        })
    }

    /// Replace the upstream client of the pull-through mirror.
    pub fn with_upstream(mut self, upstream: Arc<dyn Upstream>) -> Self {
        if self.config.mirror.pull_through {
            self.pull_through = Some(Arc::new(PullThroughMirror::new(
                self.registry.clone(),
                upstream,
            )));
        }
        self
    }
}
