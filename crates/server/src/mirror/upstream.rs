//! Client for upstream provider registries.

use async_trait::async_trait;
use boring_core::{Provider, ProviderIdentity, ProviderVersion};
use boring_storage::{ByteStream, StorageError};
use bytes::Bytes;
use dashmap::DashMap;
use futures::TryStreamExt;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("{url} returned {status}")]
    Status { url: String, status: u16 },

    #[error("invalid response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("{0} does not advertise providers.v1")]
    NotARegistry(String),

    #[error("{0} not found upstream")]
    NotFound(String),
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// The parts of the provider registry protocol the mirror consumes.
#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    /// `<providers.v1>/<ns>/<n>/versions` on `hostname`.
    async fn versions_url(&self, hostname: &str, namespace: &str, name: &str)
    -> UpstreamResult<String>;

    async fn provider_versions(
        &self,
        hostname: &str,
        namespace: &str,
        name: &str,
    ) -> UpstreamResult<Vec<ProviderVersion>>;

    /// Download metadata with every URL made absolute.
    async fn download_info(
        &self,
        hostname: &str,
        provider: &ProviderIdentity,
    ) -> UpstreamResult<Provider>;

    async fn fetch(&self, url: &str) -> UpstreamResult<Bytes>;

    async fn fetch_stream(&self, url: &str) -> UpstreamResult<ByteStream>;
}

#[derive(Deserialize)]
struct ServiceDiscovery {
    #[serde(rename = "providers.v1")]
    providers: Option<String>,
}

#[derive(Deserialize)]
struct VersionsResponse {
    versions: Vec<ProviderVersion>,
}

/// `Upstream` over HTTPS, with per-host service discovery cached for the
/// life of the process.
pub struct HttpUpstream {
    client: reqwest::Client,
    scheme: String,
    services: DashMap<String, Url>,
}

impl HttpUpstream {
    pub fn new(timeout: Duration) -> UpstreamResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("boring-registry/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpstreamError::Request {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            scheme: "https".to_string(),
            services: DashMap::new(),
        })
    }

    /// Talk plain HTTP to upstream hosts. Only useful against local fakes.
    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    async fn get(&self, url: &str) -> UpstreamResult<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| UpstreamError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        match response.status() {
            status if status.is_success() => Ok(response),
            reqwest::StatusCode::NOT_FOUND => Err(UpstreamError::NotFound(url.to_string())),
            status => Err(UpstreamError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> UpstreamResult<T> {
        self.get(url)
            .await?
            .json()
            .await
            .map_err(|e| UpstreamError::Decode {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    /// Resolve the `providers.v1` base of `hostname`, always ending in `/`.
    async fn providers_base(&self, hostname: &str) -> UpstreamResult<Url> {
        if let Some(base) = self.services.get(hostname) {
            return Ok(base.clone());
        }

        let root = format!("{}://{hostname}/", self.scheme);
        let discovery_url = format!("{root}.well-known/terraform.json");
        let discovery: ServiceDiscovery = self.get_json(&discovery_url).await?;
        let path = discovery
            .providers
            .ok_or_else(|| UpstreamError::NotARegistry(hostname.to_string()))?;
        let path = if path.ends_with('/') {
            path
        } else {
            format!("{path}/")
        };

        let base = Url::parse(&root)
            .and_then(|root| root.join(&path))
            .map_err(|e| UpstreamError::Decode {
                url: discovery_url.clone(),
                reason: e.to_string(),
            })?;
        tracing::debug!(hostname, base = %base, "upstream registry discovered");
        self.services.insert(hostname.to_string(), base.clone());
        Ok(base)
    }

    async fn endpoint(&self, hostname: &str, path: &str) -> UpstreamResult<Url> {
        let base = self.providers_base(hostname).await?;
        base.join(path).map_err(|e| UpstreamError::Decode {
            url: base.to_string(),
            reason: e.to_string(),
        })
    }
}

fn absolutize(base: &Url, url: &mut String) -> UpstreamResult<()> {
    let resolved = base.join(url).map_err(|e| UpstreamError::Decode {
        url: base.to_string(),
        reason: format!("bad URL {url:?}: {e}"),
    })?;
    *url = resolved.to_string();
    Ok(())
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn versions_url(
        &self,
        hostname: &str,
        namespace: &str,
        name: &str,
    ) -> UpstreamResult<String> {
        Ok(self
            .endpoint(hostname, &format!("{namespace}/{name}/versions"))
            .await?
            .to_string())
    }

    async fn provider_versions(
        &self,
        hostname: &str,
        namespace: &str,
        name: &str,
    ) -> UpstreamResult<Vec<ProviderVersion>> {
        let url = self.versions_url(hostname, namespace, name).await?;
        let response: VersionsResponse = self.get_json(&url).await?;
        Ok(response.versions)
    }

    async fn download_info(
        &self,
        hostname: &str,
        provider: &ProviderIdentity,
    ) -> UpstreamResult<Provider> {
        let url = self
            .endpoint(
                hostname,
                &format!(
                    "{}/{}/{}/download/{}/{}",
                    provider.namespace, provider.name, provider.version, provider.os, provider.arch
                ),
            )
            .await?;
        let mut info: Provider = self.get_json(url.as_str()).await?;
        absolutize(&url, &mut info.download_url)?;
        absolutize(&url, &mut info.shasums_url)?;
        absolutize(&url, &mut info.shasums_signature_url)?;
        info.namespace.clone_from(&provider.namespace);
        info.name.clone_from(&provider.name);
        info.version.clone_from(&provider.version);
        Ok(info)
    }

    async fn fetch(&self, url: &str) -> UpstreamResult<Bytes> {
        self.get(url)
            .await?
            .bytes()
            .await
            .map_err(|e| UpstreamError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    async fn fetch_stream(&self, url: &str) -> UpstreamResult<ByteStream> {
        let response = self.get(url).await?;
        Ok(Box::pin(
            response
                .bytes_stream()
                .map_err(|e| StorageError::Unavailable(format!("upstream read failed: {e}"))),
        ))
    }
}
