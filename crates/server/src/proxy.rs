//! Server-issued download URLs.
//!
//! Download locations resolved by storage are replaced with
//! `<root>/v1/proxy/<b64url(target)>`, or with the signed layout
//! `<root>/v1/proxy/<hex-hmac>/<unix-expiry>/<b64url(target)>` when a
//! signing key is configured. A target is either `storage:<key>` or an
//! absolute http(s) URL.

use crate::metrics::ProxyFailure;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use boring_core::config::ProxyConfig;
use boring_signer::{SignerError, UrlSigner};
use boring_storage::DownloadLocation;
use std::time::Duration;
use time::OffsetDateTime;

/// Mount point of the proxy routes.
pub const PROXY_PATH: &str = "/v1/proxy";

const STORAGE_SCHEME: &str = "storage:";

/// What a proxy URL points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProxyTarget {
    /// An object in the registry's own storage.
    Storage(String),
    /// A URL fetched and streamed back verbatim.
    Remote(String),
}

impl ProxyTarget {
    pub fn encode(&self) -> String {
        match self {
            Self::Storage(key) => format!("{STORAGE_SCHEME}{key}"),
            Self::Remote(url) => url.clone(),
        }
    }

    pub fn parse(target: &str) -> Result<Self, ProxyError> {
        if let Some(key) = target.strip_prefix(STORAGE_SCHEME) {
            if key.is_empty() {
                return Err(ProxyError::BadUrl("empty storage key".to_string()));
            }
            return Ok(Self::Storage(key.to_string()));
        }
        let url = reqwest::Url::parse(target).map_err(|e| ProxyError::BadUrl(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(Self::Remote(target.to_string())),
            other => Err(ProxyError::BadUrl(format!("unsupported scheme {other}"))),
        }
    }

    /// Last path segment, used for `Content-Disposition`.
    pub fn file_name(&self) -> Option<String> {
        let path = match self {
            Self::Storage(key) => key.as_str(),
            Self::Remote(url) => {
                let end = url.find(['?', '#']).unwrap_or(url.len());
                &url[..end]
            }
        };
        path.rsplit('/')
            .next()
            .filter(|name| !name.is_empty() && !name.contains(':'))
            .map(str::to_string)
    }
}

impl From<DownloadLocation> for ProxyTarget {
    fn from(location: DownloadLocation) -> Self {
        match location {
            DownloadLocation::Presigned(url) => Self::Remote(url),
            DownloadLocation::Object(key) => Self::Storage(key),
        }
    }
}

/// Why a proxy path was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("malformed proxy URL: {0}")]
    BadUrl(String),

    #[error("invalid proxy URL signature")]
    BadSignature,

    #[error("proxy URL expired at {0}")]
    Expired(i64),

    #[error("upstream unreachable: {0}")]
    Upstream(String),
}

impl ProxyError {
    pub fn failure(&self) -> ProxyFailure {
        match self {
            Self::BadUrl(_) => ProxyFailure::BadUrl,
            Self::BadSignature => ProxyFailure::BadSignature,
            Self::Expired(_) => ProxyFailure::Expired,
            Self::Upstream(_) => ProxyFailure::UpstreamUnreachable,
        }
    }
}

impl From<ProxyError> for crate::error::ApiError {
    fn from(e: ProxyError) -> Self {
        crate::metrics::record_proxy_failure(e.failure());
        match e {
            ProxyError::BadUrl(_) | ProxyError::BadSignature => Self::BadRequest(e.to_string()),
            ProxyError::Expired(_) => Self::Gone(e.to_string()),
            ProxyError::Upstream(_) => Self::Upstream(e.to_string()),
        }
    }
}

/// Issues and checks proxy URLs.
#[derive(Debug)]
pub struct ProxyUrlService {
    enabled: bool,
    signer: Option<UrlSigner>,
    expiry: Duration,
}

impl ProxyUrlService {
    pub fn from_config(config: &ProxyConfig) -> Result<Self, SignerError> {
        let signer = config
            .signing_key
            .as_deref()
            .map(UrlSigner::new)
            .transpose()?;
        Ok(Self {
            enabled: config.enabled,
            signer,
            expiry: config.expiry(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The URL handed to clients for `location`.
    ///
    /// Backend-signed URLs pass through untouched unless the proxy is
    /// enabled. Objects the backend cannot sign always go through the proxy.
    pub fn download_url(&self, root: &str, location: DownloadLocation) -> String {
        match location {
            DownloadLocation::Presigned(url) if !self.enabled => url,
            location => self.proxy_url(root, &ProxyTarget::from(location)),
        }
    }

    pub fn proxy_url(&self, root: &str, target: &ProxyTarget) -> String {
        let root = root.trim_end_matches('/');
        let target = target.encode();
        let encoded = URL_SAFE_NO_PAD.encode(target.as_bytes());
        match &self.signer {
            Some(signer) => {
                let expiry = OffsetDateTime::now_utc().unix_timestamp()
                    + i64::try_from(self.expiry.as_secs()).unwrap_or(i64::MAX / 2);
                let signature = signer.sign(&target, expiry);
                format!("{root}{PROXY_PATH}/{signature}/{expiry}/{encoded}")
            }
            None => format!("{root}{PROXY_PATH}/{encoded}"),
        }
    }

    /// Decode an unsigned proxy path. Refused when a signing key is set.
    pub fn resolve_unsigned(&self, encoded: &str) -> Result<ProxyTarget, ProxyError> {
        if self.signer.is_some() {
            return Err(ProxyError::BadSignature);
        }
        ProxyTarget::parse(&decode_target(encoded)?)
    }

    /// Decode and verify a signed proxy path against `now`.
    pub fn resolve_signed(
        &self,
        signature: &str,
        expiry: &str,
        encoded: &str,
        now: i64,
    ) -> Result<ProxyTarget, ProxyError> {
        let signer = self.signer.as_ref().ok_or(ProxyError::BadSignature)?;
        let expiry: i64 = expiry
            .parse()
            .map_err(|_| ProxyError::BadUrl(format!("invalid expiry {expiry:?}")))?;
        let target = decode_target(encoded)?;
        match signer.check(&target, expiry, signature, now) {
            Ok(()) => ProxyTarget::parse(&target),
            Err(SignerError::Expired { expiry }) => Err(ProxyError::Expired(expiry)),
            Err(_) => Err(ProxyError::BadSignature),
        }
    }
}

fn decode_target(encoded: &str) -> Result<String, ProxyError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|e| ProxyError::BadUrl(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ProxyError::BadUrl(e.to_string()))
}
