//! Configuration types shared across crates.

use crate::layout::Layout;
use crate::module::ArchiveFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address of the API listener (e.g., "0.0.0.0:5601").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bind address of the telemetry listener serving `/metrics`.
    /// An empty string disables the listener.
    #[serde(default = "default_telemetry_bind")]
    pub telemetry_bind: String,
    /// PEM certificate chain. Requires `tls_key_file`.
    #[serde(default)]
    pub tls_cert_file: Option<PathBuf>,
    /// PEM private key. Requires `tls_cert_file`.
    #[serde(default)]
    pub tls_key_file: Option<PathBuf>,
    /// Time allowed to receive a request body, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub read_timeout_secs: u64,
    /// Time allowed to produce a response, in seconds. Not applied to
    /// proxy and mirror downloads.
    #[serde(default = "default_timeout_secs")]
    pub write_timeout_secs: u64,
    /// Externally visible root URL (e.g., "https://registry.example.com").
    /// When unset, proxy URLs are derived from the request `Host` header.
    #[serde(default)]
    pub public_url: Option<String>,
}

fn default_bind() -> String {
    "0.0.0.0:5601".to_string()
}

fn default_telemetry_bind() -> String {
    "0.0.0.0:7801".to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            telemetry_bind: default_telemetry_bind(),
            tls_cert_file: None,
            tls_key_file: None,
            read_timeout_secs: default_timeout_secs(),
            write_timeout_secs: default_timeout_secs(),
            public_url: None,
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        match (&self.tls_cert_file, &self.tls_key_file) {
            (Some(_), None) | (None, Some(_)) => {
                Err("tls_cert_file and tls_key_file must be set together".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// In-process storage. Contents are lost on restart.
    Memory,
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to the ambient credential chain if not set.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to the ambient credential chain if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`). Required for MinIO.
        #[serde(default)]
        force_path_style: bool,
    },
    /// Google Cloud Storage.
    Gcs {
        /// Bucket name.
        bucket: String,
        /// Optional key prefix.
        prefix: Option<String>,
        /// Path to a service account key file. Required for signed URLs;
        /// falls back to application default credentials otherwise.
        service_account_path: Option<PathBuf>,
    },
    /// Azure Blob Storage.
    Azure {
        /// Storage account name.
        account: String,
        /// Container name.
        container: String,
        /// Optional key prefix.
        prefix: Option<String>,
        /// Storage account access key. Falls back to environment credentials.
        access_key: Option<String>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/registry"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.is_empty() {
                    return Err("s3 bucket must not be empty".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            StorageConfig::Gcs { bucket, .. } if bucket.is_empty() => {
                Err("gcs bucket must not be empty".to_string())
            }
            StorageConfig::Azure {
                account, container, ..
            } if account.is_empty() || container.is_empty() => {
                Err("azure account and container must not be empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Registry layout and artifact settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_modules_prefix")]
    pub modules_prefix: String,
    #[serde(default = "default_providers_prefix")]
    pub providers_prefix: String,
    #[serde(default = "default_mirror_prefix")]
    pub mirror_prefix: String,
    /// File extension of stored module archives.
    #[serde(default)]
    pub archive_format: ArchiveFormat,
    /// Lifetime of backend-signed download URLs, in seconds.
    #[serde(default = "default_signed_url_expiry_secs")]
    pub signed_url_expiry_secs: u64,
}

fn default_modules_prefix() -> String {
    "modules".to_string()
}

fn default_providers_prefix() -> String {
    "providers".to_string()
}

fn default_mirror_prefix() -> String {
    "mirror".to_string()
}

fn default_signed_url_expiry_secs() -> u64 {
    300
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            modules_prefix: default_modules_prefix(),
            providers_prefix: default_providers_prefix(),
            mirror_prefix: default_mirror_prefix(),
            archive_format: ArchiveFormat::default(),
            signed_url_expiry_secs: default_signed_url_expiry_secs(),
        }
    }
}

impl RegistryConfig {
    pub fn layout(&self) -> Layout {
        Layout::new(
            &self.modules_prefix,
            &self.providers_prefix,
            &self.mirror_prefix,
        )
    }

    pub fn signed_url_expiry(&self) -> Duration {
        Duration::from_secs(self.signed_url_expiry_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        let prefixes = [
            self.modules_prefix.trim_matches('/'),
            self.providers_prefix.trim_matches('/'),
            self.mirror_prefix.trim_matches('/'),
        ];
        if prefixes.iter().any(|p| p.is_empty()) {
            return Err("registry prefixes must not be empty".to_string());
        }
        if prefixes[0] == prefixes[1] || prefixes[0] == prefixes[2] || prefixes[1] == prefixes[2] {
            return Err("registry prefixes must be distinct".to_string());
        }
        if prefixes
            .iter()
            .any(|p| p.starts_with(crate::layout::LEGACY_PREFIX))
        {
            return Err("registry prefixes must not start with \"namespace=\"".to_string());
        }
        Ok(())
    }
}

/// Download proxy configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Rewrite download URLs to `/v1/proxy/...` paths served by this process.
    #[serde(default)]
    pub enabled: bool,
    /// HMAC-SHA256 secret. When set, proxy URLs carry a signature and an expiry.
    #[serde(default)]
    pub signing_key: Option<String>,
    /// Lifetime of signed proxy URLs, in seconds.
    #[serde(default = "default_proxy_expiry_secs")]
    pub expiry_secs: u64,
}

fn default_proxy_expiry_secs() -> u64 {
    300
}

impl ProxyConfig {
    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }
}

/// Provider network mirror configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Fetch unknown providers from their upstream registry and cache them.
    #[serde(default)]
    pub pull_through: bool,
    /// Timeout of each upstream request, in seconds.
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,
}

fn default_upstream_timeout_secs() -> u64 {
    60
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pull_through: false,
            upstream_timeout_secs: default_upstream_timeout_secs(),
        }
    }
}

impl MirrorConfig {
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

/// OIDC identity provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OidcConfig {
    /// Issuer URL; discovery is read from `<issuer>/.well-known/openid-configuration`.
    pub issuer: String,
    /// Client ID. Tokens must carry it in `aud`.
    pub client_id: String,
    #[serde(default = "default_oidc_scopes")]
    pub scopes: Vec<String>,
    /// Grant types advertised in the `login.v1` discovery block.
    #[serde(default = "default_login_grant_types")]
    pub login_grant_types: Vec<String>,
    /// Local port range advertised in the `login.v1` discovery block.
    #[serde(default = "default_login_ports")]
    pub login_ports: [u16; 2],
    /// Accept opaque (non-JWT) bearer tokens of at least 10 characters.
    #[serde(default)]
    pub accept_non_jwt_tokens: bool,
}

fn default_oidc_scopes() -> Vec<String> {
    vec!["openid".to_string(), "profile".to_string(), "email".to_string()]
}

fn default_login_grant_types() -> Vec<String> {
    vec!["authz_code".to_string()]
}

fn default_login_ports() -> [u16; 2] {
    [10000, 10010]
}

/// Okta identity provider. Deprecated in favour of `oidc`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OktaConfig {
    /// Authorization server issuer (e.g., "https://acme.okta.com/oauth2/default").
    pub issuer: String,
    /// Expected `aud` claim.
    pub audience: String,
    /// Claims that must be present in the token.
    #[serde(default)]
    pub claims: Vec<String>,
}

/// Authentication configuration. With nothing configured, requests pass unauthenticated.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub static_tokens: Vec<String>,
    #[serde(default)]
    pub oidc: Vec<OidcConfig>,
    #[serde(default)]
    pub okta: Option<OktaConfig>,
}

impl AuthConfig {
    pub fn is_enabled(&self) -> bool {
        !self.static_tokens.is_empty() || !self.oidc.is_empty() || self.okta.is_some()
    }
}

/// Audit event destination.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditSink {
    /// Discard events.
    #[default]
    None,
    /// Emit events as structured log lines.
    Log,
    /// Buffer events and write them as JSON lines to the storage backend.
    Storage,
}

/// Audit log configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub sink: AuditSink,
    /// Key prefix for the storage sink.
    #[serde(default = "default_audit_prefix")]
    pub prefix: String,
    #[serde(default = "default_audit_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Buffered event count that triggers an early flush.
    #[serde(default = "default_audit_max_buffered_events")]
    pub max_buffered_events: usize,
}

fn default_audit_prefix() -> String {
    "audit".to_string()
}

fn default_audit_flush_interval_secs() -> u64 {
    10
}

fn default_audit_max_buffered_events() -> usize {
    500
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sink: AuditSink::default(),
            prefix: default_audit_prefix(),
            flush_interval_secs: default_audit_flush_interval_secs(),
            max_buffered_events: default_audit_max_buffered_events(),
        }
    }
}

impl AuditConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    #[serde(default)]
    pub filter: Option<String>,
    /// Emit JSON log lines.
    #[serde(default)]
    pub json: bool,
}

/// Top-level application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage below `root`.
    pub fn for_testing(root: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig::Filesystem { path: root.into() },
            server: ServerConfig {
                telemetry_bind: String::new(),
                ..ServerConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate cross-section invariants.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.storage.validate()?;
        self.registry.validate()?;
        if self.mirror.pull_through && !self.mirror.enabled {
            return Err("mirror.pull_through requires mirror.enabled".to_string());
        }
        if let Some(key) = &self.proxy.signing_key
            && key.is_empty()
        {
            return Err("proxy.signing_key must not be empty when set".to_string());
        }
        Ok(())
    }
}
