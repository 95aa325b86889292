//! Bearer-token authentication.
//!
//! Providers are evaluated in configuration order:
//! - no providers configured: every request passes
//! - static tokens, compared in constant time
//! - OIDC ID tokens verified against the issuer's JWKS
//! - Okta access tokens (deprecated)

mod jwt;
mod static_tokens;

pub use jwt::{OidcProvider, OktaProvider};
pub use static_tokens::StaticTokens;

use crate::audit::{AuditEvent, ClientInfo};
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use boring_core::config::AuthConfig;
use serde::Serialize;
use std::time::Instant;

/// Authentication failures. Every variant renders as 401.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// The identity provider could not be set up at start-up.
    #[error("identity provider discovery failed: {0}")]
    Discovery(String),
}

impl From<AuthError> for ApiError {
    fn from(_: AuthError) -> Self {
        ApiError::Unauthorized
    }
}

/// Identity attached to authenticated requests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UserContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// One configured way of accepting a token.
pub enum AuthProvider {
    Static(StaticTokens),
    Oidc(Box<OidcProvider>),
    Okta(Box<OktaProvider>),
}

impl AuthProvider {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Static(_) => "static",
            Self::Oidc(_) => "oidc",
            Self::Okta(_) => "okta",
        }
    }

    pub fn verify(&self, token: &str) -> Result<UserContext, AuthError> {
        match self {
            Self::Static(p) => p.verify(token),
            Self::Oidc(p) => p.verify(token),
            Self::Okta(p) => p.verify(token),
        }
    }
}

/// The `login.v1` block of the discovery document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoginV1 {
    pub client: String,
    pub grant_types: Vec<String>,
    pub authz: String,
    pub token: String,
    pub ports: [u16; 2],
    pub scopes: Vec<String>,
}

/// The ordered provider set. Built once at start-up and read-only afterwards.
#[derive(Default)]
pub struct Authenticator {
    providers: Vec<AuthProvider>,
}

impl Authenticator {
    pub fn new(providers: Vec<AuthProvider>) -> Self {
        Self { providers }
    }

    /// Build every configured provider, resolving OIDC and Okta issuers.
    pub async fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        let mut providers = Vec::new();
        if !config.static_tokens.is_empty() {
            providers.push(AuthProvider::Static(StaticTokens::new(
                config.static_tokens.iter().cloned(),
            )));
        }
        for oidc in &config.oidc {
            let provider = OidcProvider::discover(oidc).await?;
            tracing::info!(issuer = %oidc.issuer, "OIDC provider configured");
            providers.push(AuthProvider::Oidc(Box::new(provider)));
        }
        if let Some(okta) = &config.okta {
            tracing::warn!(
                issuer = %okta.issuer,
                "the okta auth provider is deprecated, configure it as an oidc provider instead"
            );
            providers.push(AuthProvider::Okta(Box::new(OktaProvider::discover(okta).await?)));
        }
        Ok(Self { providers })
    }

    pub fn is_enabled(&self) -> bool {
        !self.providers.is_empty()
    }

    /// Login parameters advertised by the first OIDC provider.
    pub fn login(&self) -> Option<LoginV1> {
        self.providers.iter().find_map(|p| match p {
            AuthProvider::Oidc(oidc) => Some(oidc.login()),
            _ => None,
        })
    }

    /// Check a bearer token. `Ok(None)` means authentication is disabled.
    pub fn authenticate(&self, token: Option<&str>) -> Result<Option<UserContext>, AuthError> {
        if self.providers.is_empty() {
            return Ok(None);
        }
        let token = token.ok_or(AuthError::MissingToken)?;

        let mut last_error = None;
        for provider in &self.providers {
            match provider.verify(token) {
                Ok(user) => return Ok(Some(user)),
                Err(e) => {
                    tracing::debug!(provider = provider.kind(), error = %e, "token rejected");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(AuthError::MissingToken))
    }
}

/// Extract bearer token from Authorization header.
/// Per RFC 6750, the "Bearer" scheme is case-insensitive.
pub fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(v[7..].trim())
            } else {
                None
            }
        })
}

/// Reject unauthenticated requests and attach the caller's `UserContext`.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.auth.is_enabled() {
        return Ok(next.run(req).await);
    }

    let started = Instant::now();
    let client = ClientInfo::from_request(&req);
    match state.auth.authenticate(extract_bearer_token(&req)) {
        Ok(user) => {
            state.audit.record(
                AuditEvent::new("auth.login", "success", &client, started)
                    .with_user(user.clone()),
            );
            if let Some(user) = user {
                req.extensions_mut().insert(user);
            }
            Ok(next.run(req).await)
        }
        Err(e) => {
            tracing::info!(
                source_ip = client.source_ip.as_deref().unwrap_or("unknown"),
                error = %e,
                "authentication failed"
            );
            state
                .audit
                .record(AuditEvent::new("auth.login", "failure", &client, started));
            Err(e.into())
        }
    }
}
