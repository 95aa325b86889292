//! JWT verification against an issuer's published JWKS.

use super::{AuthError, LoginV1, UserContext};
use boring_core::config::{OidcConfig, OktaConfig};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Bound on issuer discovery and key retrieval.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Opaque tokens shorter than this are rejected even when accepted at all.
const MIN_OPAQUE_TOKEN_LEN: usize = 10;

type Claims = HashMap<String, Value>;

#[derive(Debug, Deserialize)]
struct IssuerMetadata {
    issuer: String,
    #[serde(default)]
    authorization_endpoint: Option<String>,
    #[serde(default)]
    token_endpoint: Option<String>,
    jwks_uri: String,
}

async fn discover(
    issuer: &str,
    metadata_path: &str,
) -> Result<(IssuerMetadata, JwkSet), AuthError> {
    let client = reqwest::Client::builder()
        .timeout(DISCOVERY_TIMEOUT)
        .build()
        .map_err(|e| AuthError::Discovery(e.to_string()))?;

    let url = format!("{}/{metadata_path}", issuer.trim_end_matches('/'));
    let metadata: IssuerMetadata = client
        .get(&url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| AuthError::Discovery(format!("{url}: {e}")))?
        .json()
        .await
        .map_err(|e| AuthError::Discovery(format!("{url}: {e}")))?;

    let keys: JwkSet = client
        .get(&metadata.jwks_uri)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| AuthError::Discovery(format!("{}: {e}", metadata.jwks_uri)))?
        .json()
        .await
        .map_err(|e| AuthError::Discovery(format!("{}: {e}", metadata.jwks_uri)))?;

    tracing::debug!(issuer = %metadata.issuer, keys = keys.keys.len(), "issuer keys loaded");
    Ok((metadata, keys))
}

struct JwtVerifier {
    issuer: String,
    audience: String,
    keys: JwkSet,
}

impl JwtVerifier {
    fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        let invalid = |e: jsonwebtoken::errors::Error| AuthError::InvalidToken(e.to_string());

        let header = decode_header(token).map_err(invalid)?;
        let jwk = match &header.kid {
            Some(kid) => self.keys.find(kid),
            None => self.keys.keys.first(),
        }
        .ok_or_else(|| AuthError::InvalidToken("no matching signing key".to_string()))?;
        let key = DecodingKey::from_jwk(jwk).map_err(invalid)?;

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.issuer]);
        Ok(decode::<Claims>(token, &key, &validation)
            .map_err(invalid)?
            .claims)
    }
}

fn claim(claims: &Claims, name: &str) -> Option<String> {
    match claims.get(name)? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first()?.as_str().map(str::to_string),
        _ => None,
    }
}

fn user_context(claims: &Claims) -> UserContext {
    UserContext {
        sub: claim(claims, "sub"),
        email: claim(claims, "email"),
        name: claim(claims, "name"),
        iss: claim(claims, "iss"),
        aud: claim(claims, "aud"),
        client_id: claim(claims, "client_id").or_else(|| claim(claims, "azp")),
    }
}

fn is_jwt(token: &str) -> bool {
    token.split('.').count() == 3
}

/// OIDC ID-token verification.
pub struct OidcProvider {
    config: OidcConfig,
    authorization_endpoint: String,
    token_endpoint: String,
    verifier: JwtVerifier,
}

impl OidcProvider {
    /// Resolve `<issuer>/.well-known/openid-configuration` and the JWKS.
    pub async fn discover(config: &OidcConfig) -> Result<Self, AuthError> {
        let (metadata, keys) = discover(&config.issuer, ".well-known/openid-configuration").await?;
        let (Some(authorization_endpoint), Some(token_endpoint)) =
            (metadata.authorization_endpoint, metadata.token_endpoint)
        else {
            return Err(AuthError::Discovery(format!(
                "{} does not advertise authorization and token endpoints",
                config.issuer
            )));
        };
        Ok(Self {
            config: config.clone(),
            authorization_endpoint,
            token_endpoint,
            verifier: JwtVerifier {
                issuer: metadata.issuer,
                audience: config.client_id.clone(),
                keys,
            },
        })
    }

    pub fn login(&self) -> LoginV1 {
        LoginV1 {
            client: self.config.client_id.clone(),
            grant_types: self.config.login_grant_types.clone(),
            authz: self.authorization_endpoint.clone(),
            token: self.token_endpoint.clone(),
            ports: self.config.login_ports,
            scopes: self.config.scopes.clone(),
        }
    }

    pub fn verify(&self, token: &str) -> Result<UserContext, AuthError> {
        if !is_jwt(token) {
            if self.config.accept_non_jwt_tokens && token.len() >= MIN_OPAQUE_TOKEN_LEN {
                return Ok(UserContext {
                    iss: Some(self.verifier.issuer.clone()),
                    client_id: Some(self.config.client_id.clone()),
                    ..UserContext::default()
                });
            }
            return Err(AuthError::InvalidToken("not a JWT".to_string()));
        }

        let claims = self.verifier.decode(token)?;
        let mut user = user_context(&claims);
        user.client_id
            .get_or_insert_with(|| self.config.client_id.clone());
        Ok(user)
    }
}

/// Okta access-token verification. Deprecated in favour of `OidcProvider`.
pub struct OktaProvider {
    required_claims: Vec<String>,
    verifier: JwtVerifier,
}

impl OktaProvider {
    pub async fn discover(config: &OktaConfig) -> Result<Self, AuthError> {
        let (metadata, keys) =
            discover(&config.issuer, ".well-known/oauth-authorization-server").await?;
        Ok(Self {
            required_claims: config.claims.clone(),
            verifier: JwtVerifier {
                issuer: metadata.issuer,
                audience: config.audience.clone(),
                keys,
            },
        })
    }

    pub fn verify(&self, token: &str) -> Result<UserContext, AuthError> {
        if !is_jwt(token) {
            return Err(AuthError::InvalidToken("not a JWT".to_string()));
        }
        let claims = self.verifier.decode(token)?;
        if let Some(missing) = self
            .required_claims
            .iter()
            .find(|name| !claims.contains_key(name.as_str()))
        {
            return Err(AuthError::InvalidToken(format!("missing claim {missing}")));
        }
        Ok(user_context(&claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
    use serde_json::json;

    const SIGNING_KEY: &[u8] = include_bytes!("../../../../testdata/oidc/signing-key.pem");
    const JWKS: &str = include_str!("../../../../testdata/oidc/jwks.json");

    fn verifier() -> JwtVerifier {
        JwtVerifier {
            issuer: "https://issuer.test".to_string(),
            audience: "registry".to_string(),
            keys: serde_json::from_str(JWKS).unwrap(),
        }
    }

    fn token(claims: Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("test-key-1".to_string());
        encode(&header, &claims, &EncodingKey::from_rsa_pem(SIGNING_KEY).unwrap()).unwrap()
    }

    fn exp() -> i64 {
        time::OffsetDateTime::now_utc().unix_timestamp() + 600
    }

    #[test]
    fn valid_token_yields_user_context() {
        let claims = verifier()
            .decode(&token(json!({
                "sub": "u-1",
                "email": "dev@example.com",
                "iss": "https://issuer.test",
                "aud": ["registry"],
                "exp": exp(),
            })))
            .unwrap();
        let user = user_context(&claims);
        assert_eq!(user.sub.as_deref(), Some("u-1"));
        assert_eq!(user.aud.as_deref(), Some("registry"));
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let result = verifier().decode(&token(json!({
            "sub": "u-1",
            "iss": "https://issuer.test",
            "aud": "someone-else",
            "exp": exp(),
        })));
        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn expired_token_is_rejected() {
        let result = verifier().decode(&token(json!({
            "iss": "https://issuer.test",
            "aud": "registry",
            "exp": exp() - 3600,
        })));
        assert!(result.is_err());
    }

    #[test]
    fn opaque_tokens_need_opt_in_and_length() {
        let provider = |accept| OidcProvider {
            config: OidcConfig {
                issuer: "https://issuer.test".to_string(),
                client_id: "registry".to_string(),
                scopes: vec![],
                login_grant_types: vec![],
                login_ports: [10000, 10010],
                accept_non_jwt_tokens: accept,
            },
            authorization_endpoint: String::new(),
            token_endpoint: String::new(),
            verifier: verifier(),
        };
        assert!(provider(false).verify("opaque-token-value").is_err());
        assert!(provider(true).verify("short").is_err());
        assert!(provider(true).verify("opaque-token-value").is_ok());
    }
}
