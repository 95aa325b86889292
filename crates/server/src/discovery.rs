//! Terraform remote service discovery.

use crate::auth::LoginV1;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

pub const MODULES_V1: &str = "/v1/modules/";
pub const PROVIDERS_V1: &str = "/v1/providers/";

/// Body of `/.well-known/terraform.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiscoveryDocument {
    #[serde(rename = "modules.v1")]
    pub modules: String,
    #[serde(rename = "providers.v1")]
    pub providers: String,
    #[serde(rename = "login.v1", skip_serializing_if = "Option::is_none")]
    pub login: Option<LoginV1>,
}

impl DiscoveryDocument {
    pub fn new(login: Option<LoginV1>) -> Self {
        Self {
            modules: MODULES_V1.to_string(),
            providers: PROVIDERS_V1.to_string(),
            login,
        }
    }
}

/// GET /.well-known/terraform.json
pub async fn discovery(State(state): State<AppState>) -> Json<DiscoveryDocument> {
    Json(state.discovery.as_ref().clone())
}
