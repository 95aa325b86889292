//! HTTP server for the Terraform/OpenTofu registry protocols.
//!
//! This crate provides:
//! - Service discovery and the module, provider and mirror protocols
//! - The download proxy with optional HMAC-signed URLs
//! - Bearer-token authentication (static tokens, OIDC, Okta)
//! - Audit logging and Prometheus metrics
//! - Pull-through mirroring of upstream provider registries

pub mod audit;
pub mod auth;
pub mod discovery;
pub mod error;
pub mod handlers;
pub mod listener;
pub mod metrics;
pub mod mirror;
pub mod proxy;
pub mod routes;
pub mod state;
pub mod trace;

pub use error::ApiError;
pub use listener::with_read_timeout;
pub use routes::{create_router, create_telemetry_router};
pub use state::{AppState, StateError};
pub use trace::TraceId;
