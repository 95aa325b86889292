//! Core domain types for the boring registry.
//!
//! This crate defines the data model shared by every other crate:
//! - Module and provider identities
//! - The canonical `key=value` object layout
//! - SHA256SUMS parsing and the signing-key bundle
//! - Version constraints used by the publisher
//! - Configuration types

pub mod config;
pub mod error;
pub mod layout;
pub mod module;
pub mod provider;
pub mod sha256sums;
pub mod signing_keys;
pub mod version;

pub use error::{Error, Result};
pub use layout::{Layout, ProviderScope};
pub use module::{ArchiveFormat, ModuleIdentity};
pub use provider::{
    DEFAULT_PROTOCOLS, Platform, Provider, ProviderIdentity, ProviderVersion, ReleaseFile,
    ReleaseFileKind,
};
pub use sha256sums::Sha256Sums;
pub use signing_keys::{GpgPublicKey, SigningKeys};
pub use version::VersionConstraints;

/// Name of the metadata file the publisher looks for in module directories.
pub const MODULE_METADATA_FILE: &str = "boring-registry.hcl";

/// Name of the per-namespace signing key bundle.
pub const SIGNING_KEYS_FILE: &str = "signing-keys.json";
