//! Signature handling for the boring registry.
//!
//! This crate provides:
//! - GPG detached-signature verification of provider SHA256SUMS files
//! - HMAC-SHA256 signing and verification of proxy download URLs

pub mod error;
pub mod gpg;
pub mod url;

pub use error::{SignerError, SignerResult};
pub use gpg::{Keyring, verify_release};
pub use url::UrlSigner;
