//! Signer error types.

use thiserror::Error;

/// Signature and URL-signing errors.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("key parsing error: {0}")]
    KeyParsing(String),

    #[error("no usable public keys")]
    NoTrustedKeys,

    #[error("invalid signature format: {0}")]
    InvalidSignature(String),

    #[error("signature verification failed")]
    VerificationFailed,

    #[error("invalid signing secret: {0}")]
    InvalidSecret(String),

    #[error("signed URL expired at {expiry}")]
    Expired { expiry: i64 },
}

/// Result type for signing operations.
pub type SignerResult<T> = std::result::Result<T, SignerError>;
