//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid module identity: {0}")]
    InvalidModule(String),

    #[error("invalid provider identity: {0}")]
    InvalidProvider(String),

    #[error("invalid version {version:?}: {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("invalid version constraint: {0}")]
    InvalidConstraint(String),

    #[error("invalid SHA256SUMS: {0}")]
    InvalidSha256Sums(String),

    #[error("invalid release filename: {0}")]
    InvalidReleaseFile(String),

    #[error("invalid signing keys: {0}")]
    InvalidSigningKeys(String),

    #[error("invalid archive format: {0}")]
    InvalidArchiveFormat(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
