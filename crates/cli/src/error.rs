//! Publisher errors.

use boring_signer::SignerError;
use boring_storage::StorageError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("invalid module metadata in {path}: {reason}")]
    Metadata { path: PathBuf, reason: String },

    #[error("invalid exclude pattern {pattern:?}: {reason}")]
    Exclude { pattern: String, reason: String },

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("missing release file {0}")]
    MissingFile(PathBuf),

    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    Checksum {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("no SHA256SUMS file found in {0}")]
    NoRelease(PathBuf),

    #[error("no signing keys for namespace {0}: add signing-keys.json to the release directory")]
    NoSigningKeys(String),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Core(#[from] boring_core::Error),

    #[error("signature verification failed: {0}")]
    Signature(#[from] SignerError),

    #[error("archive task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PublishError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

pub type PublishResult<T> = Result<T, PublishError>;
