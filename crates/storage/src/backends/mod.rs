//! Storage backend implementations.

pub mod cloud;
pub mod filesystem;
pub mod memory;
pub mod s3;

use crate::error::{StorageError, StorageResult};

/// Reject keys that no backend can address consistently.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".to_string()));
    }
    if key.starts_with('/') || key.ends_with('/') || key.contains("//") {
        return Err(StorageError::InvalidKey(format!("malformed key: {key}")));
    }
    if key
        .split('/')
        .any(|segment| segment == "." || segment == "..")
    {
        return Err(StorageError::InvalidKey(format!(
            "path traversal not allowed: {key}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_key_rejects_malformed_keys() {
        for bad in ["", "/abs", "trailing/", "a//b", "a/../b", "./a"] {
            assert!(validate_key(bad).is_err(), "{bad:?} should be rejected");
        }
        validate_key("providers/namespace=acme/name=x/version=1.0.0/file.zip").unwrap();
    }
}
