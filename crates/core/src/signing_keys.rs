//! Per-namespace GPG signing key bundle (`signing-keys.json`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// An ASCII-armored GPG public key trusted for a namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpgPublicKey {
    pub key_id: String,
    pub ascii_armor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

/// The signing key bundle stored next to a namespace's providers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKeys {
    #[serde(default)]
    pub gpg_public_keys: Vec<GpgPublicKey>,
}

/// Both on-disk shapes are accepted: the bundle and a bare key object.
#[derive(Deserialize)]
#[serde(untagged)]
enum SigningKeysDocument {
    Bundle { gpg_public_keys: Vec<GpgPublicKey> },
    Single(GpgPublicKey),
}

impl SigningKeys {
    /// Decode `signing-keys.json`.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let document: SigningKeysDocument = serde_json::from_slice(data)
            .map_err(|e| Error::InvalidSigningKeys(e.to_string()))?;
        let keys = match document {
            SigningKeysDocument::Bundle { gpg_public_keys } => gpg_public_keys,
            SigningKeysDocument::Single(key) => vec![key],
        };
        if let Some(key) = keys.iter().find(|k| k.ascii_armor.trim().is_empty()) {
            return Err(Error::InvalidSigningKeys(format!(
                "key {} has no ascii_armor",
                key.key_id
            )));
        }
        Ok(Self {
            gpg_public_keys: keys,
        })
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.gpg_public_keys.is_empty()
    }

    pub fn armored_keys(&self) -> impl Iterator<Item = &str> {
        self.gpg_public_keys.iter().map(|k| k.ascii_armor.as_str())
    }
}
