//! GPG verification of provider release signatures.

use crate::error::{SignerError, SignerResult};
use boring_core::SigningKeys;
use pgp::types::PublicKeyTrait;
use pgp::{Deserializable, SignedPublicKey, StandaloneSignature};

struct TrustedKey {
    key_id: String,
    key: SignedPublicKey,
}

/// A set of trusted public keys for one namespace.
pub struct Keyring {
    keys: Vec<TrustedKey>,
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.keys.iter().map(|k| &k.key_id))
            .finish()
    }
}

impl Keyring {
    /// Parse ASCII-armored public keys. Keys that fail to parse are skipped
    /// with a warning; at least one must parse.
    pub fn from_armored<'a>(armored: impl IntoIterator<Item = &'a str>) -> SignerResult<Self> {
        let mut keys = Vec::new();
        let mut last_error = None;
        for armor in armored {
            match SignedPublicKey::from_string(armor) {
                Ok((key, _headers)) => keys.push(TrustedKey {
                    key_id: hex::encode_upper(key.key_id()),
                    key,
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unparsable public key");
                    last_error = Some(e.to_string());
                }
            }
        }

        if keys.is_empty() {
            return Err(match last_error {
                Some(e) => SignerError::KeyParsing(e),
                None => SignerError::NoTrustedKeys,
            });
        }
        Ok(Self { keys })
    }

    pub fn from_signing_keys(signing_keys: &SigningKeys) -> SignerResult<Self> {
        Self::from_armored(signing_keys.armored_keys())
    }

    /// Hex IDs of the primary keys, uppercase.
    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|k| k.key_id.as_str())
    }

    /// Verify a detached signature (binary or armored) over `data`.
    ///
    /// Returns the ID of the primary key whose key or subkey made the
    /// signature.
    pub fn verify_detached(&self, data: &[u8], signature: &[u8]) -> SignerResult<String> {
        let signature = parse_signature(signature)?;
        for trusted in &self.keys {
            if signature.verify(&trusted.key, data).is_ok() {
                return Ok(trusted.key_id.clone());
            }
            if trusted
                .key
                .public_subkeys
                .iter()
                .any(|subkey| signature.verify(subkey, data).is_ok())
            {
                return Ok(trusted.key_id.clone());
            }
        }
        Err(SignerError::VerificationFailed)
    }

    /// Whether `signature` is a valid signature over the SHA256SUMS bytes.
    pub fn is_valid_sha256sums(&self, sums: &[u8], signature: &[u8]) -> bool {
        self.verify_detached(sums, signature).is_ok()
    }
}

fn parse_signature(signature: &[u8]) -> SignerResult<StandaloneSignature> {
    let trimmed = signature
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(signature, |start| &signature[start..]);
    if trimmed.starts_with(b"-----BEGIN PGP SIGNATURE-----") {
        let text = std::str::from_utf8(trimmed)
            .map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
        StandaloneSignature::from_string(text)
            .map(|(sig, _headers)| sig)
            .map_err(|e| SignerError::InvalidSignature(e.to_string()))
    } else {
        StandaloneSignature::from_bytes(signature)
            .map_err(|e| SignerError::InvalidSignature(e.to_string()))
    }
}

/// Verify a release's SHA256SUMS signature against a namespace's keys.
///
/// Returns the ID of the key that verified it.
pub fn verify_release(
    signing_keys: &SigningKeys,
    sums: &[u8],
    signature: &[u8],
) -> SignerResult<String> {
    let keyring = Keyring::from_signing_keys(signing_keys)?;
    let key_id = keyring.verify_detached(sums, signature)?;
    tracing::debug!(key_id = %key_id, "SHA256SUMS signature verified");
    Ok(key_id)
}
