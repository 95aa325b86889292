//! HMAC-SHA256 signatures for proxy download URLs.

use crate::error::{SignerError, SignerResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies `(target, expiry)` pairs with a shared secret.
#[derive(Clone)]
pub struct UrlSigner {
    key: Vec<u8>,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner").finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> SignerResult<Self> {
        let key = secret.as_ref().to_vec();
        if key.is_empty() {
            return Err(SignerError::InvalidSecret("secret must not be empty".into()));
        }
        Ok(Self { key })
    }

    fn mac(&self, target: &str, expiry: i64) -> HmacSha256 {
        // HMAC accepts keys of any length.
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .unwrap_or_else(|_| unreachable!("HMAC-SHA256 accepts any key length"));
        mac.update(target.as_bytes());
        mac.update(&expiry.to_be_bytes());
        mac
    }

    /// Lowercase hex HMAC over `target || expiry`.
    pub fn sign(&self, target: &str, expiry: i64) -> String {
        hex::encode(self.mac(target, expiry).finalize().into_bytes())
    }

    /// Constant-time check of a hex signature.
    pub fn verify(&self, target: &str, expiry: i64, signature: &str) -> bool {
        let Ok(raw) = hex::decode(signature) else {
            return false;
        };
        self.mac(target, expiry).verify_slice(&raw).is_ok()
    }

    /// Verify the signature, then the expiry against `now` (unix seconds).
    pub fn check(&self, target: &str, expiry: i64, signature: &str, now: i64) -> SignerResult<()> {
        if !self.verify(target, expiry, signature) {
            return Err(SignerError::VerificationFailed);
        }
        if now > expiry {
            return Err(SignerError::Expired { expiry });
        }
        Ok(())
    }
}
