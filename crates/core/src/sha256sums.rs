//! SHA256SUMS release manifests.

use crate::error::{Error, Result};
use crate::provider::{Platform, ReleaseFile, ReleaseFileKind};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A parsed `terraform-provider-<n>_<v>_SHA256SUMS` file.
///
/// Every entry names a release file of the same provider name and version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sha256Sums {
    name: String,
    version: String,
    entries: BTreeMap<String, [u8; 32]>,
}

impl Sha256Sums {
    /// Parse `sha256sum`-style lines: `<64 hex>  <filename>`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidSha256Sums("not valid UTF-8".to_string()))?;

        let mut release: Option<(String, String)> = None;
        let mut entries = BTreeMap::new();

        for (idx, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let (hex_digest, filename) = line.split_once(char::is_whitespace).ok_or_else(|| {
                Error::InvalidSha256Sums(format!("line {}: missing filename", idx + 1))
            })?;
            // `*` marks binary mode in sha256sum output
            let filename = filename.trim_start().trim_start_matches('*');

            let mut digest = [0u8; 32];
            hex::decode_to_slice(hex_digest, &mut digest).map_err(|e| {
                Error::InvalidSha256Sums(format!("line {}: bad digest: {e}", idx + 1))
            })?;

            let file = ReleaseFile::parse(filename).map_err(|_| {
                Error::InvalidSha256Sums(format!("line {}: unexpected file {filename:?}", idx + 1))
            })?;
            if !matches!(
                file.kind,
                ReleaseFileKind::Archive { .. } | ReleaseFileKind::Manifest
            ) {
                return Err(Error::InvalidSha256Sums(format!(
                    "line {}: {filename:?} cannot be listed in SHA256SUMS",
                    idx + 1
                )));
            }

            match &release {
                None => release = Some((file.name.clone(), file.version.clone())),
                Some((name, version)) if *name != file.name || *version != file.version => {
                    return Err(Error::InvalidSha256Sums(format!(
                        "line {}: {filename:?} does not belong to {name} {version}",
                        idx + 1
                    )));
                }
                Some(_) => {}
            }

            if entries.insert(filename.to_string(), digest).is_some() {
                return Err(Error::InvalidSha256Sums(format!(
                    "duplicate entry for {filename:?}"
                )));
            }
        }

        let (name, version) =
            release.ok_or_else(|| Error::InvalidSha256Sums("no entries".to_string()))?;
        Ok(Self {
            name,
            version,
            entries,
        })
    }

    /// Provider name shared by all entries.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn get(&self, filename: &str) -> Option<&[u8; 32]> {
        self.entries.get(filename)
    }

    /// Lowercase hex digest of `filename`.
    pub fn hex(&self, filename: &str) -> Option<String> {
        self.get(filename).map(hex::encode)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &[u8; 32])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Platforms of the `.zip` archives listed in the file.
    pub fn platforms(&self) -> Vec<Platform> {
        self.entries
            .keys()
            .filter_map(|f| ReleaseFile::parse(f).ok())
            .filter_map(|f| f.platform())
            .collect()
    }

    /// Check `data` against the recorded digest of `filename`.
    ///
    /// A file missing from the manifest is a validation error.
    pub fn verify(&self, filename: &str, data: &[u8]) -> Result<()> {
        let expected = self.get(filename).ok_or_else(|| {
            Error::InvalidSha256Sums(format!("{filename:?} is not listed"))
        })?;
        let actual: [u8; 32] = Sha256::digest(data).into();
        if &actual != expected {
            return Err(Error::InvalidSha256Sums(format!(
                "checksum mismatch for {filename:?}: expected {}, got {}",
                hex::encode(expected),
                hex::encode(actual)
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX: &str = "cea109936340a5d0b6c5266d52aa1d3f9d811e1ce2ab4b178375375f5df1a43e";
    const DARWIN: &str = "1de5a6d2b5f1b250f69f63a0923539aa2bff15697fbcc0897de0aca14e8b643e";

    fn sample() -> String {
        format!(
            "{DARWIN}  terraform-provider-random_3.1.0_darwin_amd64.zip\n\
             {LINUX}  terraform-provider-random_3.1.0_linux_amd64.zip\n"
        )
    }

    #[test]
    fn parses_entries() {
        let sums = Sha256Sums::parse(sample().as_bytes()).unwrap();
        assert_eq!(sums.name(), "random");
        assert_eq!(sums.version(), "3.1.0");
        assert_eq!(
            sums.hex("terraform-provider-random_3.1.0_linux_amd64.zip")
                .as_deref(),
            Some(LINUX)
        );
        assert_eq!(
            sums.platforms(),
            vec![Platform::new("darwin", "amd64"), Platform::new("linux", "amd64")]
        );
    }

    #[test]
    fn verifies_content() {
        let sums = Sha256Sums::parse(sample().as_bytes()).unwrap();
        let linux = b"fake provider archive linux/amd64\n";
        sums.verify("terraform-provider-random_3.1.0_linux_amd64.zip", linux)
            .unwrap();
        assert!(
            sums.verify("terraform-provider-random_3.1.0_darwin_amd64.zip", linux)
                .is_err()
        );
        assert!(
            sums.verify("terraform-provider-random_3.1.0_windows_amd64.zip", linux)
                .is_err()
        );
    }

    #[test]
    fn accepts_binary_marker_and_crlf() {
        let text = format!("{LINUX} *terraform-provider-random_3.1.0_linux_amd64.zip\r\n\r\n");
        let sums = Sha256Sums::parse(text.as_bytes()).unwrap();
        let zip = "terraform-provider-random_3.1.0_linux_amd64.zip";
        assert!(sums.get(zip).is_some());
    }

    #[test]
    fn rejects_mixed_releases() {
        let text = format!(
            "{LINUX}  terraform-provider-random_3.1.0_linux_amd64.zip\n\
             {DARWIN}  terraform-provider-random_3.2.0_darwin_amd64.zip\n"
        );
        assert!(Sha256Sums::parse(text.as_bytes()).is_err());

        let text = format!(
            "{LINUX}  terraform-provider-random_3.1.0_linux_amd64.zip\n\
             {DARWIN}  terraform-provider-null_3.1.0_darwin_amd64.zip\n"
        );
        assert!(Sha256Sums::parse(text.as_bytes()).is_err());
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(Sha256Sums::parse(b"").is_err());
        let short = b"deadbeef  terraform-provider-random_3.1.0_linux_amd64.zip";
        assert!(Sha256Sums::parse(short).is_err());
        assert!(Sha256Sums::parse(LINUX.as_bytes()).is_err());
        assert!(Sha256Sums::parse(format!("{LINUX}  random.zip").as_bytes()).is_err());
        let dup = format!(
            "{LINUX}  terraform-provider-random_3.1.0_linux_amd64.zip\n\
             {LINUX}  terraform-provider-random_3.1.0_linux_amd64.zip\n"
        );
        assert!(Sha256Sums::parse(dup.as_bytes()).is_err());
    }
}
