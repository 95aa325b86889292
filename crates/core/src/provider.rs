//! Provider identities, release files and protocol payloads.

use crate::error::{Error, Result};
use crate::module::{parse_semver, validate_component};
use crate::signing_keys::SigningKeys;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Plugin protocol versions assumed when a release does not declare any.
pub const DEFAULT_PROTOCOLS: &[&str] = &["5.0"];

/// `DEFAULT_PROTOCOLS` as owned strings.
pub fn default_protocols() -> Vec<String> {
    DEFAULT_PROTOCOLS.iter().map(|p| p.to_string()).collect()
}

static PLATFORM_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^terraform-provider-([^_/]+)_([^_/]+)_([^_/]+)_([^_/.]+)\.(zip|json)$")
        .expect("valid regex")
});

static MANIFEST_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^terraform-provider-([^_/]+)_([^_/]+)_manifest\.json$").expect("valid regex")
});

static SUMS_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^terraform-provider-([^_/]+)_([^_/]+)_SHA256SUMS(\.sig)?$").expect("valid regex")
});

/// A single `(os, arch)` build target.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.os, self.arch)
    }
}

/// Identity of a single provider platform archive.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub os: String,
    pub arch: String,
}

impl ProviderIdentity {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        os: impl Into<String>,
        arch: impl Into<String>,
    ) -> Result<Self> {
        let identity = Self {
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
            os: os.into(),
            arch: arch.into(),
        };
        for (field, value) in [
            ("namespace", &identity.namespace),
            ("name", &identity.name),
            ("version", &identity.version),
            ("os", &identity.os),
            ("arch", &identity.arch),
        ] {
            validate_component(field, value).map_err(Error::InvalidProvider)?;
        }
        if identity.name.contains('_') || identity.version.contains('_') {
            return Err(Error::InvalidProvider(format!(
                "name and version must not contain '_': {identity}"
            )));
        }
        parse_semver(&identity.version)?;
        Ok(identity)
    }

    pub fn platform(&self) -> Platform {
        Platform::new(&self.os, &self.arch)
    }

    /// `terraform-provider-<n>_<v>_<os>_<arch>.zip`
    pub fn archive_filename(&self) -> String {
        ReleaseFile::archive(&self.name, &self.version, &self.os, &self.arch).filename()
    }
}

impl fmt::Display for ProviderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{} ({}_{})",
            self.namespace, self.name, self.version, self.os, self.arch
        )
    }
}

/// A provider version with its available platforms, as listed by
/// `GET /v1/providers/{ns}/{n}/versions`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderVersion {
    pub version: String,
    #[serde(default = "default_protocols")]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub platforms: Vec<Platform>,
}

/// Download metadata of a single provider platform archive.
///
/// Serializes to the body of `GET /v1/providers/{ns}/{n}/{v}/download/{os}/{arch}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    #[serde(default, skip_serializing)]
    pub namespace: String,
    #[serde(default, skip_serializing)]
    pub name: String,
    #[serde(default, skip_serializing)]
    pub version: String,
    #[serde(default = "default_protocols")]
    pub protocols: Vec<String>,
    pub os: String,
    pub arch: String,
    pub filename: String,
    pub download_url: String,
    pub shasums_url: String,
    pub shasums_signature_url: String,
    pub shasum: String,
    #[serde(default)]
    pub signing_keys: SigningKeys,
}

/// The kind of file within a provider release.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReleaseFileKind {
    /// Platform archive (`.zip`) or per-platform `.json`.
    Archive {
        os: String,
        arch: String,
        ext: String,
    },
    /// `terraform-provider-<n>_<v>_manifest.json`
    Manifest,
    /// `terraform-provider-<n>_<v>_SHA256SUMS`
    Sums,
    /// `terraform-provider-<n>_<v>_SHA256SUMS.sig`
    SumsSignature,
}

/// A recognised provider release filename.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReleaseFile {
    pub name: String,
    pub version: String,
    pub kind: ReleaseFileKind,
}

impl ReleaseFile {
    pub fn archive(name: &str, version: &str, os: &str, arch: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            kind: ReleaseFileKind::Archive {
                os: os.to_string(),
                arch: arch.to_string(),
                ext: "zip".to_string(),
            },
        }
    }

    pub fn sums(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            kind: ReleaseFileKind::Sums,
        }
    }

    pub fn sums_signature(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            kind: ReleaseFileKind::SumsSignature,
        }
    }

    /// Parse a release filename, rejecting anything outside the canonical set.
    pub fn parse(filename: &str) -> Result<Self> {
        if let Some(caps) = PLATFORM_FILE.captures(filename) {
            return Ok(Self {
                name: caps[1].to_string(),
                version: caps[2].to_string(),
                kind: ReleaseFileKind::Archive {
                    os: caps[3].to_string(),
                    arch: caps[4].to_string(),
                    ext: caps[5].to_string(),
                },
            });
        }
        if let Some(caps) = MANIFEST_FILE.captures(filename) {
            return Ok(Self {
                name: caps[1].to_string(),
                version: caps[2].to_string(),
                kind: ReleaseFileKind::Manifest,
            });
        }
        if let Some(caps) = SUMS_FILE.captures(filename) {
            let kind = if caps.get(3).is_some() {
                ReleaseFileKind::SumsSignature
            } else {
                ReleaseFileKind::Sums
            };
            return Ok(Self {
                name: caps[1].to_string(),
                version: caps[2].to_string(),
                kind,
            });
        }
        Err(Error::InvalidReleaseFile(filename.to_string()))
    }

    /// Platform of a `.zip` archive, `None` for every other kind.
    pub fn platform(&self) -> Option<Platform> {
        match &self.kind {
            ReleaseFileKind::Archive { os, arch, ext } if ext == "zip" => {
                Some(Platform::new(os, arch))
            }
            _ => None,
        }
    }

    pub fn filename(&self) -> String {
        let (name, version) = (&self.name, &self.version);
        match &self.kind {
            ReleaseFileKind::Archive { os, arch, ext } => {
                format!("terraform-provider-{name}_{version}_{os}_{arch}.{ext}")
            }
            ReleaseFileKind::Manifest => {
                format!("terraform-provider-{name}_{version}_manifest.json")
            }
            ReleaseFileKind::Sums => format!("terraform-provider-{name}_{version}_SHA256SUMS"),
            ReleaseFileKind::SumsSignature => {
                format!("terraform-provider-{name}_{version}_SHA256SUMS.sig")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_filenames_round_trip() {
        for filename in [
            "terraform-provider-random_3.1.0_linux_amd64.zip",
            "terraform-provider-random_3.1.0_darwin_arm64.zip",
            "terraform-provider-random_3.1.0_windows_386.json",
            "terraform-provider-random_3.1.0_manifest.json",
            "terraform-provider-random_3.1.0_SHA256SUMS",
            "terraform-provider-random_3.1.0_SHA256SUMS.sig",
            "terraform-provider-google-beta_5.0.0-rc.1_linux_arm.zip",
        ] {
            let parsed = ReleaseFile::parse(filename).unwrap();
            assert_eq!(parsed.filename(), filename);
        }
    }

    #[test]
    fn archive_components_extracted() {
        let parsed = ReleaseFile::parse("terraform-provider-random_3.1.0_linux_amd64.zip").unwrap();
        assert_eq!(parsed.name, "random");
        assert_eq!(parsed.version, "3.1.0");
        assert_eq!(parsed.platform(), Some(Platform::new("linux", "amd64")));
    }

    #[test]
    fn unknown_filenames_rejected() {
        for filename in [
            "random_3.1.0_linux_amd64.zip",
            "terraform-provider-random_3.1.0_linux_amd64.tar.gz",
            "terraform-provider-random_3.1.0.zip",
            "terraform-provider-random_3.1.0_SHA256SUMS.asc",
            "../terraform-provider-random_3.1.0_linux_amd64.zip",
        ] {
            assert!(ReleaseFile::parse(filename).is_err(), "{filename}");
        }
    }

    #[test]
    fn provider_identity_requires_semver() {
        assert!(ProviderIdentity::new("hashicorp", "random", "3.1.0", "linux", "amd64").is_ok());
        assert!(ProviderIdentity::new("hashicorp", "random", "three", "linux", "amd64").is_err());
        assert!(ProviderIdentity::new("hashicorp", "", "3.1.0", "linux", "amd64").is_err());
    }

    #[test]
    fn provider_serializes_wire_fields_only() {
        let provider = Provider {
            namespace: "hashicorp".into(),
            name: "random".into(),
            version: "3.1.0".into(),
            protocols: default_protocols(),
            os: "linux".into(),
            arch: "amd64".into(),
            filename: "terraform-provider-random_3.1.0_linux_amd64.zip".into(),
            download_url: "https://example.com/a.zip".into(),
            shasums_url: "https://example.com/SHA256SUMS".into(),
            shasums_signature_url: "https://example.com/SHA256SUMS.sig".into(),
            shasum: "00".into(),
            signing_keys: SigningKeys::default(),
        };
        let value = serde_json::to_value(&provider).unwrap();
        assert!(value.get("namespace").is_none());
        assert_eq!(value["protocols"], serde_json::json!(["5.0"]));
        assert_eq!(value["signing_keys"]["gpg_public_keys"], serde_json::json!([]));
    }
}
