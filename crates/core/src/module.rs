//! Module identities and archive formats.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a published module version.
///
/// The `(namespace, name, provider, version)` tuple is the primary key of a
/// module artifact; exactly one archive exists per identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleIdentity {
    pub namespace: String,
    pub name: String,
    pub provider: String,
    pub version: String,
}

impl ModuleIdentity {
    /// Build an identity, rejecting empty or path-unsafe components.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        provider: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Self> {
        let identity = Self {
            namespace: namespace.into(),
            name: name.into(),
            provider: provider.into(),
            version: version.into(),
        };
        for (field, value) in [
            ("namespace", &identity.namespace),
            ("name", &identity.name),
            ("provider", &identity.provider),
            ("version", &identity.version),
        ] {
            validate_component(field, value).map_err(Error::InvalidModule)?;
        }
        Ok(identity)
    }

    /// Parse the version as SemVer. Required before publishing.
    pub fn semver(&self) -> Result<semver::Version> {
        parse_semver(&self.version)
    }

    /// Archive file stem: `<ns>-<n>-<p>-<v>`.
    pub fn file_stem(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.namespace, self.name, self.provider, self.version
        )
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}@{}",
            self.namespace, self.name, self.provider, self.version
        )
    }
}

/// Parse a version string as SemVer.
pub fn parse_semver(version: &str) -> Result<semver::Version> {
    semver::Version::parse(version).map_err(|e| Error::InvalidVersion {
        version: version.to_string(),
        reason: e.to_string(),
    })
}

/// Validate a single identity component for use inside an object key.
pub fn validate_component(field: &str, value: &str) -> std::result::Result<(), String> {
    if value.is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    if value == "." || value == ".." {
        return Err(format!("{field} must not be a relative path: {value:?}"));
    }
    if let Some(c) = value
        .chars()
        .find(|c| matches!(c, '/' | '\\' | '=') || c.is_whitespace() || c.is_control())
    {
        return Err(format!("{field} contains invalid character {c:?}: {value:?}"));
    }
    Ok(())
}

/// Archive format of stored module artifacts, used as the file extension.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArchiveFormat(String);

impl ArchiveFormat {
    /// The gzip-compressed POSIX tar format produced by the publisher.
    pub fn tar_gz() -> Self {
        Self("tar.gz".to_string())
    }

    pub fn extension(&self) -> &str {
        &self.0
    }

    pub fn is_tar_gz(&self) -> bool {
        matches!(self.0.as_str(), "tar.gz" | "tgz")
    }
}

impl Default for ArchiveFormat {
    fn default() -> Self {
        Self::tar_gz()
    }
}

impl FromStr for ArchiveFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let valid = !s.is_empty()
            && !s.starts_with('.')
            && !s.ends_with('.')
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '.');
        if valid {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(Error::InvalidArchiveFormat(s.to_string()))
        }
    }
}

impl TryFrom<String> for ArchiveFormat {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ArchiveFormat> for String {
    fn from(value: ArchiveFormat) -> Self {
        value.0
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
