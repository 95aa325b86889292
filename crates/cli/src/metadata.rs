//! `boring-registry.hcl` module metadata.
//!
//! ```hcl
//! metadata {
//!   namespace = "acme"
//!   name      = "tls"
//!   provider  = "aws"
//!   version   = "0.1.0"
//! }
//! ```

use crate::error::{PublishError, PublishResult};
use boring_core::ModuleIdentity;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct MetadataFile {
    metadata: ModuleMetadata,
}

/// The `metadata` block of a module directory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ModuleMetadata {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl ModuleMetadata {
    pub fn parse(path: &Path, content: &str) -> PublishResult<Self> {
        let file: MetadataFile = hcl::from_str(content).map_err(|e| PublishError::Metadata {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(file.metadata)
    }

    pub async fn read(path: &Path) -> PublishResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(PublishError::io(path))?;
        Self::parse(path, &content)
    }

    /// Resolve the module identity. The version comes from the file or from
    /// `flag_version`, never both, and must be SemVer.
    pub fn identity(
        &self,
        path: &Path,
        flag_version: Option<&str>,
    ) -> PublishResult<ModuleIdentity> {
        let invalid = |reason: String| PublishError::Metadata {
            path: path.to_path_buf(),
            reason,
        };

        let version = match (self.version.as_deref(), flag_version) {
            (Some(_), Some(_)) => {
                return Err(invalid(
                    "version is set in the metadata file and with --version".to_string(),
                ));
            }
            (Some(v), None) | (None, Some(v)) => v,
            (None, None) => {
                return Err(invalid(
                    "version is missing: set it in the metadata file or with --version".to_string(),
                ));
            }
        };
        for (field, value) in [
            ("namespace", self.namespace.as_str()),
            ("name", self.name.as_str()),
            ("provider", self.provider.as_str()),
            ("version", version),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(format!("{field} must not be empty")));
            }
        }

        let module = ModuleIdentity::new(&self.namespace, &self.name, &self.provider, version)
            .map_err(|e| invalid(e.to_string()))?;
        module.semver().map_err(|e| invalid(e.to_string()))?;
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WITH_VERSION: &str = r#"
        metadata {
          namespace = "acme"
          name      = "tls"
          provider  = "aws"
          version   = "0.1.0"
        }
    "#;

    const WITHOUT_VERSION: &str = r#"
        metadata {
          namespace = "acme"
          name      = "tls"
          provider  = "aws"
        }
    "#;

    fn path() -> &'static Path {
        Path::new("modules/tls/boring-registry.hcl")
    }

    #[test]
    fn parses_metadata_block() {
        let metadata = ModuleMetadata::parse(path(), WITH_VERSION).unwrap();
        assert_eq!(metadata.namespace, "acme");
        assert_eq!(metadata.version.as_deref(), Some("0.1.0"));

        let module = metadata.identity(path(), None).unwrap();
        assert_eq!(module.to_string(), "acme/tls/aws@0.1.0");
    }

    #[test]
    fn version_comes_from_exactly_one_place() {
        let with = ModuleMetadata::parse(path(), WITH_VERSION).unwrap();
        assert!(with.identity(path(), Some("0.2.0")).is_err());

        let without = ModuleMetadata::parse(path(), WITHOUT_VERSION).unwrap();
        assert!(without.identity(path(), None).is_err());
        assert_eq!(without.identity(path(), Some("0.2.0")).unwrap().version, "0.2.0");
    }

    #[test]
    fn version_must_be_semver() {
        let without = ModuleMetadata::parse(path(), WITHOUT_VERSION).unwrap();
        let err = without.identity(path(), Some("latest")).unwrap_err();
        assert!(matches!(err, PublishError::Metadata { .. }));
    }

    #[test]
    fn empty_fields_are_rejected() {
        let metadata = ModuleMetadata::parse(
            path(),
            r#"metadata {
                 namespace = ""
                 name      = "tls"
                 provider  = "aws"
               }"#,
        )
        .unwrap();
        let err = metadata.identity(path(), Some("0.1.0")).unwrap_err();
        assert!(err.to_string().contains("namespace"), "{err}");
    }

    #[test]
    fn missing_block_is_an_error() {
        assert!(ModuleMetadata::parse(path(), "other {}").is_err());
    }
}
