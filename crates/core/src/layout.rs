//! Canonical object key layout.
//!
//! Every component of a key is written as a `key=value` path segment so the
//! identity of an object can be recovered from its key alone:
//!
//! ```text
//! <modules>/namespace=<ns>/name=<n>/provider=<p>/version=<v>/<ns>-<n>-<p>-<v>.<fmt>
//! <providers>/namespace=<ns>/name=<n>/version=<v>/terraform-provider-<n>_<v>_<os>_<arch>.zip
//! <providers>/namespace=<ns>/name=<n>/version=<v>/terraform-provider-<n>_<v>_SHA256SUMS[.sig]
//! <providers>/namespace=<ns>/signing-keys.json
//! ```
//!
//! Mirrored providers use the provider layout below `<mirror>/hostname=<h>`.
//! Keys written before the `modules`/`providers` segments existed sit
//! directly at the root (`namespace=<ns>/...`) and are only read by migration.

use crate::SIGNING_KEYS_FILE;
use crate::module::{ArchiveFormat, ModuleIdentity};
use crate::provider::{ProviderIdentity, ReleaseFile};
use std::collections::BTreeMap;

/// Prefix shared by all legacy keys.
pub const LEGACY_PREFIX: &str = "namespace=";

/// Which provider tree a key belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderScope<'a> {
    /// Providers published to this registry.
    Hosted,
    /// Providers mirrored from an upstream registry host.
    Mirror { hostname: &'a str },
}

/// Identity recovered from a provider object key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderObject {
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub file: ReleaseFile,
}

/// Parse every `key=value` segment of `path` into a map.
pub fn parse_segments(path: &str) -> BTreeMap<&str, &str> {
    path.split('/')
        .filter_map(|segment| segment.split_once('='))
        .collect()
}

/// Last path segment of a key.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Maps identities to object keys and back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    modules: String,
    providers: String,
    mirror: String,
}

impl Default for Layout {
    fn default() -> Self {
        Self::new("modules", "providers", "mirror")
    }
}

impl Layout {
    pub fn new(modules: &str, providers: &str, mirror: &str) -> Self {
        let clean = |p: &str| p.trim_matches('/').to_string();
        Self {
            modules: clean(modules),
            providers: clean(providers),
            mirror: clean(mirror),
        }
    }

    /// Root of all module keys, with trailing slash.
    pub fn modules_root(&self) -> String {
        format!("{}/", self.modules)
    }

    /// Whether `key` lies inside the module, provider or mirror tree.
    pub fn is_registry_key(&self, key: &str) -> bool {
        if key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return false;
        }
        [&self.modules, &self.providers, &self.mirror]
            .into_iter()
            .any(|root| {
                key.strip_prefix(root.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
            })
    }

    fn providers_root(&self, scope: ProviderScope<'_>) -> String {
        match scope {
            ProviderScope::Hosted => self.providers.clone(),
            ProviderScope::Mirror { hostname } => format!("{}/hostname={hostname}", self.mirror),
        }
    }

    /// `<modules>/namespace=<ns>/name=<n>/provider=<p>/`
    pub fn module_base(&self, namespace: &str, name: &str, provider: &str) -> String {
        format!(
            "{}/namespace={namespace}/name={name}/provider={provider}/",
            self.modules
        )
    }

    pub fn module_key(&self, module: &ModuleIdentity, format: &ArchiveFormat) -> String {
        format!(
            "{}version={}/{}.{}",
            self.module_base(&module.namespace, &module.name, &module.provider),
            module.version,
            module.file_stem(),
            format.extension()
        )
    }

    /// Recover a module identity from a canonical module key.
    pub fn parse_module_key(&self, key: &str) -> Option<ModuleIdentity> {
        let rest = key.strip_prefix(&self.modules_root())?;
        parse_module_path(rest)
    }

    /// `<root>/namespace=<ns>/name=<n>/`
    pub fn provider_base(&self, scope: ProviderScope<'_>, namespace: &str, name: &str) -> String {
        format!(
            "{}/namespace={namespace}/name={name}/",
            self.providers_root(scope)
        )
    }

    /// `<root>/namespace=<ns>/name=<n>/version=<v>/`
    pub fn provider_version_prefix(
        &self,
        scope: ProviderScope<'_>,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> String {
        format!(
            "{}version={version}/",
            self.provider_base(scope, namespace, name)
        )
    }

    /// Key of any release file of a provider version.
    pub fn provider_file_key(
        &self,
        scope: ProviderScope<'_>,
        namespace: &str,
        file: &ReleaseFile,
    ) -> String {
        format!(
            "{}{}",
            self.provider_version_prefix(scope, namespace, &file.name, &file.version),
            file.filename()
        )
    }

    pub fn provider_archive_key(
        &self,
        scope: ProviderScope<'_>,
        provider: &ProviderIdentity,
    ) -> String {
        let file =
            ReleaseFile::archive(&provider.name, &provider.version, &provider.os, &provider.arch);
        self.provider_file_key(scope, &provider.namespace, &file)
    }

    pub fn sums_key(
        &self,
        scope: ProviderScope<'_>,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> String {
        self.provider_file_key(scope, namespace, &ReleaseFile::sums(name, version))
    }

    pub fn sums_signature_key(
        &self,
        scope: ProviderScope<'_>,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> String {
        self.provider_file_key(scope, namespace, &ReleaseFile::sums_signature(name, version))
    }

    /// `<root>/namespace=<ns>/signing-keys.json`
    pub fn signing_keys_key(&self, scope: ProviderScope<'_>, namespace: &str) -> String {
        format!(
            "{}/namespace={namespace}/{SIGNING_KEYS_FILE}",
            self.providers_root(scope)
        )
    }

    /// Recover the identity of a provider release file from its key.
    pub fn parse_provider_key(
        &self,
        scope: ProviderScope<'_>,
        key: &str,
    ) -> Option<ProviderObject> {
        let root = format!("{}/", self.providers_root(scope));
        parse_provider_path(key.strip_prefix(&root)?)
    }

    /// Map a legacy root-level key to its canonical key.
    ///
    /// Returns `None` for keys that are not recognisable legacy objects.
    pub fn canonical_from_legacy(&self, legacy_key: &str) -> Option<LegacyObject> {
        if !legacy_key.starts_with(LEGACY_PREFIX) {
            return None;
        }
        let segments = parse_segments(legacy_key);
        if segments.contains_key("provider") {
            let module = parse_module_path(legacy_key)?;
            let ext = file_name(legacy_key).strip_prefix(&format!("{}.", module.file_stem()))?;
            let format = ext.parse::<ArchiveFormat>().ok()?;
            return Some(LegacyObject::Module {
                canonical_key: self.module_key(&module, &format),
                module,
            });
        }
        if file_name(legacy_key) == SIGNING_KEYS_FILE {
            let namespace = *segments.get("namespace")?;
            if legacy_key != format!("namespace={namespace}/{SIGNING_KEYS_FILE}") {
                return None;
            }
            return Some(LegacyObject::ProviderFile {
                canonical_key: self.signing_keys_key(ProviderScope::Hosted, namespace),
            });
        }
        let object = parse_provider_path(legacy_key)?;
        Some(LegacyObject::ProviderFile {
            canonical_key: self.provider_file_key(
                ProviderScope::Hosted,
                &object.namespace,
                &object.file,
            ),
        })
    }
}

/// A legacy object and where it belongs in the canonical layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LegacyObject {
    Module {
        module: ModuleIdentity,
        canonical_key: String,
    },
    ProviderFile {
        canonical_key: String,
    },
}

fn parse_module_path(path: &str) -> Option<ModuleIdentity> {
    let segments = parse_segments(path);
    let module = ModuleIdentity::new(
        *segments.get("namespace")?,
        *segments.get("name")?,
        *segments.get("provider")?,
        *segments.get("version")?,
    )
    .ok()?;
    let expected = format!(
        "namespace={}/name={}/provider={}/version={}/{}.",
        module.namespace,
        module.name,
        module.provider,
        module.version,
        module.file_stem()
    );
    path.starts_with(&expected).then_some(module)
}

fn parse_provider_path(path: &str) -> Option<ProviderObject> {
    let segments = parse_segments(path);
    let namespace = *segments.get("namespace")?;
    let name = *segments.get("name")?;
    let version = *segments.get("version")?;
    if segments.contains_key("provider") {
        return None;
    }
    let file = ReleaseFile::parse(file_name(path)).ok()?;
    if file.name != name || file.version != version {
        return None;
    }
    let canonical = format!(
        "namespace={namespace}/name={name}/version={version}/{}",
        file.filename()
    );
    (path == canonical).then(|| ProviderObject {
        namespace: namespace.to_string(),
        name: name.to_string(),
        version: version.to_string(),
        file,
    })
}
