#![allow(deprecated)] // cargo_bin is deprecated but still functional

use assert_cmd::Command;
use boring_core::{ArchiveFormat, Layout, ModuleIdentity, ProviderIdentity, ProviderScope};
use predicates::str::contains;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const RELEASE_FILES: [&str; 4] = [
    "terraform-provider-random_3.1.0_SHA256SUMS",
    "terraform-provider-random_3.1.0_SHA256SUMS.sig",
    "terraform-provider-random_3.1.0_linux_amd64.zip",
    "terraform-provider-random_3.1.0_darwin_amd64.zip",
];

/// A scratch workspace: a config file pointing at a filesystem store.
struct Workspace {
    temp: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let config = format!(
            "[storage]\ntype = \"filesystem\"\npath = {:?}\n",
            temp.path().join("store").display().to_string()
        );
        fs::write(temp.path().join("registry.toml"), config).unwrap();
        Self { temp }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.temp.path().join(relative)
    }

    fn store(&self) -> PathBuf {
        self.path("store")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("boring-registry").unwrap();
        cmd.arg("--config")
            .arg(self.path("registry.toml"))
            .env_remove("RUST_LOG");
        cmd
    }

    fn write_module(&self, relative: &str, version: Option<&str>) -> PathBuf {
        let dir = self.path(relative);
        fs::create_dir_all(&dir).unwrap();
        let version = version
            .map(|v| format!("  version   = \"{v}\"\n"))
            .unwrap_or_default();
        fs::write(
            dir.join("boring-registry.hcl"),
            format!(
                "metadata {{\n  namespace = \"acme\"\n  name      = \"tls\"\n  provider  = \"aws\"\n{version}}}\n"
            ),
        )
        .unwrap();
        fs::write(dir.join("main.tf"), "resource \"tls_private_key\" \"this\" {}\n").unwrap();
        fs::write(dir.join("variables.tf"), "variable \"algorithm\" {}\n").unwrap();
        dir
    }

    fn release_dir(&self, with_keys: bool) -> PathBuf {
        let testdata = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../testdata");
        let dir = self.path("release");
        fs::create_dir_all(&dir).unwrap();
        for file in RELEASE_FILES {
            fs::copy(testdata.join("release").join(file), dir.join(file)).unwrap();
        }
        if with_keys {
            fs::copy(
                testdata.join("signing-keys.json"),
                dir.join("signing-keys.json"),
            )
            .unwrap();
        }
        dir
    }
}

fn module_key(version: &str) -> String {
    let module = ModuleIdentity::new("acme", "tls", "aws", version).unwrap();
    Layout::default().module_key(&module, &ArchiveFormat::default())
}

fn provider_archive_key() -> String {
    let provider =
        ProviderIdentity::new("hashicorp", "random", "3.1.0", "linux", "amd64").unwrap();
    Layout::default().provider_archive_key(ProviderScope::Hosted, &provider)
}

#[test]
fn upload_module_stores_the_archive() {
    let ws = Workspace::new();
    let dir = ws.write_module("tls", Some("0.1.0"));

    ws.command()
        .args(["upload", "module"])
        .arg(&dir)
        .assert()
        .success()
        .stdout(contains("uploaded acme/tls/aws@0.1.0"));

    assert!(ws.store().join(module_key("0.1.0")).is_file());
}

#[test]
fn repeated_module_upload_keeps_the_first_archive() {
    let ws = Workspace::new();
    let dir = ws.write_module("tls", Some("0.1.0"));
    ws.command()
        .args(["upload", "module"])
        .arg(&dir)
        .assert()
        .success();
    let stored = ws.store().join(module_key("0.1.0"));
    let first = fs::read(&stored).unwrap();

    fs::write(dir.join("main.tf"), "# edited\n").unwrap();
    ws.command()
        .args(["upload", "module"])
        .arg(&dir)
        .assert()
        .success()
        .stdout(contains("skipped  acme/tls/aws@0.1.0"));
    assert_eq!(fs::read(&stored).unwrap(), first);
}

#[test]
fn existing_module_fails_without_ignore_existing() {
    let ws = Workspace::new();
    let dir = ws.write_module("tls", Some("0.1.0"));
    ws.command()
        .args(["upload", "module"])
        .arg(&dir)
        .assert()
        .success();
    let first = fs::read(ws.store().join(module_key("0.1.0"))).unwrap();

    ws.command()
        .args(["upload", "module", "--ignore-existing=false"])
        .arg(&dir)
        .assert()
        .failure()
        .stderr(contains("already exists"));
    assert_eq!(fs::read(ws.store().join(module_key("0.1.0"))).unwrap(), first);
}

#[test]
fn version_flag_supplies_a_missing_version() {
    let ws = Workspace::new();
    let dir = ws.write_module("tls", None);

    ws.command()
        .args(["upload", "module", "--version", "1.4.0"])
        .arg(&dir)
        .assert()
        .success();
    assert!(ws.store().join(module_key("1.4.0")).is_file());
}

#[test]
fn version_in_file_and_flag_is_rejected() {
    let ws = Workspace::new();
    let dir = ws.write_module("tls", Some("0.1.0"));

    ws.command()
        .args(["upload", "module", "--version", "0.2.0"])
        .arg(&dir)
        .assert()
        .failure()
        .stderr(contains("--version"));
    assert!(!ws.store().join(module_key("0.1.0")).exists());
    assert!(!ws.store().join(module_key("0.2.0")).exists());
}

#[test]
fn version_constraints_filter_modules() {
    let ws = Workspace::new();
    let dir = ws.write_module("tls", Some("0.1.0"));

    ws.command()
        .args(["upload", "module", "--version-constraints-semver", ">= 1.0"])
        .arg(&dir)
        .assert()
        .success();
    assert!(!ws.store().join(module_key("0.1.0")).exists());

    ws.command()
        .args(["upload", "module", "--version-constraints-regex", r"^0\.1\."])
        .arg(&dir)
        .assert()
        .success();
    assert!(ws.store().join(module_key("0.1.0")).is_file());
}

#[test]
fn invalid_constraint_is_a_usage_error() {
    let ws = Workspace::new();
    let dir = ws.write_module("tls", Some("0.1.0"));

    ws.command()
        .args(["upload", "module", "--version-constraints-semver", ">= banana"])
        .arg(&dir)
        .assert()
        .failure()
        .stderr(contains("--version-constraints-semver"));
}

#[test]
fn upload_provider_publishes_a_signed_release() {
    let ws = Workspace::new();
    let dir = ws.release_dir(true);

    ws.command()
        .args(["upload", "provider", "--namespace", "hashicorp"])
        .arg(&dir)
        .assert()
        .success();

    let stored = fs::read(ws.store().join(provider_archive_key())).unwrap();
    assert_eq!(stored, fs::read(dir.join(RELEASE_FILES[2])).unwrap());
}

#[test]
fn tampered_provider_release_uploads_nothing() {
    let ws = Workspace::new();
    let dir = ws.release_dir(true);
    fs::write(dir.join(RELEASE_FILES[2]), b"tampered").unwrap();

    ws.command()
        .args(["upload", "provider", "--namespace", "hashicorp"])
        .arg(&dir)
        .assert()
        .failure()
        .stderr(contains("checksum mismatch"));
    assert!(!ws.store().join("providers").exists());
}

#[test]
fn provider_upload_requires_signing_keys() {
    let ws = Workspace::new();
    let dir = ws.release_dir(false);

    ws.command()
        .args(["upload", "provider", "--namespace", "hashicorp"])
        .arg(&dir)
        .assert()
        .failure()
        .stderr(contains("no signing keys"));
}

#[test]
fn migrate_moves_legacy_module_keys() {
    let ws = Workspace::new();
    let legacy = "namespace=acme/name=tls/provider=aws/version=0.1.0/acme-tls-aws-0.1.0.tar.gz";
    let legacy_path = ws.store().join(legacy);
    fs::create_dir_all(legacy_path.parent().unwrap()).unwrap();
    fs::write(&legacy_path, b"legacy archive").unwrap();

    ws.command()
        .args(["migrate", "modules", "--dry-run"])
        .assert()
        .success()
        .stdout(contains("would migrate"));
    assert!(legacy_path.is_file());
    assert!(!ws.store().join(module_key("0.1.0")).exists());

    ws.command()
        .args(["migrate", "modules"])
        .assert()
        .success()
        .stdout(contains("1 migrated, 0 skipped, 0 failed"));
    assert!(!legacy_path.exists());
    assert_eq!(
        fs::read(ws.store().join(module_key("0.1.0"))).unwrap(),
        b"legacy archive"
    );
}
