//! Test fixtures: a signed provider release and module archives.

use boring_core::{ModuleIdentity, ProviderScope, SigningKeys};
use boring_storage::{ByteStream, PutMode, RegistryStorage};
use bytes::Bytes;

pub const NAMESPACE: &str = "hashicorp";
pub const PROVIDER: &str = "random";
pub const VERSION: &str = "3.1.0";

pub const SUMS_FILE: &str = "terraform-provider-random_3.1.0_SHA256SUMS";
pub const SIG_FILE: &str = "terraform-provider-random_3.1.0_SHA256SUMS.sig";
pub const LINUX_ZIP: &str = "terraform-provider-random_3.1.0_linux_amd64.zip";
pub const DARWIN_ZIP: &str = "terraform-provider-random_3.1.0_darwin_amd64.zip";

pub const SUMS: &[u8] =
    include_bytes!("../../../../testdata/release/terraform-provider-random_3.1.0_SHA256SUMS");
pub const SIG: &[u8] =
    include_bytes!("../../../../testdata/release/terraform-provider-random_3.1.0_SHA256SUMS.sig");
pub const LINUX_ARCHIVE: &[u8] =
    include_bytes!("../../../../testdata/release/terraform-provider-random_3.1.0_linux_amd64.zip");
pub const DARWIN_ARCHIVE: &[u8] =
    include_bytes!("../../../../testdata/release/terraform-provider-random_3.1.0_darwin_amd64.zip");
pub const SIGNING_KEYS: &[u8] = include_bytes!("../../../../testdata/signing-keys.json");

pub const LINUX_SHA256: &str = "cea109936340a5d0b6c5266d52aa1d3f9d811e1ce2ab4b178375375f5df1a43e";

/// A single-chunk byte stream.
pub fn stream(data: &'static [u8]) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(Bytes::from_static(data)) }))
}

/// Every file of the `random` 3.1.0 release, by filename.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn release_files() -> [(&'static str, &'static [u8]); 4] {
    [
        (SUMS_FILE, SUMS),
        (SIG_FILE, SIG),
        (LINUX_ZIP, LINUX_ARCHIVE),
        (DARWIN_ZIP, DARWIN_ARCHIVE),
    ]
}

/// Store the `random` 3.1.0 release and its namespace signing keys.
#[allow(dead_code)]
pub async fn seed_provider(registry: &RegistryStorage, scope: ProviderScope<'_>) {
    let keys = SigningKeys::from_json(SIGNING_KEYS).expect("Failed to parse signing keys");
    registry
        .put_signing_keys(scope, NAMESPACE, &keys, PutMode::Create)
        .await
        .expect("Failed to store signing keys");
    for (filename, data) in release_files() {
        registry
            .upload_provider_release_file(scope, NAMESPACE, filename, stream(data))
            .await
            .expect("Failed to store release file");
    }
}

/// Store a module archive with fixed content.
#[allow(dead_code)]
pub async fn seed_module(
    registry: &RegistryStorage,
    namespace: &str,
    name: &str,
    provider: &str,
    version: &str,
) -> ModuleIdentity {
    let module = ModuleIdentity::new(namespace, name, provider, version)
        .expect("Failed to build module identity");
    registry
        .upload_module(&module, stream(b"module archive"))
        .await
        .expect("Failed to store module");
    module
}
