pub mod fixtures;
pub mod mocks;

#[allow(unused_imports)]
pub use fixtures::{body, seeded_bytes, sha256_hex};
#[allow(unused_imports)]
pub use mocks::FlakyListingBackend;
