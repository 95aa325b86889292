//! Publisher library behind the `boring-registry` command.
//!
//! This crate provides:
//! - Module discovery, archiving and upload (`upload module`)
//! - Signed provider release validation and upload (`upload provider`)

pub mod archive;
pub mod error;
pub mod metadata;
pub mod module;
pub mod provider;

pub use archive::Exclusions;
pub use error::{PublishError, PublishResult};
pub use module::{ModuleOptions, ModulePublisher};
pub use provider::{ProviderOptions, ProviderPublisher};

/// What a publish run did, by module identity or release filename.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub uploaded: Vec<String>,
    pub skipped: Vec<String>,
}
