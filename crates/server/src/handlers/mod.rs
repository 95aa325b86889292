//! HTTP request handlers.

pub mod common;
pub mod health;
pub mod mirror;
pub mod modules;
pub mod providers;
pub mod proxy;

pub use health::*;
pub use mirror::mirror_file;
pub use modules::*;
pub use providers::*;
pub use proxy::*;
