//! Provider network mirror support.

mod pull_through;
mod upstream;

pub use pull_through::{CopyError, CopyJob, CopyKey, CopyOutcome, PullThroughMirror};
pub use upstream::{HttpUpstream, Upstream, UpstreamError, UpstreamResult};
