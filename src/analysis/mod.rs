//! On-demand analysis over windows of stored ping samples.

mod stats;
mod timeline;

pub use stats::*;
pub use timeline::*;
