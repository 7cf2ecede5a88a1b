//! Database module for smoketrail.
//!
//! Provides SQLite storage for targets and probe samples.

mod models;
mod store;

pub use models::*;
pub use store::*;
