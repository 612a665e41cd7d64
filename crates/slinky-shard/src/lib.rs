//! Shard routing strategies.
//!
//! Both routers are built once from an immutable configuration and then only
//! read, so a single instance can be shared across every generation task.

pub mod hash;
pub mod time;

pub use hash::{HashRouter, HashRouterConfig, HashShard};
pub use time::{TimeRouter, TimeRouterConfig, TimeShard};

/// Default prefix for short-link table names.
pub const DEFAULT_TABLE_PREFIX: &str = "short_url_";
