//! Short-code pool backends.
//!
//! A pool holds pre-generated codes that the pipeline falls back to when a
//! hashed candidate may already be taken, plus a membership filter that
//! answers "definitely unused" / "possibly used" for any code.

pub mod memory;
pub mod redis;

pub use memory::{BloomConfig, InMemoryCodePool};
pub use redis::{RedisCodePool, RedisPoolKeys};
