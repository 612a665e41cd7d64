//! Unique id sources for the generation pipeline.
//!
//! Ids come from a [`Tinyflake`] generator running on a dedicated producer
//! task and are handed to consumers through a [`ChannelIdSource`], which the
//! pipeline polls without blocking.

mod channel;
pub mod error;
mod sequence;
mod tiny_id;
mod tinyflake;

pub use channel::{spawn_id_stream, spawn_tinyflake_stream, ChannelIdSource};
pub use error::Error;
pub use sequence::SequenceIdSource;
pub use tiny_id::TinyId;
pub use tinyflake::{Tinyflake, TinyflakeSettings};
