//! Core types and traits for the Slinky short-code generator.
//!
//! This crate holds the domain model shared by every other crate: the
//! generation request/result types, the error taxonomy, the cancellation
//! [`Context`], and the collaborator traits the generation pipeline is
//! written against ([`IdSource`], [`UrlHasher`], [`CodePool`], [`Store`],
//! [`Relay`] and [`ShardRouter`]).

pub mod clock;
pub mod context;
pub mod error;
pub mod hasher;
pub mod id_source;
pub mod model;
pub mod pool;
pub mod shard;
pub mod shortcode;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{CancelHandle, CancelReason, Context};
pub use error::{CacheError, GenerateError, HashError, ShardError, StorageError};
pub use hasher::UrlHasher;
pub use id_source::{IdPoll, IdSource};
pub use model::{
    CodeSource, GenerationRequest, GenerationResponse, GenerationResult, MessageStatus,
    OutboxMessage, PersistedRecord,
};
pub use pool::CodePool;
pub use shard::{ShardDestination, ShardKey, ShardRouter};
pub use shortcode::ShortCode;
pub use store::{Relay, Store, UnitFuture};
