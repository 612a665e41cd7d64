//! The short-code generation pipeline.
//!
//! A [`Pipeline`] is an ordered chain of stages that turns one
//! [`GenerationRequest`](slinky_core::GenerationRequest) into a persisted,
//! notified record: draw an id, derive a code, swap it for a pooled code when
//! it may already be taken, then persist the record together with its outbox
//! message. A failed persist hands the pooled code back to the pool.
//!
//! [`Shortener`] wires the collaborators into a fresh pipeline per request
//! and fans batches out onto a bounded set of workers.

pub mod batch;
pub mod config;
pub mod pipeline;
pub mod shortener;
pub mod stage;

pub use batch::{failures, BatchItemOutcome};
pub use config::{BatchConfig, IdRetryPolicy, PipelineConfig, RETRY_COUNTS};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use shortener::Shortener;
pub use stage::{CompensateStage, DedupStage, HashStage, IdStage, PersistStage, Stage};
