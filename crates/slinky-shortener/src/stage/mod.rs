//! Pipeline stages.
//!
//! Each stage does one step and hands the request on to the stage linked
//! after it. Stages are linked once by the
//! [`PipelineBuilder`](crate::PipelineBuilder) and never relinked.

mod compensate;
mod dedup;
mod hash;
mod id;
mod persist;

pub use compensate::CompensateStage;
pub use dedup::DedupStage;
pub use hash::HashStage;
pub use id::IdStage;
pub use persist::PersistStage;

pub(crate) use id::draw_id;

use async_trait::async_trait;
use slinky_core::{Context, GenerateError, GenerationRequest, GenerationResponse};
use std::sync::Arc;

#[async_trait]
pub trait Stage: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Links the stage that runs after this one.
    fn set_next(&mut self, next: Arc<dyn Stage>);

    /// Runs this stage and, unless it is the last one, the rest of the chain.
    async fn process(
        &self,
        ctx: &Context,
        req: &GenerationRequest,
        resp: &mut GenerationResponse,
    ) -> Result<(), GenerateError>;
}

/// The link from one stage to the next.
#[derive(Clone, Default)]
pub(crate) struct Next(Option<Arc<dyn Stage>>);

impl Next {
    pub(crate) fn set(&mut self, stage: Arc<dyn Stage>) {
        self.0 = Some(stage);
    }

    pub(crate) fn get(&self, from: &'static str) -> Result<&Arc<dyn Stage>, GenerateError> {
        self.0.as_ref().ok_or_else(|| {
            GenerateError::Configuration(format!("{from} stage has no next stage"))
        })
    }

    pub(crate) async fn forward(
        &self,
        from: &'static str,
        ctx: &Context,
        req: &GenerationRequest,
        resp: &mut GenerationResponse,
    ) -> Result<(), GenerateError> {
        self.get(from)?.process(ctx, req, resp).await
    }
}
