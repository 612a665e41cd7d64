use crate::stage::Stage;
use slinky_core::{Context, GenerateError, GenerationRequest, GenerationResponse, GenerationResult};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Collects stages in execution order and links them.
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<Box<dyn Stage>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage after the ones already added.
    pub fn stage(mut self, stage: impl Stage) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Links every stage to its successor, tail first.
    pub fn build(self) -> Result<Pipeline, GenerateError> {
        let mut head: Option<Arc<dyn Stage>> = None;
        for mut stage in self.stages.into_iter().rev() {
            if let Some(next) = head.take() {
                stage.set_next(next);
            }
            head = Some(Arc::from(stage));
        }

        let head = head.ok_or_else(|| {
            GenerateError::Configuration("pipeline needs at least one stage".to_string())
        })?;
        Ok(Pipeline { head })
    }
}

/// A linked chain of stages.
///
/// Holds no per-request state; the response accumulator lives only for the
/// duration of one [`generate`](Pipeline::generate) call.
pub struct Pipeline {
    head: Arc<dyn Stage>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    #[instrument(skip_all, fields(biz_id = %req.biz_id))]
    pub async fn generate(
        &self,
        ctx: &Context,
        req: &GenerationRequest,
    ) -> Result<GenerationResult, GenerateError> {
        req.validate()?;

        let mut resp = GenerationResponse::new();
        self.head.process(ctx, req, &mut resp).await?;

        let result = resp.into_result(req.original_url.clone())?;
        debug!(id = result.id, code = %result.short_code, "Generated short code");
        Ok(result)
    }
}
