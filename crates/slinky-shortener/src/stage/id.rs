use super::{Next, Stage};
use crate::config::IdRetryPolicy;
use async_trait::async_trait;
use slinky_core::{Context, GenerateError, GenerationRequest, GenerationResponse, IdPoll, IdSource};
use std::sync::Arc;
use tracing::{debug, trace};

/// Polls `ids` until it yields an id, it closes, or the attempts run out.
///
/// Cancellation is checked before every poll and races every backoff sleep.
pub(crate) async fn draw_id(
    ctx: &Context,
    ids: &dyn IdSource,
    policy: &IdRetryPolicy,
) -> Result<i64, GenerateError> {
    let attempts = policy.attempts.max(1);

    for attempt in 1..=attempts {
        if let Some(reason) = ctx.err() {
            return Err(GenerateError::Cancelled(reason));
        }

        match ids.try_next() {
            IdPoll::Ready(id) if id != 0 => {
                trace!(id, attempt, "Drew id");
                return Ok(id);
            }
            IdPoll::Ready(_) => debug!(attempt, "Id source yielded zero; skipping"),
            IdPoll::Closed => return Err(GenerateError::SourceClosed),
            IdPoll::Empty => trace!(attempt, "Id source empty"),
        }

        if attempt < attempts {
            ctx.run(tokio::time::sleep(policy.backoff)).await?;
        }
    }

    Err(GenerateError::IdUnavailable { attempts })
}

/// Assigns the generation id.
pub struct IdStage {
    ids: Arc<dyn IdSource>,
    policy: IdRetryPolicy,
    next: Next,
}

impl IdStage {
    pub fn new(ids: Arc<dyn IdSource>, policy: IdRetryPolicy) -> Self {
        Self {
            ids,
            policy,
            next: Next::default(),
        }
    }
}

#[async_trait]
impl Stage for IdStage {
    fn name(&self) -> &'static str {
        "id"
    }

    fn set_next(&mut self, next: Arc<dyn Stage>) {
        self.next.set(next);
    }

    async fn process(
        &self,
        ctx: &Context,
        req: &GenerationRequest,
        resp: &mut GenerationResponse,
    ) -> Result<(), GenerateError> {
        resp.id = draw_id(ctx, self.ids.as_ref(), &self.policy).await?;
        self.next.forward(self.name(), ctx, req, resp).await
    }
}
