use super::{Next, Stage};
use async_trait::async_trait;
use slinky_core::{
    CacheError, CodePool, CodeSource, Context, GenerateError, GenerationRequest,
    GenerationResponse,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs a pool call, retrying once when it times out.
async fn retry_on_timeout<T, F, Fut>(
    ctx: &Context,
    op: &'static str,
    mut call: F,
) -> Result<T, GenerateError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CacheError>>,
{
    match ctx.run(call()).await? {
        Err(err) if err.is_timeout() => {
            warn!(op, error = %err, "Code pool call timed out; retrying once");
            Ok(ctx.run(call()).await??)
        }
        other => Ok(other?),
    }
}

/// Replaces a hashed candidate with a pooled code when the filter says it
/// may already be in use.
pub struct DedupStage {
    pool: Arc<dyn CodePool>,
    next: Next,
}

impl DedupStage {
    pub fn new(pool: Arc<dyn CodePool>) -> Self {
        Self {
            pool,
            next: Next::default(),
        }
    }
}

#[async_trait]
impl Stage for DedupStage {
    fn name(&self) -> &'static str {
        "dedup"
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
        let candidate = match (&resp.short_code, resp.code_source) {
            (Some(code), Some(CodeSource::Hashed)) => code.clone(),
            _ => return self.next.forward(self.name(), ctx, req, resp).await,
        };

        let pool = &self.pool;
        let code = &candidate;
        let taken = retry_on_timeout(ctx, "exists", move || pool.exists(code)).await?;

        if taken {
            let pooled = retry_on_timeout(ctx, "get_one", move || pool.get_one()).await?;
            debug!(
                id = resp.id,
                candidate = %candidate,
                code = %pooled,
                "Hashed code may be taken; using pooled code"
            );
            resp.short_code = Some(pooled);
            resp.code_source = Some(CodeSource::Pooled);
        }

        self.next.forward(self.name(), ctx, req, resp).await
    }
}
