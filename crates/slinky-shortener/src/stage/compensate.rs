use super::Stage;
use async_trait::async_trait;
use slinky_core::{CodePool, Context, GenerateError, GenerationRequest, GenerationResponse};
use std::sync::Arc;
use tracing::{debug, info};

/// Returns a pooled code to the pool after a failed persist.
///
/// Terminal: it never forwards. Hashed and custom codes were never taken
/// from the pool, so they are left alone.
pub struct CompensateStage {
    pool: Arc<dyn CodePool>,
}

impl CompensateStage {
    pub fn new(pool: Arc<dyn CodePool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Stage for CompensateStage {
    fn name(&self) -> &'static str {
        "compensate"
    }

    fn set_next(&mut self, _next: Arc<dyn Stage>) {}

    async fn process(
        &self,
        _ctx: &Context,
        _req: &GenerationRequest,
        resp: &mut GenerationResponse,
    ) -> Result<(), GenerateError> {
        let Some(code) = resp.pooled_code() else {
            debug!(id = resp.id, "No pooled code to return");
            return Ok(());
        };

        self.pool.insert_one(code).await?;
        info!(id = resp.id, code = %code, "Returned pooled code to the pool");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::SignedDuration;
    use slinky_core::{CodeSource, ShortCode};
    use slinky_pool::{BloomConfig, InMemoryCodePool};

    fn request() -> GenerationRequest {
        GenerationRequest::builder()
            .biz_id("biz")
            .original_url("https://example.com")
            .expiration(SignedDuration::from_hours(1))
            .build()
    }

    fn response(source: CodeSource) -> GenerationResponse {
        GenerationResponse {
            id: 3,
            short_code: Some(ShortCode::new_unchecked("back01")),
            code_source: Some(source),
            expire_at: None,
        }
    }

    #[tokio::test]
    async fn pooled_code_goes_back() {
        let pool = Arc::new(InMemoryCodePool::new(BloomConfig::default()).unwrap());
        let stage = CompensateStage::new(pool.clone());
        stage
            .process(&Context::background(), &request(), &mut response(CodeSource::Pooled))
            .await
            .unwrap();
        assert_eq!(pool.count().await.unwrap(), 1);
        assert_eq!(pool.get_one().await.unwrap().as_str(), "back01");
    }

    #[tokio::test]
    async fn hashed_code_is_not_pooled() {
        let pool = Arc::new(InMemoryCodePool::new(BloomConfig::default()).unwrap());
        let stage = CompensateStage::new(pool.clone());
        for source in [CodeSource::Hashed, CodeSource::Custom] {
            stage
                .process(&Context::background(), &request(), &mut response(source))
                .await
                .unwrap();
        }
        assert_eq!(pool.count().await.unwrap(), 0);
    }
}
