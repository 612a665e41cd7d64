use super::{Next, Stage};
use async_trait::async_trait;
use slinky_core::{
    CodeSource, Context, GenerateError, GenerationRequest, GenerationResponse, ShortCode,
    UrlHasher,
};
use std::sync::Arc;
use tracing::trace;

/// Derives the candidate code, or takes the caller's custom code as is.
pub struct HashStage {
    hasher: Arc<dyn UrlHasher>,
    next: Next,
}

impl HashStage {
    pub fn new(hasher: Arc<dyn UrlHasher>) -> Self {
        Self {
            hasher,
            next: Next::default(),
        }
    }
}

#[async_trait]
impl Stage for HashStage {
    fn name(&self) -> &'static str {
        "hash"
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
        let (code, source) = match &req.custom_code {
            Some(custom) => (ShortCode::new(custom.as_str())?, CodeSource::Custom),
            None => (self.hasher.shorten(&req.original_url)?, CodeSource::Hashed),
        };
        trace!(id = resp.id, code = %code, ?source, "Assigned candidate code");

        resp.short_code = Some(code);
        resp.code_source = Some(source);
        self.next.forward(self.name(), ctx, req, resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::SignedDuration;
    use slinky_core::HashError;

    struct Fixed(Result<&'static str, &'static str>);

    impl UrlHasher for Fixed {
        fn shorten(&self, _url: &str) -> Result<ShortCode, HashError> {
            self.0
                .map(ShortCode::new_unchecked)
                .map_err(|e| HashError(e.to_string()))
        }
    }

    /// Terminal stage that only records what reached it.
    struct Sink;

    #[async_trait]
    impl Stage for Sink {
        fn name(&self) -> &'static str {
            "sink"
        }

        fn set_next(&mut self, _next: Arc<dyn Stage>) {}

        async fn process(
            &self,
            _ctx: &Context,
            _req: &GenerationRequest,
            _resp: &mut GenerationResponse,
        ) -> Result<(), GenerateError> {
            Ok(())
        }
    }

    fn stage(hasher: Fixed) -> HashStage {
        let mut stage = HashStage::new(Arc::new(hasher));
        stage.set_next(Arc::new(Sink));
        stage
    }

    fn request(custom: Option<&str>) -> GenerationRequest {
        let mut req = GenerationRequest::builder()
            .biz_id("biz")
            .original_url("https://example.com/page")
            .expiration(SignedDuration::from_hours(1))
            .build();
        req.custom_code = custom.map(str::to_string);
        req
    }

    #[tokio::test]
    async fn writes_hashed_candidate() {
        let mut resp = GenerationResponse::new();
        stage(Fixed(Ok("hashed1")))
            .process(&Context::background(), &request(None), &mut resp)
            .await
            .unwrap();
        assert_eq!(resp.short_code.unwrap().as_str(), "hashed1");
        assert_eq!(resp.code_source, Some(CodeSource::Hashed));
    }

    #[tokio::test]
    async fn custom_code_skips_hasher() {
        let mut resp = GenerationResponse::new();
        stage(Fixed(Err("must not be called")))
            .process(&Context::background(), &request(Some("my-link")), &mut resp)
            .await
            .unwrap();
        assert_eq!(resp.short_code.unwrap().as_str(), "my-link");
        assert_eq!(resp.code_source, Some(CodeSource::Custom));
    }

    #[tokio::test]
    async fn hasher_errors_propagate_verbatim() {
        let mut resp = GenerationResponse::new();
        let err = stage(Fixed(Err("digest failed")))
            .process(&Context::background(), &request(None), &mut resp)
            .await
            .unwrap_err();
        assert_eq!(err, GenerateError::Hash(HashError("digest failed".into())));
        assert!(resp.short_code.is_none());
    }
}
