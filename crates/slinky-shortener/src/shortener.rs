use crate::batch::{failures, BatchItemOutcome};
use crate::config::{BatchConfig, PipelineConfig};
use crate::pipeline::Pipeline;
use crate::stage::{CompensateStage, DedupStage, HashStage, IdStage, PersistStage};
use slinky_core::{
    Clock, CodePool, Context, GenerateError, GenerationRequest, GenerationResult, IdSource,
    Relay, ShardRouter, Store, SystemClock, UrlHasher,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use typed_builder::TypedBuilder;

/// Generates short codes from the injected collaborators.
///
/// Every call gets its own pipeline; only the collaborators are shared, and
/// they synchronize internally.
#[derive(TypedBuilder)]
pub struct Shortener<R: Relay, K: ShardRouter> {
    id_source: Arc<dyn IdSource>,
    hasher: Arc<dyn UrlHasher>,
    pool: Arc<dyn CodePool>,
    store: Arc<dyn Store<R::Tx, K::Partition>>,
    relay: Arc<R>,
    router: Arc<K>,
    #[builder(default = Arc::new(SystemClock) as Arc<dyn Clock>)]
    clock: Arc<dyn Clock>,
    #[builder(default)]
    config: PipelineConfig,
    #[builder(default)]
    batch: BatchConfig,
}

impl<R: Relay, K: ShardRouter> Clone for Shortener<R, K> {
    fn clone(&self) -> Self {
        Self {
            id_source: Arc::clone(&self.id_source),
            hasher: Arc::clone(&self.hasher),
            pool: Arc::clone(&self.pool),
            store: Arc::clone(&self.store),
            relay: Arc::clone(&self.relay),
            router: Arc::clone(&self.router),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
            batch: self.batch.clone(),
        }
    }
}

type Task = Result<JoinHandle<Result<GenerationResult, GenerateError>>, GenerateError>;

impl<R: Relay, K: ShardRouter> Shortener<R, K> {
    /// A fresh id → hash → dedup → persist → compensate chain.
    pub fn pipeline(&self) -> Result<Pipeline, GenerateError> {
        Pipeline::builder()
            .stage(IdStage::new(
                Arc::clone(&self.id_source),
                self.config.id_retry.clone(),
            ))
            .stage(HashStage::new(Arc::clone(&self.hasher)))
            .stage(DedupStage::new(Arc::clone(&self.pool)))
            .stage(PersistStage::<R, K>::new(
                Arc::clone(&self.relay),
                Arc::clone(&self.store),
                Arc::clone(&self.router),
                Arc::clone(&self.id_source),
                Arc::clone(&self.pool),
                Arc::clone(&self.clock),
                self.config.clone(),
            ))
            .stage(CompensateStage::new(Arc::clone(&self.pool)))
            .build()
    }

    /// Generates one short code on the caller's task.
    pub async fn generate(
        &self,
        ctx: &Context,
        req: &GenerationRequest,
    ) -> Result<GenerationResult, GenerateError> {
        self.pipeline()?.generate(ctx, req).await
    }

    /// Generates every request independently on at most
    /// [`BatchConfig::max_workers`] concurrent workers.
    ///
    /// Outcomes come back in input order. A failing item, including one whose
    /// worker panicked, only affects its own outcome.
    pub async fn generate_batch(
        &self,
        ctx: &Context,
        requests: Vec<GenerationRequest>,
    ) -> Vec<BatchItemOutcome> {
        let workers = Arc::new(Semaphore::new(self.batch.max_workers.max(1)));
        let mut tasks: Vec<(usize, String, Task)> = Vec::with_capacity(requests.len());

        for (index, request) in requests.into_iter().enumerate() {
            let original_url = request.original_url.clone();
            let permit = match ctx.run(Arc::clone(&workers).acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(e)) => {
                    let err = GenerateError::Configuration(format!("worker pool closed: {e}"));
                    tasks.push((index, original_url, Err(err)));
                    continue;
                }
                Err(reason) => {
                    tasks.push((index, original_url, Err(reason.into())));
                    continue;
                }
            };

            let shortener = self.clone();
            let ctx = ctx.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                shortener.generate(&ctx, &request).await
            });
            tasks.push((index, original_url, Ok(handle)));
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (index, original_url, task) in tasks {
            let result = match task {
                Ok(handle) => match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(index, url = %original_url, error = %e, "Batch worker panicked");
                        Err(GenerateError::Configuration(format!("worker panicked: {e}")))
                    }
                },
                Err(err) => Err(err),
            };
            if let Err(err) = &result {
                warn!(index, url = %original_url, error = %err, "Batch item failed");
            }
            outcomes.push(BatchItemOutcome {
                index,
                original_url,
                result,
            });
        }

        info!(
            total = outcomes.len(),
            failed = failures(&outcomes),
            "Batch generation finished"
        );
        outcomes
    }
}
