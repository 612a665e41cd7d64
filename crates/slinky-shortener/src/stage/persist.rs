use super::{draw_id, Next, Stage};
use crate::config::PipelineConfig;
use async_trait::async_trait;
use jiff::Timestamp;
use slinky_core::{
    Clock, CodePool, CodeSource, Context, GenerateError, GenerationRequest, GenerationResponse,
    IdSource, OutboxMessage, PersistedRecord, Relay, ShardKey, ShardRouter, ShortCode, Store,
};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

/// Writes the record and its outbox message in one transaction.
///
/// A committed code that did not come from the pool is then registered in the
/// pool's membership filter, so a later identical candidate falls back to the
/// pool instead of hitting the table's unique constraint.
///
/// On failure the next stage (compensation) runs once with a fresh,
/// uncancellable context and the persist error is returned unchanged; a
/// compensation failure is only logged. A pooled code whose persist is
/// dropped mid-flight is compensated the same way on a spawned task.
pub struct PersistStage<R: Relay, K: ShardRouter> {
    relay: Arc<R>,
    store: Arc<dyn Store<R::Tx, K::Partition>>,
    router: Arc<K>,
    ids: Arc<dyn IdSource>,
    pool: Arc<dyn CodePool>,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
    next: Next,
}

impl<R: Relay, K: ShardRouter> PersistStage<R, K> {
    pub fn new(
        relay: Arc<R>,
        store: Arc<dyn Store<R::Tx, K::Partition>>,
        router: Arc<K>,
        ids: Arc<dyn IdSource>,
        pool: Arc<dyn CodePool>,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            relay,
            store,
            router,
            ids,
            pool,
            clock,
            config,
            next: Next::default(),
        }
    }

    /// Commits the record; returns its expiration.
    async fn persist(
        &self,
        ctx: &Context,
        req: &GenerationRequest,
        id: i64,
        short_code: ShortCode,
    ) -> Result<Timestamp, GenerateError> {
        let now = self.clock.now();
        let expire_at = now.checked_add(req.expiration).map_err(|e| {
            GenerateError::InvalidRequest(format!(
                "expiration {} overflows from {now}: {e}",
                req.expiration
            ))
        })?;

        let store = Arc::clone(&self.store);
        let router = Arc::clone(&self.router);
        let ids = Arc::clone(&self.ids);
        let retry = self.config.id_retry.clone();
        let topic = self.config.topic.clone();
        let unit_ctx = ctx.clone();
        let biz_id = req.biz_id.clone();
        let original_url = req.original_url.clone();
        let comment = req.comment.clone();
        let creator_id = req.creator_id;
        let created_at = req.created_at;

        self.relay
            .execute_transactional(
                move |tx| {
                    Box::pin(async move {
                        let record = PersistedRecord {
                            id: draw_id(&unit_ctx, ids.as_ref(), &retry).await?,
                            original_url,
                            short_code,
                            expire_at,
                            comment,
                            creator_id,
                            created_at,
                            updated_at: now,
                        };
                        let dst = router.route(&K::Key::of(&record))?;
                        store.insert(tx, &dst, &record).await?;
                        debug!(
                            id = record.id,
                            code = %record.short_code,
                            table = %dst.table,
                            "Wrote record"
                        );
                        OutboxMessage::for_record(biz_id, topic, &record)
                    })
                },
                &OutboxMessage::message_id_for(id),
            )
            .await?;

        Ok(expire_at)
    }
}

/// Holds a pooled code while its persist is in flight.
///
/// Dropped without [`release`](Reservation::release), for example because the
/// caller abandoned the future, it runs compensation on a spawned task.
struct Reservation {
    compensate: Arc<dyn Stage>,
    req: GenerationRequest,
    resp: Option<GenerationResponse>,
}

impl Reservation {
    fn new(compensate: Arc<dyn Stage>, req: &GenerationRequest, resp: &GenerationResponse) -> Self {
        Self {
            compensate,
            req: req.clone(),
            resp: Some(resp.clone()),
        }
    }

    /// The persist settled; compensation, if any, is the caller's to run.
    fn release(mut self) {
        self.resp = None;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let Some(mut resp) = self.resp.take() else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            error!(id = resp.id, "No runtime left to return pooled code; code is lost");
            return;
        };

        warn!(id = resp.id, "Persist abandoned; returning pooled code");
        let compensate = Arc::clone(&self.compensate);
        let req = self.req.clone();
        runtime.spawn(async move {
            if let Err(e) = compensate
                .process(&Context::background(), &req, &mut resp)
                .await
            {
                error!(id = resp.id, error = %e, "Compensation failed; pooled code is lost");
            }
        });
    }
}

#[async_trait]
impl<R: Relay, K: ShardRouter> Stage for PersistStage<R, K> {
    fn name(&self) -> &'static str {
        "persist"
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
        let compensate = Arc::clone(self.next.get(self.name())?);
        let short_code = resp.short_code.clone().ok_or_else(|| {
            GenerateError::Configuration("persist stage reached without a short code".to_string())
        })?;

        let reservation = resp
            .pooled_code()
            .is_some()
            .then(|| Reservation::new(Arc::clone(&compensate), req, resp));

        match self.persist(ctx, req, resp.id, short_code.clone()).await {
            Ok(expire_at) => {
                if let Some(reservation) = reservation {
                    reservation.release();
                }
                resp.expire_at = Some(expire_at);
                // pooled codes are already in the filter
                if resp.code_source != Some(CodeSource::Pooled) {
                    if let Err(e) = self.pool.mark_used(&short_code).await {
                        warn!(
                            id = resp.id,
                            code = %short_code,
                            error = %e,
                            "Failed to register committed code in filter"
                        );
                    }
                }
                Ok(())
            }
            Err(err) => {
                warn!(id = resp.id, error = %err, "Persist failed; compensating");
                if let Some(reservation) = reservation {
                    reservation.release();
                }
                // runs even when the caller's context is already done
                let cleanup = Context::background();
                if let Err(compensation_error) = compensate.process(&cleanup, req, resp).await {
                    error!(
                        id = resp.id,
                        error = %err,
                        compensation_error = %compensation_error,
                        "Compensation failed; pooled code is lost"
                    );
                }
                Err(err)
            }
        }
    }
}
