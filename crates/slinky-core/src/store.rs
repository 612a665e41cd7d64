use crate::error::{GenerateError, StorageError};
use crate::model::{OutboxMessage, PersistedRecord};
use crate::shard::ShardDestination;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;

/// The future returned by a transactional unit.
pub type UnitFuture<'t> =
    Pin<Box<dyn Future<Output = Result<OutboxMessage, GenerateError>> + Send + 't>>;

/// Durable storage for short-link records.
///
/// Writes happen inside a transaction opened by the matching [`Relay`];
/// the store enforces uniqueness of the short code within a destination table.
#[async_trait]
pub trait Store<Tx, P>: Send + Sync + 'static
where
    Tx: Send + 'static,
    P: Clone + Send + Sync + 'static,
{
    /// Writes a record into `dst` as part of `tx`.
    ///
    /// Returns `StorageError::Conflict` when the code is already taken in that table.
    async fn insert(
        &self,
        tx: &mut Tx,
        dst: &ShardDestination<P>,
        record: &PersistedRecord,
    ) -> Result<(), StorageError>;

    /// Looks up a committed record by code inside one destination table.
    async fn find_by_code(
        &self,
        dst: &ShardDestination<P>,
        code: &ShortCode,
    ) -> Result<Option<PersistedRecord>, StorageError>;
}

/// Transactional outbox: runs a unit of work and its outbox message as one commit.
#[async_trait]
pub trait Relay: Send + Sync + 'static {
    type Tx: Send + 'static;

    /// Runs `unit` inside one transaction and persists the message it returns.
    ///
    /// Commits only if `unit` succeeds; the message is then relayed at least
    /// once, deduplicated by `dedup_key`. The unit's own error is returned as is.
    async fn execute_transactional<U>(&self, unit: U, dedup_key: &str) -> Result<(), GenerateError>
    where
        U: for<'t> FnOnce(&'t mut Self::Tx) -> UnitFuture<'t> + Send + 'static;
}
