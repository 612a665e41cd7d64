use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use slinky_core::{
    GenerateError, MessageStatus, OutboxMessage, PersistedRecord, Relay, ShardDestination,
    ShortCode, StorageError, Store, UnitFuture,
};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, trace};

type RowKey<P> = (P, String, String);

/// Writes staged by one transactional unit; applied only on commit.
#[derive(Debug)]
pub struct MemoryTx<P> {
    staged: Vec<(ShardDestination<P>, PersistedRecord)>,
}

impl<P> Default for MemoryTx<P> {
    fn default() -> Self {
        Self { staged: Vec::new() }
    }
}

impl<P> MemoryTx<P> {
    pub fn staged(&self) -> &[(ShardDestination<P>, PersistedRecord)] {
        &self.staged
    }
}

/// In-memory implementation of [`Store`] using DashMap.
///
/// Rows are keyed by `(partition, table, short_code)`, which mirrors the
/// per-table unique constraint of the relational backend.
#[derive(Debug)]
pub struct InMemoryStore<P = String>
where
    P: Eq + Hash,
{
    rows: DashMap<RowKey<P>, PersistedRecord>,
    outbox: DashMap<String, OutboxMessage>,
    /// Serializes commits so the conflict check and the apply step are one unit.
    commit_lock: Mutex<()>,
}

impl<P> Default for InMemoryStore<P>
where
    P: Eq + Hash,
{
    fn default() -> Self {
        Self {
            rows: DashMap::new(),
            outbox: DashMap::new(),
            commit_lock: Mutex::new(()),
        }
    }
}

fn row_key<P: Clone>(dst: &ShardDestination<P>, code: &ShortCode) -> RowKey<P> {
    (dst.partition.clone(), dst.table.clone(), code.as_str().to_owned())
}

impl<P> InMemoryStore<P>
where
    P: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed records.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every committed record, in no particular order.
    pub fn records(&self) -> Vec<PersistedRecord> {
        self.rows.iter().map(|entry| entry.value().clone()).collect()
    }

    fn commit(
        &self,
        tx: MemoryTx<P>,
        dedup_key: &str,
        message: OutboxMessage,
    ) -> Result<(), StorageError> {
        let _guard = self.commit_lock.lock();

        for (i, (dst, record)) in tx.staged.iter().enumerate() {
            let key = row_key(dst, &record.short_code);
            let staged_twice = tx.staged[..i]
                .iter()
                .any(|(other, rec)| row_key(other, &rec.short_code) == key);
            if staged_twice || self.rows.contains_key(&key) {
                return Err(StorageError::Conflict(record.short_code.to_string()));
            }
        }

        for (dst, record) in tx.staged {
            let key = row_key(&dst, &record.short_code);
            self.rows.insert(key, record);
        }
        self.outbox.entry(dedup_key.to_owned()).or_insert(message);

        Ok(())
    }
}

#[async_trait]
impl<P> Store<MemoryTx<P>, P> for InMemoryStore<P>
where
    P: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    async fn insert(
        &self,
        tx: &mut MemoryTx<P>,
        dst: &ShardDestination<P>,
        record: &PersistedRecord,
    ) -> Result<(), StorageError> {
        let key = row_key(dst, &record.short_code);
        if self.rows.contains_key(&key) {
            debug!(code = %record.short_code, table = %dst.table, "Short code already persisted");
            return Err(StorageError::Conflict(record.short_code.to_string()));
        }

        trace!(code = %record.short_code, id = record.id, table = %dst.table, "Staged record");
        tx.staged.push((dst.clone(), record.clone()));
        Ok(())
    }

    async fn find_by_code(
        &self,
        dst: &ShardDestination<P>,
        code: &ShortCode,
    ) -> Result<Option<PersistedRecord>, StorageError> {
        Ok(self
            .rows
            .get(&row_key(dst, code))
            .map(|entry| entry.value().clone()))
    }
}

/// Local outbox over an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemoryRelay<P = String>
where
    P: Eq + Hash,
{
    store: Arc<InMemoryStore<P>>,
}

impl<P> Clone for InMemoryRelay<P>
where
    P: Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<P> InMemoryRelay<P>
where
    P: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    pub fn new(store: Arc<InMemoryStore<P>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<InMemoryStore<P>> {
        &self.store
    }

    /// Messages committed but not yet delivered, ordered by message id.
    pub fn pending(&self) -> Vec<OutboxMessage> {
        let mut pending: Vec<_> = self
            .store
            .outbox
            .iter()
            .filter(|entry| entry.status == MessageStatus::NotSent)
            .map(|entry| entry.value().clone())
            .collect();
        pending.sort_by(|a, b| a.message_id.cmp(&b.message_id));
        pending
    }

    /// Marks a delivered message; returns whether a pending message matched.
    pub fn mark_sent(&self, message_id: &str) -> bool {
        let mut matched = false;
        for mut entry in self.store.outbox.iter_mut() {
            if entry.message_id == message_id && entry.status == MessageStatus::NotSent {
                entry.status = MessageStatus::Sent;
                matched = true;
            }
        }
        matched
    }

    /// Every outbox message regardless of status.
    pub fn messages(&self) -> Vec<OutboxMessage> {
        self.store
            .outbox
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl<P> Relay for InMemoryRelay<P>
where
    P: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    type Tx = MemoryTx<P>;

    async fn execute_transactional<U>(&self, unit: U, dedup_key: &str) -> Result<(), GenerateError>
    where
        U: for<'t> FnOnce(&'t mut Self::Tx) -> UnitFuture<'t> + Send + 'static,
    {
        let mut tx = MemoryTx::default();
        let message = unit(&mut tx).await?;

        self.store
            .commit(tx, dedup_key, message)
            .map_err(GenerateError::Persistence)?;
        debug!(dedup_key, "Committed record with outbox message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::Timestamp;

    fn dst(table: &str) -> ShardDestination<String> {
        ShardDestination {
            partition: "db1".to_string(),
            table: table.to_string(),
        }
    }

    fn record(id: i64, code: &str) -> PersistedRecord {
        let now = Timestamp::from_second(1_700_000_000).unwrap();
        PersistedRecord {
            id,
            original_url: format!("https://example.com/{id}"),
            short_code: ShortCode::new_unchecked(code),
            expire_at: now,
            comment: String::new(),
            creator_id: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn relay() -> InMemoryRelay {
        InMemoryRelay::new(Arc::new(InMemoryStore::new()))
    }

    async fn persist(relay: &InMemoryRelay, id: i64, code: &str) -> Result<(), GenerateError> {
        let store = Arc::clone(relay.store());
        let record = record(id, code);
        relay
            .execute_transactional(
                move |tx| {
                    Box::pin(async move {
                        store.insert(tx, &dst("t_0"), &record).await?;
                        OutboxMessage::for_record("biz", "topic", &record)
                    })
                },
                &OutboxMessage::message_id_for(id),
            )
            .await
    }

    #[tokio::test]
    async fn commit_applies_record_and_message_together() {
        let relay = relay();
        persist(&relay, 1, "abc").await.unwrap();

        let found = relay
            .store()
            .find_by_code(&dst("t_0"), &ShortCode::new_unchecked("abc"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, 1);
        let pending = relay.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message_id, "gen-1");
    }

    #[tokio::test]
    async fn failing_unit_leaves_nothing_behind() {
        let relay = relay();
        let store = Arc::clone(relay.store());
        let err = relay
            .execute_transactional(
                move |tx| {
                    Box::pin(async move {
                        store.insert(tx, &dst("t_0"), &record(2, "xyz")).await?;
                        Err::<OutboxMessage, _>(GenerateError::Relay("boom".to_string()))
                    })
                },
                "gen-2",
            )
            .await
            .unwrap_err();

        assert_eq!(err, GenerateError::Relay("boom".to_string()));
        assert!(relay.store().is_empty());
        assert!(relay.messages().is_empty());
    }

    #[tokio::test]
    async fn duplicate_code_in_same_table_conflicts() {
        let relay = relay();
        persist(&relay, 1, "dup").await.unwrap();
        let err = persist(&relay, 2, "dup").await.unwrap_err();
        assert!(matches!(
            err,
            GenerateError::Persistence(StorageError::Conflict(_))
        ));
        assert_eq!(relay.store().len(), 1);
        assert_eq!(relay.messages().len(), 1);
    }

    #[tokio::test]
    async fn same_code_in_other_table_is_allowed() {
        let store = InMemoryStore::new();
        let mut tx = MemoryTx::default();
        store.insert(&mut tx, &dst("t_0"), &record(1, "same")).await.unwrap();
        store.insert(&mut tx, &dst("t_1"), &record(2, "same")).await.unwrap();
        assert_eq!(tx.staged().len(), 2);
    }

    #[tokio::test]
    async fn replayed_dedup_key_keeps_one_message() {
        let relay = relay();
        for code in ["one", "two"] {
            let store = Arc::clone(relay.store());
            let record = record(if code == "one" { 1 } else { 2 }, code);
            relay
                .execute_transactional(
                    move |tx| {
                        Box::pin(async move {
                            store.insert(tx, &dst("t_0"), &record).await?;
                            OutboxMessage::for_record("biz", "topic", &record)
                        })
                    },
                    "same-key",
                )
                .await
                .unwrap();
        }
        assert_eq!(relay.messages().len(), 1);
    }

    #[tokio::test]
    async fn mark_sent_drains_pending() {
        let relay = relay();
        persist(&relay, 1, "aaa").await.unwrap();
        persist(&relay, 2, "bbb").await.unwrap();

        assert!(relay.mark_sent("gen-1"));
        assert!(!relay.mark_sent("gen-1"));
        let pending = relay.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message_id, "gen-2");
    }
}
