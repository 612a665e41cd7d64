use crate::error::ShardError;
use crate::model::PersistedRecord;
use jiff::Timestamp;

/// Where a record lives: a partition handle and a table inside it.
///
/// Always recomputed from the key; never cached across keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDestination<P> {
    pub partition: P,
    pub table: String,
}

/// A sharding key that can be read off a record.
pub trait ShardKey: Send + Sync + std::fmt::Debug + 'static {
    fn of(record: &PersistedRecord) -> Self;
}

/// Hash routing keys on a digest of the short code.
impl ShardKey for i64 {
    fn of(record: &PersistedRecord) -> Self {
        record.short_code.shard_key()
    }
}

/// Time routing keys on the creation time.
impl ShardKey for Timestamp {
    fn of(record: &PersistedRecord) -> Self {
        record.created_at
    }
}

/// Maps a sharding key to a destination.
///
/// Implementations are pure functions of an immutable configuration and are
/// safe to call concurrently without synchronization.
pub trait ShardRouter: Send + Sync + 'static {
    type Key: ShardKey;
    type Partition: Clone + Send + Sync + 'static;

    fn route(&self, key: &Self::Key) -> Result<ShardDestination<Self::Partition>, ShardError>;
}

impl<T: ShardRouter + ?Sized> ShardRouter for std::sync::Arc<T> {
    type Key = T::Key;
    type Partition = T::Partition;

    fn route(&self, key: &Self::Key) -> Result<ShardDestination<Self::Partition>, ShardError> {
        (**self).route(key)
    }
}
