use crate::DEFAULT_TABLE_PREFIX;
use slinky_core::{ShardDestination, ShardError, ShardRouter};
use typed_builder::TypedBuilder;

/// One partition and the number of tables it hosts.
///
/// Partitions may carry different table counts so stronger machines can take
/// a larger share of the key space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashShard<P> {
    pub partition: P,
    pub tables: u32,
}

impl<P> HashShard<P> {
    pub fn new(partition: P, tables: u32) -> Self {
        Self { partition, tables }
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct HashRouterConfig<P> {
    /// Partitions in key-space order.
    pub shards: Vec<HashShard<P>>,
    /// The modulus applied to every key.
    pub total_tables: u32,
    #[builder(default = DEFAULT_TABLE_PREFIX.to_string(), setter(into))]
    pub table_prefix: String,
}

/// Routes an integer key to `key mod total_tables`, then to the partition
/// whose cumulative table range covers that position.
///
/// With shards `[(a, 10), (b, 6)]` and 20 total tables, positions `0..10`
/// land on `a` (table index = position), `10..16` on `b` (index = position
/// minus 10), and `16..20` are not covered by any partition.
#[derive(Debug, Clone)]
pub struct HashRouter<P> {
    shards: Vec<HashShard<P>>,
    total_tables: u32,
    table_prefix: String,
}

impl<P> HashRouter<P> {
    pub fn new(config: HashRouterConfig<P>) -> Result<Self, ShardError> {
        if config.total_tables == 0 {
            return Err(ShardError::InvalidConfig(
                "total table count must be positive".to_string(),
            ));
        }
        if config.shards.is_empty() {
            return Err(ShardError::InvalidConfig(
                "at least one shard is required".to_string(),
            ));
        }

        Ok(Self {
            shards: config.shards,
            total_tables: config.total_tables,
            table_prefix: config.table_prefix,
        })
    }

    pub fn total_tables(&self) -> u32 {
        self.total_tables
    }

    pub fn shards(&self) -> &[HashShard<P>] {
        &self.shards
    }
}

impl<P: Clone + Send + Sync + 'static> HashRouter<P> {
    fn locate(&self, key: i64) -> Option<ShardDestination<P>> {
        let position = key.rem_euclid(i64::from(self.total_tables)) as u64;

        let mut start = 0_u64;
        for shard in &self.shards {
            let end = start + u64::from(shard.tables);
            if position < end {
                return Some(ShardDestination {
                    partition: shard.partition.clone(),
                    table: format!("{}{}", self.table_prefix, position - start),
                });
            }
            start = end;
        }

        None
    }
}

impl<P: Clone + Send + Sync + 'static> ShardRouter for HashRouter<P> {
    type Key = i64;
    type Partition = P;

    fn route(&self, key: &i64) -> Result<ShardDestination<P>, ShardError> {
        self.locate(*key).ok_or_else(|| ShardError::ShardingFailed {
            key: key.to_string(),
        })
    }
}
