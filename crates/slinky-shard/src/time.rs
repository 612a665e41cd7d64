use crate::DEFAULT_TABLE_PREFIX;
use jiff::Timestamp;
use slinky_core::{ShardDestination, ShardError, ShardRouter};
use typed_builder::TypedBuilder;

/// Length of a routing "month".
const MONTH_SECONDS: i64 = 30 * 24 * 60 * 60;

/// A partition responsible for `tables` consecutive months starting at
/// `start_month` months after the router's base time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeShard<P> {
    pub partition: P,
    pub tables: u32,
    pub start_month: i64,
}

impl<P> TimeShard<P> {
    pub fn new(partition: P, tables: u32, start_month: i64) -> Self {
        Self {
            partition,
            tables,
            start_month,
        }
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct TimeRouterConfig<P> {
    /// The zero point month offsets are measured from.
    pub base_time: Timestamp,
    pub shards: Vec<TimeShard<P>>,
    #[builder(default = DEFAULT_TABLE_PREFIX.to_string(), setter(into))]
    pub table_prefix: String,
}

/// Routes a timestamp by its month offset from the base time.
///
/// A shard matches when its offset lies strictly inside
/// `(start_month, start_month + tables)`; offsets equal to either bound match
/// nothing. The table name embeds the key's UTC calendar date.
#[derive(Debug, Clone)]
pub struct TimeRouter<P> {
    base_time: Timestamp,
    shards: Vec<TimeShard<P>>,
    table_prefix: String,
}

impl<P> TimeRouter<P> {
    pub fn new(config: TimeRouterConfig<P>) -> Result<Self, ShardError> {
        if config.shards.is_empty() {
            return Err(ShardError::InvalidConfig(
                "at least one shard is required".to_string(),
            ));
        }

        Ok(Self {
            base_time: config.base_time,
            shards: config.shards,
            table_prefix: config.table_prefix,
        })
    }

    pub fn base_time(&self) -> Timestamp {
        self.base_time
    }

    /// Whole 30-day periods between the base time and `key`, rounded down.
    pub fn month_offset(&self, key: Timestamp) -> i64 {
        let elapsed = key.as_second() - self.base_time.as_second();
        elapsed.div_euclid(MONTH_SECONDS)
    }
}

impl<P: Clone + Send + Sync + 'static> ShardRouter for TimeRouter<P> {
    type Key = Timestamp;
    type Partition = P;

    fn route(&self, key: &Timestamp) -> Result<ShardDestination<P>, ShardError> {
        let months = self.month_offset(*key);

        self.shards
            .iter()
            .find(|shard| {
                let start = shard.start_month;
                let end = start + i64::from(shard.tables);
                months > start && months < end
            })
            .map(|shard| ShardDestination {
                partition: shard.partition.clone(),
                table: format!("{}{}", self.table_prefix, key.strftime("%Y%m%d")),
            })
            .ok_or_else(|| ShardError::ShardingFailed {
                key: key.to_string(),
            })
    }
}
