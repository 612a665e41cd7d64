use async_trait::async_trait;
use jiff::Timestamp;
use slinky_core::{
    GenerateError, MessageStatus, OutboxMessage, PersistedRecord, Relay, ShardDestination,
    ShortCode, StorageError, Store, UnitFuture,
};
use sqlx::mysql::{MySqlPoolOptions, MySqlRow};
use sqlx::{MySql, MySqlConnection, MySqlPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub type Result<T> = std::result::Result<T, StorageError>;

const RECORD_TABLE_DDL: &str = include_str!("../ddl/mysql/short_urls.sql");
const OUTBOX_TABLE_DDL: &str = include_str!("../ddl/mysql/outbox_messages.sql");
const MAX_TABLE_NAME_LEN: usize = 64;

type Partitions = Arc<HashMap<String, MySqlPool>>;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

/// Table names come from the router, never from callers, but they are still
/// spliced into SQL text and must be plain identifiers.
fn quoted_table(table: &str) -> Result<String> {
    let valid = !table.is_empty()
        && table.len() <= MAX_TABLE_NAME_LEN
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StorageError::InvalidData(format!(
            "invalid table name '{table}'"
        )));
    }
    Ok(format!("`{table}`"))
}

fn parse_timestamp(column: &str, seconds: i64) -> Result<Timestamp> {
    Timestamp::from_second(seconds).map_err(|e| {
        StorageError::InvalidData(format!("invalid {column} timestamp '{seconds}': {e}"))
    })
}

fn parse_status(status: &str) -> Result<MessageStatus> {
    match status {
        "not_sent" => Ok(MessageStatus::NotSent),
        "sent" => Ok(MessageStatus::Sent),
        other => Err(StorageError::InvalidData(format!(
            "unknown outbox status '{other}'"
        ))),
    }
}

fn record_from_row(row: &MySqlRow) -> Result<PersistedRecord> {
    let short_code: String = row.try_get("short_code").map_err(map_sqlx_error)?;
    Ok(PersistedRecord {
        id: row.try_get("id").map_err(map_sqlx_error)?,
        original_url: row.try_get("original_url").map_err(map_sqlx_error)?,
        short_code: ShortCode::new_unchecked(short_code),
        expire_at: parse_timestamp(
            "expire_at",
            row.try_get("expire_at").map_err(map_sqlx_error)?,
        )?,
        comment: row.try_get("comment").map_err(map_sqlx_error)?,
        creator_id: row.try_get("creator_id").map_err(map_sqlx_error)?,
        created_at: parse_timestamp(
            "created_at",
            row.try_get("created_at").map_err(map_sqlx_error)?,
        )?,
        updated_at: parse_timestamp(
            "updated_at",
            row.try_get("updated_at").map_err(map_sqlx_error)?,
        )?,
    })
}

fn message_from_row(row: &MySqlRow) -> Result<OutboxMessage> {
    let status: String = row.try_get("status").map_err(map_sqlx_error)?;
    Ok(OutboxMessage {
        biz_id: row.try_get("biz_id").map_err(map_sqlx_error)?,
        message_id: row.try_get("message_id").map_err(map_sqlx_error)?,
        topic: row.try_get("topic").map_err(map_sqlx_error)?,
        payload: row.try_get("payload").map_err(map_sqlx_error)?,
        status: parse_status(&status)?,
    })
}

struct ActiveTx {
    partition: String,
    tx: sqlx::Transaction<'static, MySql>,
}

/// A transaction bound to at most one partition.
///
/// Nothing is opened until the first write names a partition; every later
/// write must target the same one.
pub struct MySqlTx {
    pools: Partitions,
    active: Option<ActiveTx>,
}

impl std::fmt::Debug for MySqlTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlTx")
            .field("partition", &self.partition())
            .finish()
    }
}

impl MySqlTx {
    fn new(pools: Partitions) -> Self {
        Self {
            pools,
            active: None,
        }
    }

    /// The partition this transaction is bound to, if any write happened yet.
    pub fn partition(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.partition.as_str())
    }

    /// The connection for `partition`, opening the transaction on first use.
    pub async fn connection(&mut self, partition: &str) -> Result<&mut MySqlConnection> {
        if self.active.is_none() {
            let pool = self.pools.get(partition).ok_or_else(|| {
                StorageError::InvalidData(format!("unknown partition '{partition}'"))
            })?;
            let tx = pool.begin().await.map_err(map_sqlx_error)?;
            trace!(partition, "Opened transaction");
            self.active = Some(ActiveTx {
                partition: partition.to_owned(),
                tx,
            });
        }

        match self.active.as_mut() {
            Some(active) if active.partition == partition => Ok(&mut *active.tx),
            Some(active) => Err(StorageError::CrossPartition(format!(
                "transaction on '{}' cannot write to '{partition}'",
                active.partition
            ))),
            None => Err(StorageError::Operation(
                "transaction was not opened".to_string(),
            )),
        }
    }

    async fn commit(self) -> Result<()> {
        match self.active {
            Some(active) => active.tx.commit().await.map_err(map_sqlx_error),
            None => Ok(()),
        }
    }

    async fn rollback(self) -> Result<()> {
        match self.active {
            Some(active) => active.tx.rollback().await.map_err(map_sqlx_error),
            None => Ok(()),
        }
    }
}

/// MySQL implementation of [`Store`].
///
/// Each partition is its own database reached through its own pool; the
/// partition name in a [`ShardDestination`] selects the pool.
#[derive(Debug, Clone)]
pub struct MySqlStore {
    pools: Partitions,
}

impl MySqlStore {
    pub fn new(pools: HashMap<String, MySqlPool>) -> Self {
        Self {
            pools: Arc::new(pools),
        }
    }

    /// Opens one pool per `(partition, database_url)` pair.
    pub async fn connect<I, K, V>(partitions: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut pools = HashMap::new();
        for (partition, url) in partitions {
            let pool = MySqlPoolOptions::new()
                .connect(url.as_ref())
                .await
                .map_err(map_sqlx_error)?;
            pools.insert(partition.into(), pool);
        }
        Ok(Self::new(pools))
    }

    pub fn pool(&self, partition: &str) -> Option<&MySqlPool> {
        self.pools.get(partition)
    }

    pub fn partitions(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    fn require_pool(&self, partition: &str) -> Result<&MySqlPool> {
        self.pool(partition)
            .ok_or_else(|| StorageError::InvalidData(format!("unknown partition '{partition}'")))
    }

    /// Creates a record table in `partition` if it does not exist yet.
    pub async fn create_table(&self, partition: &str, table: &str) -> Result<()> {
        let pool = self.require_pool(partition)?;
        quoted_table(table)?;
        let ddl = RECORD_TABLE_DDL.replace("{table}", table);
        sqlx::query(&ddl)
            .execute(pool)
            .await
            .map_err(map_sqlx_error)?;
        debug!(partition, table, "Ensured record table");
        Ok(())
    }

    /// Creates the outbox table in `partition` if it does not exist yet.
    pub async fn create_outbox(&self, partition: &str) -> Result<()> {
        let pool = self.require_pool(partition)?;
        sqlx::query(OUTBOX_TABLE_DDL)
            .execute(pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl Store<MySqlTx, String> for MySqlStore {
    async fn insert(
        &self,
        tx: &mut MySqlTx,
        dst: &ShardDestination<String>,
        record: &PersistedRecord,
    ) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {} (id, short_code, original_url, comment, creator_id, expire_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            quoted_table(&dst.table)?
        );

        let conn = tx.connection(&dst.partition).await?;
        let result = sqlx::query(&sql)
            .bind(record.id)
            .bind(record.short_code.as_str())
            .bind(&record.original_url)
            .bind(&record.comment)
            .bind(record.creator_id)
            .bind(record.expire_at.as_second())
            .bind(record.created_at.as_second())
            .bind(record.updated_at.as_second())
            .execute(&mut *conn)
            .await;

        match result {
            Ok(_) => {
                trace!(code = %record.short_code, id = record.id, table = %dst.table, "Inserted record");
                Ok(())
            }
            Err(err) if is_unique_violation(&err) => {
                debug!(code = %record.short_code, table = %dst.table, "Short code already persisted");
                Err(StorageError::Conflict(record.short_code.to_string()))
            }
            Err(err) => Err(map_sqlx_error(err)),
        }
    }

    async fn find_by_code(
        &self,
        dst: &ShardDestination<String>,
        code: &ShortCode,
    ) -> Result<Option<PersistedRecord>> {
        let pool = self.require_pool(&dst.partition)?;
        let sql = format!(
            r#"
            SELECT id, short_code, original_url, comment, creator_id, expire_at, created_at, updated_at
            FROM {}
            WHERE short_code = ?
            LIMIT 1
            "#,
            quoted_table(&dst.table)?
        );

        let row = sqlx::query(&sql)
            .bind(code.as_str())
            .fetch_optional(pool)
            .await
            .map_err(map_sqlx_error)?;

        row.as_ref().map(record_from_row).transpose()
    }
}

/// Local outbox for [`MySqlStore`].
///
/// The outbox row lives in the same database as the record it announces and
/// is written in the same transaction. Units that write nothing put their
/// message in the fallback partition.
#[derive(Debug, Clone)]
pub struct MySqlRelay {
    pools: Partitions,
    fallback_partition: String,
}

impl MySqlRelay {
    pub fn new(store: &MySqlStore, fallback_partition: impl Into<String>) -> Self {
        Self {
            pools: Arc::clone(&store.pools),
            fallback_partition: fallback_partition.into(),
        }
    }

    fn require_pool(&self, partition: &str) -> Result<&MySqlPool> {
        self.pools
            .get(partition)
            .ok_or_else(|| StorageError::InvalidData(format!("unknown partition '{partition}'")))
    }

    /// Oldest undelivered messages in `partition`.
    pub async fn pending(&self, partition: &str, limit: u32) -> Result<Vec<OutboxMessage>> {
        let pool = self.require_pool(partition)?;
        let rows = sqlx::query(
            r#"
            SELECT biz_id, message_id, topic, payload, status
            FROM outbox_messages
            WHERE status = ?
            ORDER BY created_at, message_id
            LIMIT ?
            "#,
        )
        .bind(MessageStatus::NotSent.as_str())
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(message_from_row).collect()
    }

    /// Marks a delivered message; returns whether a pending row matched.
    pub async fn mark_sent(&self, partition: &str, message_id: &str) -> Result<bool> {
        let pool = self.require_pool(partition)?;
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = ?
            WHERE message_id = ?
              AND status = ?
            "#,
        )
        .bind(MessageStatus::Sent.as_str())
        .bind(message_id)
        .bind(MessageStatus::NotSent.as_str())
        .execute(pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }
}

async fn enqueue(
    conn: &mut MySqlConnection,
    dedup_key: &str,
    message: &OutboxMessage,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT IGNORE INTO outbox_messages (dedup_key, biz_id, message_id, topic, payload, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(dedup_key)
    .bind(&message.biz_id)
    .bind(&message.message_id)
    .bind(&message.topic)
    .bind(&message.payload)
    .bind(message.status.as_str())
    .bind(Timestamp::now().as_second())
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

#[async_trait]
impl Relay for MySqlRelay {
    type Tx = MySqlTx;

    async fn execute_transactional<U>(
        &self,
        unit: U,
        dedup_key: &str,
    ) -> std::result::Result<(), GenerateError>
    where
        U: for<'t> FnOnce(&'t mut Self::Tx) -> UnitFuture<'t> + Send + 'static,
    {
        let mut tx = MySqlTx::new(Arc::clone(&self.pools));

        let message = match unit(&mut tx).await {
            Ok(message) => message,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(dedup_key, error = %rollback, "Rollback failed");
                }
                return Err(e);
            }
        };

        let partition = tx
            .partition()
            .unwrap_or(&self.fallback_partition)
            .to_owned();
        let conn = tx
            .connection(&partition)
            .await
            .map_err(GenerateError::Persistence)?;
        let enqueued = enqueue(conn, dedup_key, &message).await;
        if let Err(e) = enqueued {
            warn!(dedup_key, error = %e, "Failed to enqueue outbox message");
            if let Err(rollback) = tx.rollback().await {
                warn!(dedup_key, error = %rollback, "Rollback failed");
            }
            return Err(GenerateError::Relay(e.to_string()));
        }

        tx.commit().await.map_err(GenerateError::Persistence)?;
        debug!(dedup_key, partition = %partition, "Committed record with outbox message");
        Ok(())
    }
}
