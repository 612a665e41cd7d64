use async_trait::async_trait;
use redis::AsyncCommands;
use slinky_core::pool::Result;
use slinky_core::{CacheError, CodePool, ShortCode};
use std::collections::HashMap;
use tracing::{debug, trace, warn};
use typed_builder::TypedBuilder;

/// Keys shared by every instance serving the same pool.
#[derive(Debug, Clone, TypedBuilder)]
pub struct RedisPoolKeys {
    /// Set holding the reserved codes.
    #[builder(default = "slinky:pool:codes".to_string(), setter(into))]
    pub pool: String,
    /// Counter kept in step with the set by the scripts.
    #[builder(default = "slinky:pool:count".to_string(), setter(into))]
    pub count: String,
    /// Bloom filter of every code ever registered.
    #[builder(default = "slinky:pool:bloom".to_string(), setter(into))]
    pub filter: String,
}

impl Default for RedisPoolKeys {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A code pool stored in Redis.
///
/// Every multi-key mutation runs as a server-side Lua script so pool, count
/// and filter can never be observed out of step. Membership uses the server's
/// native Bloom filter commands.
#[derive(Debug, Clone)]
pub struct RedisCodePool {
    conn: redis::aio::MultiplexedConnection,
    keys: RedisPoolKeys,
    get_one: redis::Script,
    insert_one: redis::Script,
    insert_batch: redis::Script,
}

fn map_redis_error(operation: &str, err: redis::RedisError) -> CacheError {
    let message = format!("{operation}: {err}");
    if err.is_timeout() || message.to_ascii_lowercase().contains("timed out") {
        CacheError::Timeout(message)
    } else if err.is_connection_dropped() || err.is_connection_refusal() {
        CacheError::Unavailable(message)
    } else {
        CacheError::Operation(message)
    }
}

impl RedisCodePool {
    pub fn new(conn: redis::aio::MultiplexedConnection) -> Self {
        Self::with_keys(conn, RedisPoolKeys::default())
    }

    pub fn with_keys(conn: redis::aio::MultiplexedConnection, keys: RedisPoolKeys) -> Self {
        Self {
            conn,
            keys,
            get_one: redis::Script::new(include_str!("../scripts/get_one.lua")),
            insert_one: redis::Script::new(include_str!("../scripts/insert_one.lua")),
            insert_batch: redis::Script::new(include_str!("../scripts/insert_batch.lua")),
        }
    }

    pub fn keys(&self) -> &RedisPoolKeys {
        &self.keys
    }

    /// Creates the Bloom filter with an explicit capacity and error rate.
    ///
    /// Without this the first insert creates a filter with the server's
    /// defaults. Reserving an existing filter is not an error.
    pub async fn reserve_filter(&self, false_positive_rate: f64, capacity: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let reserved: redis::RedisResult<()> = redis::cmd("BF.RESERVE")
            .arg(&self.keys.filter)
            .arg(false_positive_rate)
            .arg(capacity)
            .query_async(&mut conn)
            .await;

        match reserved {
            Ok(()) => {
                debug!(key = %self.keys.filter, capacity, false_positive_rate, "Reserved Bloom filter");
                Ok(())
            }
            Err(e) if e.to_string().contains("item exists") => {
                trace!(key = %self.keys.filter, "Bloom filter already reserved");
                Ok(())
            }
            Err(e) => {
                warn!(key = %self.keys.filter, error = %e, "Failed to reserve Bloom filter");
                Err(map_redis_error("failed to reserve Bloom filter", e))
            }
        }
    }
}

#[async_trait]
impl CodePool for RedisCodePool {
    async fn count(&self) -> Result<i64> {
        let mut conn = self.conn.clone();
        match conn.get::<_, Option<i64>>(&self.keys.count).await {
            Ok(count) => Ok(count.unwrap_or(0)),
            Err(e) => {
                warn!(error = %e, "Failed to read pool count");
                Err(map_redis_error("failed to read pool count", e))
            }
        }
    }

    async fn get_one(&self) -> Result<ShortCode> {
        let mut conn = self.conn.clone();
        let popped: Option<String> = self
            .get_one
            .key(&self.keys.pool)
            .key(&self.keys.count)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to reserve code from pool");
                map_redis_error("failed to reserve code from pool", e)
            })?;

        match popped {
            Some(code) => {
                trace!(code = %code, "Reserved code from pool");
                Ok(ShortCode::new_unchecked(code))
            }
            None => {
                debug!("Code pool is empty");
                Err(CacheError::NotFound("short code pool is empty".to_string()))
            }
        }
    }

    async fn insert_one(&self, code: &ShortCode) -> Result<()> {
        let mut conn = self.conn.clone();
        let added: i64 = self
            .insert_one
            .key(&self.keys.pool)
            .key(&self.keys.count)
            .key(&self.keys.filter)
            .arg(code.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(code = %code, error = %e, "Failed to insert code into pool");
                map_redis_error("failed to insert code into pool", e)
            })?;

        trace!(code = %code, added, "Inserted code into pool");
        Ok(())
    }

    async fn insert_batch(&self, codes: &[ShortCode]) -> Result<()> {
        if codes.is_empty() {
            return Ok(());
        }

        let mut invocation = self.insert_batch.key(&self.keys.pool);
        invocation.key(&self.keys.count).key(&self.keys.filter);
        for code in codes {
            invocation.arg(code.as_str());
        }

        let mut conn = self.conn.clone();
        let added: i64 = invocation.invoke_async(&mut conn).await.map_err(|e| {
            warn!(requested = codes.len(), error = %e, "Failed to insert code batch into pool");
            map_redis_error("failed to insert code batch into pool", e)
        })?;

        debug!(requested = codes.len(), added, "Inserted code batch into pool");
        Ok(())
    }

    async fn mark_used(&self, code: &ShortCode) -> Result<()> {
        let mut conn = self.conn.clone();
        let added: i64 = redis::cmd("BF.ADD")
            .arg(&self.keys.filter)
            .arg(code.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(code = %code, error = %e, "Failed to register code in Bloom filter");
                map_redis_error("failed to register code in Bloom filter", e)
            })?;

        trace!(code = %code, added, "Registered code in Bloom filter");
        Ok(())
    }

    async fn exists(&self, code: &ShortCode) -> Result<bool> {
        let mut conn = self.conn.clone();
        let found: i64 = redis::cmd("BF.EXISTS")
            .arg(&self.keys.filter)
            .arg(code.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(code = %code, error = %e, "Bloom filter lookup failed");
                map_redis_error("failed to query Bloom filter", e)
            })?;

        trace!(code = %code, found, "Checked Bloom filter");
        Ok(found == 1)
    }

    async fn exists_batch(&self, codes: &[ShortCode]) -> Result<HashMap<ShortCode, bool>> {
        if codes.is_empty() {
            return Ok(HashMap::new());
        }

        let mut cmd = redis::cmd("BF.MEXISTS");
        cmd.arg(&self.keys.filter);
        for code in codes {
            cmd.arg(code.as_str());
        }

        let mut conn = self.conn.clone();
        let found: Vec<i64> = cmd.query_async(&mut conn).await.map_err(|e| {
            warn!(requested = codes.len(), error = %e, "Bloom filter batch lookup failed");
            map_redis_error("failed to query Bloom filter", e)
        })?;

        if found.len() != codes.len() {
            return Err(CacheError::InvalidData(format!(
                "expected {} membership flags, got {}",
                codes.len(),
                found.len()
            )));
        }

        Ok(codes
            .iter()
            .cloned()
            .zip(found.into_iter().map(|flag| flag == 1))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_keys_share_a_namespace() {
        let keys = RedisPoolKeys::default();
        assert_eq!(keys.pool, "slinky:pool:codes");
        assert_eq!(keys.count, "slinky:pool:count");
        assert_eq!(keys.filter, "slinky:pool:bloom");
    }

    #[test]
    fn scripts_touch_filter_before_pool() {
        let script = include_str!("../scripts/insert_one.lua");
        let filter = script.find("BF.ADD").unwrap();
        let pool = script.find("SADD").unwrap();
        assert!(filter < pool);
    }
}
