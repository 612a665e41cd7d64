use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use redis::AsyncCommands;
use slinky_core::{CacheError, CodePool, ShortCode};
use slinky_pool::{RedisCodePool, RedisPoolKeys};
use slinky_test_infra::redis::RedisMaster;

/// Test fixture that manages a Redis container using test-infra.
struct RedisTestContainer {
    #[allow(dead_code)]
    redis: RedisMaster,
    redis_url: String,
}

impl RedisTestContainer {
    async fn start() -> Self {
        let redis = RedisMaster::new()
            .await
            .expect("Failed to start Redis master");
        let host = redis.host().await.expect("Failed to get Redis host");
        let port = redis.port().await.expect("Failed to get Redis port");
        let redis_url = format!("redis://{}:{}", host, port);

        tokio::time::sleep(Duration::from_millis(500)).await;

        Self { redis, redis_url }
    }

    async fn create_connection(&self) -> redis::aio::MultiplexedConnection {
        let client =
            redis::Client::open(self.redis_url.as_str()).expect("Failed to create Redis client");
        client
            .get_multiplexed_async_connection()
            .await
            .expect("Failed to get Redis connection")
    }
}

fn codes(prefix: &str, n: usize) -> Vec<ShortCode> {
    (0..n)
        .map(|i| ShortCode::new(format!("{prefix}{i:05}")).unwrap())
        .collect()
}

#[tokio::test]
async fn test_count_is_zero_before_first_insert() {
    let fixture = RedisTestContainer::start().await;
    let pool = RedisCodePool::new(fixture.create_connection().await);

    assert_eq!(pool.count().await.unwrap(), 0);
    let err = pool.get_one().await.unwrap_err();
    assert!(matches!(err, CacheError::NotFound(_)));
    assert_eq!(pool.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_batch_insert_and_drain_restores_count() {
    let fixture = RedisTestContainer::start().await;
    let pool = RedisCodePool::new(fixture.create_connection().await);

    pool.insert_one(&ShortCode::new("seed01").unwrap())
        .await
        .unwrap();
    let before = pool.count().await.unwrap();

    let batch = codes("bt", 1200);
    pool.insert_batch(&batch).await.unwrap();
    assert_eq!(pool.count().await.unwrap(), before + 1200);

    for _ in 0..1200 {
        pool.get_one().await.unwrap();
    }
    assert_eq!(pool.count().await.unwrap(), before);
}

#[tokio::test]
async fn test_count_matches_set_cardinality() {
    let fixture = RedisTestContainer::start().await;
    let mut conn = fixture.create_connection().await;
    let pool = RedisCodePool::new(conn.clone());

    pool.insert_batch(&codes("cm", 50)).await.unwrap();
    // duplicates must not move the counter
    pool.insert_batch(&codes("cm", 10)).await.unwrap();
    pool.insert_one(&ShortCode::new("cm00003").unwrap())
        .await
        .unwrap();
    pool.get_one().await.unwrap();

    let cardinality: i64 = conn.scard(&pool.keys().pool).await.unwrap();
    assert_eq!(pool.count().await.unwrap(), cardinality);
    assert_eq!(cardinality, 49);
}

#[tokio::test]
async fn test_filter_reports_every_registered_code() {
    let fixture = RedisTestContainer::start().await;
    let pool = RedisCodePool::new(fixture.create_connection().await);
    pool.reserve_filter(0.001, 100_000).await.unwrap();
    // reserving twice is harmless
    pool.reserve_filter(0.001, 100_000).await.unwrap();

    let registered = codes("fl", 300);
    pool.insert_batch(&registered).await.unwrap();

    let seen = pool.exists_batch(&registered).await.unwrap();
    assert!(seen.values().all(|present| *present));

    // reserved codes stay in the filter
    let taken = pool.get_one().await.unwrap();
    assert!(pool.exists(&taken).await.unwrap());

    let unseen = codes("zz", 300);
    let probes = pool.exists_batch(&unseen).await.unwrap();
    let false_positives = probes.values().filter(|present| **present).count();
    assert!(false_positives < 10, "false positives: {false_positives}");
}

#[tokio::test]
async fn test_custom_keys_are_isolated() {
    let fixture = RedisTestContainer::start().await;
    let conn = fixture.create_connection().await;
    let first = RedisCodePool::new(conn.clone());
    let second = RedisCodePool::with_keys(
        conn,
        RedisPoolKeys::builder()
            .pool("other:codes")
            .count("other:count")
            .filter("other:bloom")
            .build(),
    );

    first.insert_batch(&codes("is", 5)).await.unwrap();
    assert_eq!(first.count().await.unwrap(), 5);
    assert_eq!(second.count().await.unwrap(), 0);
    assert!(!second
        .exists(&ShortCode::new("is00001").unwrap())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_concurrent_reservations_are_unique() {
    let fixture = RedisTestContainer::start().await;
    let pool = Arc::new(RedisCodePool::new(fixture.create_connection().await));
    pool.insert_batch(&codes("cc", 200)).await.unwrap();

    let mut handles = vec![];
    for _ in 0..200 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move { pool.get_one().await.unwrap() }));
    }

    let mut taken = HashSet::new();
    for handle in handles {
        assert!(taken.insert(handle.await.unwrap()), "code handed out twice");
    }
    assert_eq!(pool.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_mark_used_registers_without_pooling() {
    let fixture = RedisTestContainer::start().await;
    let pool = RedisCodePool::new(fixture.create_connection().await);
    let code = ShortCode::new_unchecked("hashed01");

    assert!(!pool.exists(&code).await.unwrap());
    pool.mark_used(&code).await.unwrap();

    assert!(pool.exists(&code).await.unwrap());
    assert_eq!(pool.count().await.unwrap(), 0);
    assert!(matches!(
        pool.get_one().await.unwrap_err(),
        CacheError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_rejected_batch_leaves_pool_untouched() {
    let fixture = RedisTestContainer::start().await;
    let pool = RedisCodePool::new(fixture.create_connection().await);
    let mut conn = fixture.create_connection().await;
    let keys = pool.keys().clone();
    let _: () = conn.set(&keys.count, "many").await.unwrap();

    let batch = codes("rj", 700);
    assert!(pool.insert_batch(&batch).await.is_err());

    let pooled: i64 = conn.scard(&keys.pool).await.unwrap();
    assert_eq!(pooled, 0);
    assert!(!pool.exists(&batch[0]).await.unwrap());
    let count: String = conn.get(&keys.count).await.unwrap();
    assert_eq!(count, "many");
}
