mod cli;

use crate::cli::{
    Command, GenerateArgs, LogFormatArg, PartitionDsn, PoolBackendArg, StorageBackendArg, CLI,
};
use anyhow::Context as _;
use clap::Parser;
use slinky_core::{CodePool, Context, GenerationRequest, IdSource, Relay, UrlHasher};
use slinky_generator::{DigestHasher, Obfuscator, PregenConfig, Pregenerator};
use slinky_idgen::{spawn_tinyflake_stream, Tinyflake, TinyflakeSettings};
use slinky_pool::{BloomConfig, InMemoryCodePool, RedisCodePool};
use slinky_shard::{HashRouter, HashRouterConfig, HashShard, DEFAULT_TABLE_PREFIX};
use slinky_shortener::{failures, BatchConfig, BatchItemOutcome, Shortener};
use slinky_storage::{InMemoryRelay, InMemoryStore, MySqlRelay, MySqlStore};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const ID_BUFFER: usize = 1024;
const MEMORY_PARTITION: &str = "memory";
const FILTER_FALSE_POSITIVE_RATE: f64 = 0.01;
const FILTER_CAPACITY: u64 = 1_000_000;

type Router = HashRouter<String>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::parse();
    init_tracing(config.log_format);

    info!(
        pool_backend = %config.pool,
        storage_backend = %config.storage,
        node_id = config.node_id,
        "starting slinky shortener"
    );

    let settings = TinyflakeSettings::builder()
        .node_id(config.node_id)
        .start_epoch(config.epoch)
        .build();

    let pool = connect_pool(&config).await?;
    Pregenerator::new(
        Arc::clone(&pool),
        Tinyflake::new(settings)?,
        Obfuscator::default(),
        PregenConfig::default(),
    )
    .replenish(config.pool_target)
    .await?;

    let (ids, producer) = spawn_tinyflake_stream(settings, ID_BUFFER)?;
    let ids: Arc<dyn IdSource> = Arc::new(ids);
    let hasher: Arc<dyn UrlHasher> = Arc::new(DigestHasher::default());

    let (ctx, cancel) = Context::with_cancel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let Command::Generate(args) = &config.command;
    let outcomes = match config.storage {
        StorageBackendArg::InMemory => {
            let router = hash_router([MEMORY_PARTITION.to_string()], config.tables_per_partition)?;
            let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
            let relay = Arc::new(InMemoryRelay::new(Arc::clone(&store)));
            let shortener = Shortener::<InMemoryRelay, Router>::builder()
                .id_source(ids)
                .hasher(hasher)
                .pool(pool)
                .store(store)
                .relay(relay)
                .router(Arc::new(router))
                .batch(BatchConfig::builder().max_workers(args.workers).build())
                .build();
            generate(&ctx, &shortener, args).await
        }
        StorageBackendArg::Mysql => {
            let (store, relay) = connect_mysql(&config.mysql_dsn, config.tables_per_partition)
                .await
                .context("failed to prepare mysql storage")?;
            let partitions = config.mysql_dsn.iter().map(|dsn| dsn.name.clone());
            let router = hash_router(partitions, config.tables_per_partition)?;
            let shortener = Shortener::<MySqlRelay, Router>::builder()
                .id_source(ids)
                .hasher(hasher)
                .pool(pool)
                .store(Arc::new(store))
                .relay(Arc::new(relay))
                .router(Arc::new(router))
                .batch(BatchConfig::builder().max_workers(args.workers).build())
                .build();
            generate(&ctx, &shortener, args).await
        }
    };
    producer.abort();

    for outcome in &outcomes {
        match &outcome.result {
            Ok(result) => println!(
                "{}\t{}\t{}",
                result.original_url, result.short_code, result.expire_at
            ),
            Err(e) => println!("{}\terror: {e}", outcome.original_url),
        }
    }

    let failed = failures(&outcomes);
    if failed > 0 {
        anyhow::bail!("{failed} of {} URLs failed", outcomes.len());
    }
    Ok(())
}

fn init_tracing(format: LogFormatArg) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormatArg::Text => builder.init(),
        LogFormatArg::Json => builder.json().init(),
    }
}

async fn connect_pool(config: &CLI) -> anyhow::Result<Arc<dyn CodePool>> {
    match config.pool {
        PoolBackendArg::InMemory => Ok(Arc::new(InMemoryCodePool::new(BloomConfig::default())?)),
        PoolBackendArg::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .context("redis url is required when pool backend is redis")?;
            let conn = redis::Client::open(url)?
                .get_multiplexed_async_connection()
                .await?;
            let pool = RedisCodePool::new(conn);
            pool.reserve_filter(FILTER_FALSE_POSITIVE_RATE, FILTER_CAPACITY)
                .await?;
            Ok(Arc::new(pool))
        }
    }
}

async fn connect_mysql(
    dsns: &[PartitionDsn],
    tables_per_partition: u32,
) -> anyhow::Result<(MySqlStore, MySqlRelay)> {
    let fallback = dsns
        .first()
        .map(|dsn| dsn.name.clone())
        .context("at least one mysql dsn is required")?;
    let store = MySqlStore::connect(dsns.iter().map(|dsn| (dsn.name.clone(), dsn.url.as_str())))
        .await?;

    for dsn in dsns {
        store.create_outbox(&dsn.name).await?;
        for index in 0..tables_per_partition {
            store
                .create_table(&dsn.name, &format!("{DEFAULT_TABLE_PREFIX}{index}"))
                .await?;
        }
    }

    let relay = MySqlRelay::new(&store, fallback);
    Ok((store, relay))
}

fn hash_router<I>(partitions: I, tables_per_partition: u32) -> anyhow::Result<Router>
where
    I: IntoIterator<Item = String>,
{
    let shards: Vec<_> = partitions
        .into_iter()
        .map(|partition| HashShard::new(partition, tables_per_partition))
        .collect();
    let total_tables = u32::try_from(shards.len())
        .ok()
        .and_then(|count| count.checked_mul(tables_per_partition))
        .context("too many tables")?;

    Ok(HashRouter::new(
        HashRouterConfig::builder()
            .shards(shards)
            .total_tables(total_tables)
            .build(),
    )?)
}

async fn generate<R: Relay>(
    ctx: &Context,
    shortener: &Shortener<R, Router>,
    args: &GenerateArgs,
) -> Vec<BatchItemOutcome> {
    let requests = args
        .urls
        .iter()
        .map(|url| {
            GenerationRequest::builder()
                .biz_id(args.biz_id.clone())
                .creator_id(args.creator_id)
                .original_url(url.clone())
                .comment(args.comment.clone())
                .expiration(args.expire)
                .build()
        })
        .collect();
    shortener.generate_batch(ctx, requests).await
}
