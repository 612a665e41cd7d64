use crate::{Error, Obfuscator};
use slinky_core::{Clock, CodePool, ShortCode};
use slinky_idgen::Tinyflake;
use std::sync::Arc;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, TypedBuilder)]
pub struct PregenConfig {
    /// Candidates minted per round.
    #[builder(default = 1000)]
    pub batch_size: usize,
    /// Consecutive rounds that add nothing before `replenish` gives up.
    #[builder(default = 3)]
    pub max_idle_rounds: u32,
}

impl Default for PregenConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Mints obfuscated tinyflake codes and stores them in a pool.
///
/// Candidates that the pool's filter may already know are dropped before
/// insertion, so the pool only ever receives codes that were never handed out.
pub struct Pregenerator<P, C: Clock> {
    pool: P,
    flake: Arc<Tinyflake<C>>,
    obfuscator: Obfuscator,
    config: PregenConfig,
}

impl<P: CodePool, C: Clock> Pregenerator<P, C> {
    pub fn new(pool: P, flake: Tinyflake<C>, obfuscator: Obfuscator, config: PregenConfig) -> Self {
        Self {
            pool,
            flake: Arc::new(flake),
            obfuscator,
            config,
        }
    }

    /// Mints `n` candidate codes.
    ///
    /// Runs on a blocking thread: the generator sleeps whenever a second's
    /// sequence space is used up.
    pub async fn candidates(&self, n: usize) -> Result<Vec<ShortCode>, Error> {
        let flake = Arc::clone(&self.flake);
        let obfuscator = self.obfuscator.clone();

        tokio::task::spawn_blocking(move || {
            (0..n)
                .map(|_| flake.next_id().map(|id| obfuscator.code_for(id)))
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(|e| Error::Worker(e.to_string()))?
        .map_err(Error::from)
    }

    /// Mints up to `n` codes and inserts the ones the filter has never seen.
    ///
    /// Returns how many codes were inserted.
    pub async fn fill(&self, n: usize) -> Result<usize, Error> {
        if n == 0 {
            return Ok(0);
        }

        let candidates = self.candidates(n).await?;
        let seen = self.pool.exists_batch(&candidates).await?;
        let fresh: Vec<ShortCode> = candidates
            .into_iter()
            .filter(|code| !seen.get(code).copied().unwrap_or(true))
            .collect();

        if fresh.len() < n {
            debug!(
                minted = n,
                dropped = n - fresh.len(),
                "Dropped candidates the filter may already know"
            );
        }

        self.pool.insert_batch(&fresh).await?;
        Ok(fresh.len())
    }

    /// Tops the pool up until its count reaches `target`.
    ///
    /// Returns how many codes were inserted.
    pub async fn replenish(&self, target: i64) -> Result<usize, Error> {
        let mut added = 0;
        let mut idle_rounds = 0;

        loop {
            let count = self.pool.count().await?;
            if count >= target {
                break;
            }

            let missing = usize::try_from(target - count).unwrap_or(usize::MAX);
            let inserted = self.fill(missing.min(self.config.batch_size)).await?;
            added += inserted;

            if inserted == 0 {
                idle_rounds += 1;
                if idle_rounds >= self.config.max_idle_rounds {
                    warn!(count, target, idle_rounds, "Pool replenishment stalled");
                    break;
                }
            } else {
                idle_rounds = 0;
            }
        }

        info!(added, target, "Replenished code pool");
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::Timestamp;
    use slinky_core::ManualClock;
    use slinky_idgen::TinyflakeSettings;
    use slinky_pool::{BloomConfig, InMemoryCodePool};

    fn pregenerator(batch_size: usize) -> Pregenerator<Arc<InMemoryCodePool>, ManualClock> {
        let epoch = Timestamp::from_second(0).unwrap();
        let settings = TinyflakeSettings::builder()
            .node_id(1)
            .start_epoch(epoch)
            .build();
        let clock = ManualClock::new(Timestamp::from_second(10_000).unwrap());
        let pool = Arc::new(InMemoryCodePool::new(BloomConfig::default()).unwrap());
        Pregenerator::new(
            pool,
            Tinyflake::with_clock(settings, clock).unwrap(),
            Obfuscator::default(),
            PregenConfig::builder().batch_size(batch_size).build(),
        )
    }

    #[tokio::test]
    async fn replenish_reaches_target() {
        let pregen = pregenerator(100);
        let added = pregen.replenish(750).await.unwrap();
        assert_eq!(added, 750);
        assert_eq!(pregen.pool.count().await.unwrap(), 750);
    }

    #[tokio::test]
    async fn replenish_is_noop_when_full() {
        let pregen = pregenerator(100);
        pregen.replenish(50).await.unwrap();
        assert_eq!(pregen.replenish(50).await.unwrap(), 0);
        assert_eq!(pregen.replenish(10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn known_codes_are_not_reinserted() {
        let pregen = pregenerator(100);
        let candidates = pregen.candidates(5).await.unwrap();
        pregen.pool.insert_batch(&candidates).await.unwrap();
        for code in &candidates {
            assert!(pregen.pool.exists(code).await.unwrap());
        }

        let inserted = pregen.fill(20).await.unwrap();
        assert!(inserted <= 20);
        assert_eq!(pregen.pool.count().await.unwrap(), 5 + inserted as i64);
    }

    #[tokio::test]
    async fn minted_codes_are_unique_and_valid() {
        let pregen = pregenerator(100);
        let codes = pregen.candidates(600).await.unwrap();
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), 600);
        assert!(codes.iter().all(|c| ShortCode::new(c.as_str()).is_ok()));
    }
}
