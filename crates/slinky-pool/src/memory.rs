//! In-process code pool backed by a Bloom filter.
//!
//! Pool contents, count and filter sit behind one lock, which plays the role
//! the script engine plays for the Redis backend: every mutation is a single
//! indivisible step.

use async_trait::async_trait;
use parking_lot::Mutex;
use slinky_core::pool::Result;
use slinky_core::{CacheError, CodePool, ShortCode};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};
use typed_builder::TypedBuilder;

/// Configuration for the membership filter.
#[derive(Debug, Clone, TypedBuilder)]
pub struct BloomConfig {
    /// Expected number of codes ever registered.
    ///
    /// Setting this too low raises the false positive rate.
    #[builder(default = 1_000_000)]
    pub expected_items: usize,

    /// Desired false positive rate, between 0.0 and 1.0.
    #[builder(default = 0.01)]
    pub false_positive_rate: f64,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

struct PoolState {
    /// Reserved codes; popped from the back.
    codes: Vec<ShortCode>,
    members: HashSet<ShortCode>,
    /// Append-only: entries are never removed, even after a code is handed out.
    filter: bloomfilter::Bloom<ShortCode>,
}

impl PoolState {
    fn push(&mut self, code: &ShortCode) -> bool {
        self.filter.set(code);
        if self.members.insert(code.clone()) {
            self.codes.push(code.clone());
            true
        } else {
            false
        }
    }
}

pub struct InMemoryCodePool {
    state: Mutex<PoolState>,
}

impl std::fmt::Debug for InMemoryCodePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCodePool")
            .field("count", &self.state.lock().codes.len())
            .finish()
    }
}

impl InMemoryCodePool {
    pub fn new(config: BloomConfig) -> Result<Self> {
        let filter =
            bloomfilter::Bloom::new_for_fp_rate(config.expected_items, config.false_positive_rate)
                .map_err(|e| CacheError::Initialization(e.to_string()))?;
        Ok(Self {
            state: Mutex::new(PoolState {
                codes: Vec::new(),
                members: HashSet::new(),
                filter,
            }),
        })
    }
}

#[async_trait]
impl CodePool for InMemoryCodePool {
    async fn count(&self) -> Result<i64> {
        Ok(self.state.lock().codes.len() as i64)
    }

    async fn get_one(&self) -> Result<ShortCode> {
        let mut state = self.state.lock();
        match state.codes.pop() {
            Some(code) => {
                state.members.remove(&code);
                trace!(code = %code, remaining = state.codes.len(), "Reserved code from pool");
                Ok(code)
            }
            None => {
                debug!("Code pool is empty");
                Err(CacheError::NotFound("short code pool is empty".to_string()))
            }
        }
    }

    async fn insert_one(&self, code: &ShortCode) -> Result<()> {
        let mut state = self.state.lock();
        let added = state.push(code);
        trace!(code = %code, added, "Inserted code into pool");
        Ok(())
    }

    async fn insert_batch(&self, codes: &[ShortCode]) -> Result<()> {
        let mut state = self.state.lock();
        let added = codes.iter().filter(|code| state.push(code)).count();
        debug!(requested = codes.len(), added, "Inserted code batch into pool");
        Ok(())
    }

    async fn mark_used(&self, code: &ShortCode) -> Result<()> {
        self.state.lock().filter.set(code);
        trace!(code = %code, "Registered code in filter");
        Ok(())
    }

    async fn exists(&self, code: &ShortCode) -> Result<bool> {
        Ok(self.state.lock().filter.check(code))
    }

    async fn exists_batch(&self, codes: &[ShortCode]) -> Result<HashMap<ShortCode, bool>> {
        let state = self.state.lock();
        Ok(codes
            .iter()
            .map(|code| (code.clone(), state.filter.check(code)))
            .collect())
    }
}
