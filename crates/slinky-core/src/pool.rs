use crate::error::CacheError;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use std::collections::HashMap;

pub type Result<T> = std::result::Result<T, CacheError>;

/// A reserve of pre-generated short codes plus a membership filter.
///
/// Every mutation updates the pool, its count and the filter as one
/// indivisible step, so a code is never handed out without being removed and
/// never added without being registered in the filter.
#[async_trait]
pub trait CodePool: Send + Sync + 'static {
    /// Number of codes currently reserved in the pool.
    async fn count(&self) -> Result<i64>;

    /// Removes and returns one code.
    ///
    /// Returns `CacheError::NotFound` when the pool is empty.
    async fn get_one(&self) -> Result<ShortCode>;

    /// Adds a code to the pool and the membership filter, or neither.
    async fn insert_one(&self, code: &ShortCode) -> Result<()>;

    /// Adds every code to the pool and the membership filter.
    ///
    /// A batch the backend rejects leaves the pool and its count unchanged;
    /// the filter may keep entries for it, which only adds false positives.
    async fn insert_batch(&self, codes: &[ShortCode]) -> Result<()>;

    /// Registers a code in the membership filter without pooling it.
    ///
    /// Used for codes that were persisted without passing through the pool,
    /// so a later candidate equal to one of them is caught by [`exists`](CodePool::exists).
    async fn mark_used(&self, code: &ShortCode) -> Result<()>;

    /// Probabilistic membership test.
    ///
    /// `false` means the code was never registered. `true` may be a false
    /// positive and must be verified against durable storage before trusting it.
    async fn exists(&self, code: &ShortCode) -> Result<bool>;

    /// Batched [`exists`](CodePool::exists).
    async fn exists_batch(&self, codes: &[ShortCode]) -> Result<HashMap<ShortCode, bool>>;
}

#[async_trait]
impl<T: CodePool + ?Sized> CodePool for std::sync::Arc<T> {
    async fn count(&self) -> Result<i64> {
        (**self).count().await
    }

    async fn get_one(&self) -> Result<ShortCode> {
        (**self).get_one().await
    }

    async fn insert_one(&self, code: &ShortCode) -> Result<()> {
        (**self).insert_one(code).await
    }

    async fn insert_batch(&self, codes: &[ShortCode]) -> Result<()> {
        (**self).insert_batch(codes).await
    }

    async fn mark_used(&self, code: &ShortCode) -> Result<()> {
        (**self).mark_used(code).await
    }

    async fn exists(&self, code: &ShortCode) -> Result<bool> {
        (**self).exists(code).await
    }

    async fn exists_batch(&self, codes: &[ShortCode]) -> Result<HashMap<ShortCode, bool>> {
        (**self).exists_batch(codes).await
    }
}
