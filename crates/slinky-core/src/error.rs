use crate::context::CancelReason;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache operation timed out: {0}")]
    Timeout(String),
    #[error("cache serialization failed: {0}")]
    Serialization(String),
    #[error("cache value is invalid: {0}")]
    InvalidData(String),
    #[error("cache initialization failed: {0}")]
    Initialization(String),
    #[error("cache entry not found: {0}")]
    NotFound(String),
    #[error("cache operation failed: {0}")]
    Operation(String),
}

impl CacheError {
    /// Whether the failure is a deadline-exceeded condition worth one more attempt.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CacheError::Timeout(_))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("short code already exists: {0}")]
    Conflict(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("transaction spans more than one partition: {0}")]
    CrossPartition(String),
    #[error("storage operation failed: {0}")]
    Operation(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShardError {
    #[error("no shard covers key {key}")]
    ShardingFailed { key: String },
    #[error("invalid shard configuration: {0}")]
    InvalidConfig(String),
}

/// Failure reported by a [`UrlHasher`](crate::UrlHasher).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("hashing failed: {0}")]
pub struct HashError(pub String);

/// Errors surfaced by the generation pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerateError {
    #[error("pipeline misconfigured: {0}")]
    Configuration(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    ShardingFailed(ShardError),
    #[error("no pre-generated short code available")]
    NotFound,
    #[error("no id available after {attempts} attempts")]
    IdUnavailable { attempts: u32 },
    #[error("id source closed")]
    SourceClosed,
    #[error("operation cancelled: {0}")]
    Cancelled(CancelReason),
    #[error("persistence failed: {0}")]
    Persistence(StorageError),
    #[error("relay failed: {0}")]
    Relay(String),
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error("code pool failed: {0}")]
    Cache(CacheError),
}

impl From<CacheError> for GenerateError {
    fn from(value: CacheError) -> Self {
        match value {
            CacheError::NotFound(_) => GenerateError::NotFound,
            other => GenerateError::Cache(other),
        }
    }
}

impl From<StorageError> for GenerateError {
    fn from(value: StorageError) -> Self {
        GenerateError::Persistence(value)
    }
}

impl From<ShardError> for GenerateError {
    fn from(value: ShardError) -> Self {
        GenerateError::ShardingFailed(value)
    }
}

impl From<CancelReason> for GenerateError {
    fn from(value: CancelReason) -> Self {
        GenerateError::Cancelled(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_maps_to_not_found() {
        let err: GenerateError = CacheError::NotFound("pool".into()).into();
        assert_eq!(err, GenerateError::NotFound);
    }

    #[test]
    fn other_cache_errors_are_wrapped() {
        let err: GenerateError = CacheError::Timeout("probe".into()).into();
        assert!(matches!(err, GenerateError::Cache(CacheError::Timeout(_))));
    }

    #[test]
    fn storage_errors_become_persistence_errors() {
        let err: GenerateError = StorageError::Conflict("abc".into()).into();
        assert_eq!(
            err,
            GenerateError::Persistence(StorageError::Conflict("abc".into()))
        );
    }
}
