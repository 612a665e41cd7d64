use slinky_core::CacheError;
use thiserror::Error;

/// Errors raised while minting codes for the pool.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    #[error("id generation failed: {0}")]
    Id(#[from] slinky_idgen::Error),

    #[error("code pool error: {0}")]
    Pool(#[from] CacheError),

    #[error("code generation worker failed: {0}")]
    Worker(String),
}
