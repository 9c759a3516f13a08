//! Error types for caesar-persistence.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("cache error: {0}")]
    Cache(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;
