//! Error types for caesar-feed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("invalid PEM key: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type FeedResult<T> = Result<T, FeedError>;
