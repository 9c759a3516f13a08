//! Error types for caesar-signer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("no active session")]
    NoSession,

    #[error("session expired")]
    SessionExpired,

    #[error("cumulative notional limit exceeded")]
    LimitExceeded,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("sealed region corrupted")]
    SealedRegionCorrupted,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SignerResult<T> = Result<T, SignerError>;
