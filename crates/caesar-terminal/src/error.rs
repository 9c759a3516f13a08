//! Error types for the terminal binaries.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Ws(#[from] caesar_ws::WsError),

    #[error(transparent)]
    Feed(#[from] caesar_feed::FeedError),

    #[error(transparent)]
    Persistence(#[from] caesar_persistence::PersistenceError),

    #[error(transparent)]
    SignerClient(#[from] caesar_signer::SignerClientError),
}

pub type AppResult<T> = Result<T, AppError>;
