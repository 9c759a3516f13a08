//! WebSocket error types.

use caesar_core::Venue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("transport already connected")]
    AlreadyConnected,

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("no active tunnel for user {user_id} on {venue}")]
    NoTunnel { user_id: String, venue: Venue },

    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

pub type WsResult<T> = Result<T, WsError>;
