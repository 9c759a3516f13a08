//! Error types for caesar-executor.

use caesar_core::Venue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("price {price} not strictly inside ({min}, {max})")]
    PriceOutOfRange { price: f64, min: f64, max: f64 },

    #[error("quantity {quantity} below minimum lot {min_lot}")]
    QuantityTooLow { quantity: f64, min_lot: f64 },

    #[error("no constraints registered for venue {0}")]
    UnknownVenue(Venue),

    #[error("circuit breaker: trading disabled for {venue}/{market_id}")]
    CircuitOpen { venue: Venue, market_id: String },

    #[error("no cached quote for {venue}/{market_id}")]
    NoQuote { venue: Venue, market_id: String },

    #[error("cache error: {0}")]
    Cache(#[from] caesar_persistence::PersistenceError),

    #[error(transparent)]
    Signer(#[from] caesar_signer::SignerClientError),

    #[error(transparent)]
    Tunnel(#[from] caesar_ws::WsError),
}

pub type ExecResult<T> = Result<T, ExecError>;
