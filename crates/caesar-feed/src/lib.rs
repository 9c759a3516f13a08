//! Venue decoders and the fan-out hub.
//!
//! Decoders translate venue wire frames into unified `BookUpdate`
//! values; the hub routes those updates to filtered and unified
//! subscribers without blocking on slow consumers.

pub mod error;
pub mod hub;
pub mod kalshi;
pub mod polymarket;

pub use error::{FeedError, FeedResult};
pub use hub::BookHub;
pub use kalshi::{kalshi_auth_headers, KalshiDecoder, KALSHI_WS_PATH};
pub use polymarket::PolymarketDecoder;
