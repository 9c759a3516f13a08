//! Unified order book snapshot types.
//!
//! Every venue decoder normalizes its wire format into `BookUpdate`.
//! Downstream consumers (hub, writer, unified book, breaker) operate on
//! this type regardless of origin. All prices live in the normalized
//! (0, 1) probability domain; venue representations (cent integers,
//! decimal strings) never leave the decoder boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Venue identifies the source exchange of market data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Polymarket,
    Kalshi,
}

impl Venue {
    /// Stable lowercase name, used in cache keys and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Polymarket => "polymarket",
            Venue::Kalshi => "kalshi",
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single bid or ask at a given price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Normalized price in (0, 1).
    pub price: f64,
    /// Non-negative size.
    pub size: f64,
}

impl PriceLevel {
    pub fn new(price: f64, size: f64) -> Self {
        Self { price, size }
    }
}

/// Immutable snapshot of a single market on a single venue.
///
/// Bid/ask levels are not required to be sorted; consumers derive the
/// best of each side with [`best_bid`] / [`best_ask`].
#[derive(Debug, Clone, PartialEq)]
pub struct BookUpdate {
    pub venue: Venue,
    /// Opaque venue market identifier (condition id / market id).
    pub market_id: String,
    /// Opaque venue asset identifier (token id / ticker).
    pub asset_id: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    /// Source timestamp as reported by the venue (receive time when the
    /// venue does not stamp the frame).
    pub timestamp: DateTime<Utc>,
    /// Venue deduplication hash, when provided.
    pub hash: Option<String>,
}

/// Highest price across a set of bids, or 0.0 when the side is empty.
pub fn best_bid(levels: &[PriceLevel]) -> f64 {
    levels.iter().fold(0.0_f64, |best, l| best.max(l.price))
}

/// Lowest price across a set of asks, or 0.0 when the side is empty.
pub fn best_ask(levels: &[PriceLevel]) -> f64 {
    if levels.is_empty() {
        return 0.0;
    }
    levels.iter().fold(f64::INFINITY, |best, l| best.min(l.price))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: f64) -> PriceLevel {
        PriceLevel::new(price, 10.0)
    }

    #[test]
    fn venue_name_is_lowercase() {
        assert_eq!(Venue::Polymarket.to_string(), "polymarket");
        assert_eq!(Venue::Kalshi.as_str(), "kalshi");
    }

    #[test]
    fn best_bid_picks_highest() {
        let bids = vec![level(0.48), level(0.52), level(0.50)];
        assert_eq!(best_bid(&bids), 0.52);
    }

    #[test]
    fn best_ask_picks_lowest() {
        let asks = vec![level(0.55), level(0.53), level(0.60)];
        assert_eq!(best_ask(&asks), 0.53);
    }

    #[test]
    fn empty_sides_yield_zero() {
        assert_eq!(best_bid(&[]), 0.0);
        assert_eq!(best_ask(&[]), 0.0);
    }
}
