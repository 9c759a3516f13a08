//! Market pair registry type.

use serde::{Deserialize, Serialize};

/// Links the same real-world event across both venues.
///
/// Pairs are registered before the pipeline starts and are immutable
/// afterwards; re-registering the same name replaces the pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketPair {
    /// Human-readable label, unique across the registry.
    pub name: String,
    /// Polymarket market / condition id.
    pub poly_market_id: String,
    /// Kalshi market id.
    pub kalshi_market_id: String,
}

impl MarketPair {
    pub fn new(
        name: impl Into<String>,
        poly_market_id: impl Into<String>,
        kalshi_market_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            poly_market_id: poly_market_id.into(),
            kalshi_market_id: kalshi_market_id.into(),
        }
    }
}
