//! Order domain types shared by the validator and the execution façade.

use crate::Venue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => f.write_str("buy"),
            OrderSide::Sell => f.write_str("sell"),
        }
    }
}

/// Execution semantics of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderType {
    Limit,
    Market,
    StopLoss,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Limit => f.write_str("limit"),
            OrderType::Market => f.write_str("market"),
            OrderType::StopLoss => f.write_str("stop-loss"),
        }
    }
}

/// Lifecycle of an order. Transitions are monotone:
/// `new -> validated -> pending -> {filled | cancelled | rejected}`,
/// with `new -> rejected` on validation failure. No backward transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    New,
    Validated,
    Pending,
    Filled,
    Cancelled,
    Rejected,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::New => "new",
            OrderStatus::Validated => "validated",
            OrderStatus::Pending => "pending",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Unified order representation for both venues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub user_id: String,
    pub venue: Venue,
    pub market_id: String,
    pub asset_id: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Normalized price in (0, 1). Market orders carry 0; the execution
    /// price is resolved from the book at submission time.
    pub price: f64,
    pub quantity: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Create a fresh order in `New` status.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_id: impl Into<String>,
        user_id: impl Into<String>,
        venue: Venue,
        market_id: impl Into<String>,
        asset_id: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        price: f64,
        quantity: f64,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            user_id: user_id.into(),
            venue,
            market_id: market_id.into(),
            asset_id: asset_id.into(),
            side,
            order_type,
            price,
            quantity,
            status: OrderStatus::New,
            created_at: Utc::now(),
        }
    }
}
