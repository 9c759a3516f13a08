//! Core domain types for the Caesar trading terminal.
//!
//! This crate provides the types shared by every pipeline stage:
//! - `Venue`: which exchange a value originated from
//! - `BookUpdate`, `PriceLevel`: the unified order book snapshot
//! - `MarketPair`: links the same real-world event across venues
//! - `Order` and its lifecycle enums

pub mod book;
pub mod order;
pub mod pair;

pub use book::{best_ask, best_bid, BookUpdate, PriceLevel, Venue};
pub use order::{Order, OrderSide, OrderStatus, OrderType};
pub use pair::MarketPair;
