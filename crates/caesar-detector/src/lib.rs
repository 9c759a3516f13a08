//! Pair-scoped merger of both venues' books with crossed-book
//! arbitrage detection.

pub mod unified_book;

pub use unified_book::{ArbDirection, ArbitrageEvent, PairSide, PairState, UnifiedBook};
