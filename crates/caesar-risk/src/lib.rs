//! Circuit breaker: the single veto consulted before any order leaves
//! the terminal.

pub mod breaker;

pub use breaker::{BreakerConfig, CircuitBreaker, Clock, TradingGate};
