//! Pre-flight order validation.
//!
//! Checks run in order and fail on the first violation. Side and order
//! type validity are enforced by the type system; the remaining checks
//! are venue constraints, price domain (strict, both endpoints
//! excluded), lot size, and the circuit breaker. On success the order
//! advances `new -> validated`; on failure `new -> rejected`.
//!
//! Market orders carry no price here; they are flagged for the
//! downstream slippage cap, which the execution façade enforces at
//! submission time against the cached best price.

use crate::error::{ExecError, ExecResult};
use caesar_core::{Order, OrderStatus, OrderType, Venue};
use caesar_risk::TradingGate;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Maximum slippage for market orders, in basis points from the best
/// undisputed price. Enforced by the execution façade.
pub const SLIPPAGE_CAP_BPS: u32 = 10;

/// Per-venue validation limits.
#[derive(Debug, Clone, Copy)]
pub struct VenueConstraints {
    pub min_price: f64,
    pub max_price: f64,
    pub min_lot: f64,
}

/// Both venues quote normalized probabilities with unit lots.
pub fn default_constraints() -> HashMap<Venue, VenueConstraints> {
    let bounds = VenueConstraints {
        min_price: 0.0,
        max_price: 1.0,
        min_lot: 1.0,
    };
    HashMap::from([(Venue::Polymarket, bounds), (Venue::Kalshi, bounds)])
}

/// Pre-flight checks before an order enters the execution pipeline.
pub struct OrderValidator {
    gate: Arc<dyn TradingGate>,
    constraints: HashMap<Venue, VenueConstraints>,
}

impl OrderValidator {
    pub fn new(gate: Arc<dyn TradingGate>) -> Self {
        Self {
            gate,
            constraints: default_constraints(),
        }
    }

    pub fn with_constraints(
        gate: Arc<dyn TradingGate>,
        constraints: HashMap<Venue, VenueConstraints>,
    ) -> Self {
        Self { gate, constraints }
    }

    /// Run all checks. Advances the order status to `Validated`, or to
    /// `Rejected` with the first violation.
    pub fn validate(&self, order: &mut Order) -> ExecResult<()> {
        match self.check(order) {
            Ok(()) => {
                order.status = OrderStatus::Validated;
                Ok(())
            }
            Err(e) => {
                debug!(order_id = %order.order_id, error = %e, "order rejected");
                order.status = OrderStatus::Rejected;
                Err(e)
            }
        }
    }

    fn check(&self, order: &Order) -> ExecResult<()> {
        let bounds = self
            .constraints
            .get(&order.venue)
            .ok_or(ExecError::UnknownVenue(order.venue))?;

        // Price domain applies to orders that carry a user price.
        if matches!(order.order_type, OrderType::Limit | OrderType::StopLoss)
            && (order.price <= bounds.min_price || order.price >= bounds.max_price)
        {
            return Err(ExecError::PriceOutOfRange {
                price: order.price,
                min: bounds.min_price,
                max: bounds.max_price,
            });
        }

        if order.quantity < bounds.min_lot {
            return Err(ExecError::QuantityTooLow {
                quantity: order.quantity,
                min_lot: bounds.min_lot,
            });
        }

        if !self.gate.can_trade(order.venue, &order.market_id) {
            return Err(ExecError::CircuitOpen {
                venue: order.venue,
                market_id: order.market_id.clone(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caesar_core::{OrderSide, OrderType};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeGate(AtomicBool);

    impl TradingGate for FakeGate {
        fn can_trade(&self, _venue: Venue, _market_id: &str) -> bool {
            self.0.load(Ordering::Relaxed)
        }
    }

    fn gate(open: bool) -> Arc<FakeGate> {
        Arc::new(FakeGate(AtomicBool::new(open)))
    }

    fn order(order_type: OrderType, price: f64, quantity: f64) -> Order {
        Order::new(
            "o-1",
            "u-1",
            Venue::Polymarket,
            "M",
            "A",
            OrderSide::Buy,
            order_type,
            price,
            quantity,
        )
    }

    #[test]
    fn valid_limit_order_passes() {
        let validator = OrderValidator::new(gate(true));
        let mut o = order(OrderType::Limit, 0.5, 10.0);
        validator.validate(&mut o).unwrap();
        assert_eq!(o.status, OrderStatus::Validated);
    }

    #[test]
    fn endpoints_are_excluded() {
        let validator = OrderValidator::new(gate(true));

        for price in [0.0, 1.0, -0.1, 1.1] {
            let mut o = order(OrderType::Limit, price, 10.0);
            let err = validator.validate(&mut o).unwrap_err();
            assert!(matches!(err, ExecError::PriceOutOfRange { .. }), "{price}");
            assert_eq!(o.status, OrderStatus::Rejected);
        }

        // Stop-loss orders carry a price and get the same bound.
        let mut o = order(OrderType::StopLoss, 1.0, 10.0);
        assert!(validator.validate(&mut o).is_err());
    }

    #[test]
    fn market_orders_skip_the_price_check() {
        let validator = OrderValidator::new(gate(true));
        let mut o = order(OrderType::Market, 0.0, 10.0);
        validator.validate(&mut o).unwrap();
        assert_eq!(o.status, OrderStatus::Validated);
    }

    #[test]
    fn quantity_below_lot_fails() {
        let validator = OrderValidator::new(gate(true));
        let mut o = order(OrderType::Limit, 0.5, 0.5);
        let err = validator.validate(&mut o).unwrap_err();
        assert!(matches!(err, ExecError::QuantityTooLow { .. }));
    }

    #[test]
    fn circuit_open_rejects() {
        let validator = OrderValidator::new(gate(false));
        let mut o = order(OrderType::Limit, 0.5, 10.0);
        let err = validator.validate(&mut o).unwrap_err();
        assert!(matches!(err, ExecError::CircuitOpen { .. }));
        assert_eq!(o.status, OrderStatus::Rejected);
    }

    #[test]
    fn checks_run_in_order() {
        // Price violation must win over the open circuit.
        let validator = OrderValidator::new(gate(false));
        let mut o = order(OrderType::Limit, 1.5, 10.0);
        let err = validator.validate(&mut o).unwrap_err();
        assert!(matches!(err, ExecError::PriceOutOfRange { .. }));
    }
}
