//! Execution façade.
//!
//! Consumes the cached book state, the validator, the tunnel manager,
//! and the signer to place limit, market, and stop-loss orders, and to
//! run hedged two-leg placements with best-effort rollback. The
//! circuit breaker veto is consulted inside the validator and again
//! immediately before the tunnel send.

use crate::error::{ExecError, ExecResult};
use crate::validator::{OrderValidator, SLIPPAGE_CAP_BPS};
use caesar_core::{Order, OrderSide, OrderStatus, OrderType, Venue};
use caesar_persistence::BookCache;
use caesar_risk::TradingGate;
use caesar_signer::rpc::{
    DomainPayload, OrderPayload, SidePayload, SigTypePayload, SignOrderRequest, SignOrderResponse,
};
use caesar_signer::{SignerClient, SignerClientError};
use caesar_ws::{TunnelManager, WsResult};
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Signing operations the façade needs. Implemented by [`SignerClient`]
/// in production and by fakes in tests.
pub trait OrderSigner: Send + Sync {
    fn sign_order<'a>(
        &'a self,
        request: SignOrderRequest,
    ) -> BoxFuture<'a, Result<SignOrderResponse, SignerClientError>>;

    fn sign_cancel<'a>(
        &'a self,
        request: SignOrderRequest,
    ) -> BoxFuture<'a, Result<SignOrderResponse, SignerClientError>>;
}

impl OrderSigner for SignerClient {
    fn sign_order<'a>(
        &'a self,
        request: SignOrderRequest,
    ) -> BoxFuture<'a, Result<SignOrderResponse, SignerClientError>> {
        Box::pin(SignerClient::sign_order(self, request))
    }

    fn sign_cancel<'a>(
        &'a self,
        request: SignOrderRequest,
    ) -> BoxFuture<'a, Result<SignOrderResponse, SignerClientError>> {
        Box::pin(SignerClient::sign_cancel(self, request))
    }
}

/// Frame submission over the user's private tunnel. Implemented by
/// [`TunnelManager`]; fakes record frames in tests.
pub trait TunnelSink: Send + Sync {
    fn submit(&self, user_id: &str, venue: Venue, frame: String) -> WsResult<()>;
}

impl TunnelSink for TunnelManager {
    fn submit(&self, user_id: &str, venue: Venue, frame: String) -> WsResult<()> {
        self.send(user_id, venue, frame)
    }
}

/// Engine parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// EIP-712 domain for Polymarket order signing.
    pub domain: DomainPayload,
    /// Per-leg timeout for hedged execution.
    pub leg_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            domain: DomainPayload {
                name: "Polymarket CTF Exchange".to_string(),
                version: "1".to_string(),
                chain_id: 137,
                verifying_contract: "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E".to_string(),
            },
            leg_timeout: Duration::from_secs(5),
        }
    }
}

/// Result of a successful placement.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order_id: String,
    /// Executable price: the limit price, or the capped market price.
    pub price: f64,
    /// 65-byte signature hex for Polymarket orders.
    pub signature_hex: Option<String>,
}

/// Outcome of one hedge leg.
#[derive(Debug, Clone)]
pub enum LegStatus {
    Placed(PlacedOrder),
    Rejected(String),
    TimedOut,
}

impl LegStatus {
    pub fn is_placed(&self) -> bool {
        matches!(self, LegStatus::Placed(_))
    }
}

/// Best-effort rollback outcome, reported alongside the partial-fill
/// state rather than pretending atomicity.
#[derive(Debug, Clone)]
pub struct RollbackReport {
    pub order_id: String,
    pub succeeded: bool,
    pub detail: String,
}

/// Full report of a hedged placement.
#[derive(Debug)]
pub struct HedgeReport {
    pub buy: (Order, LegStatus),
    pub sell: (Order, LegStatus),
    pub rollback: Option<RollbackReport>,
}

/// Places orders through the validator, signer, and tunnels.
pub struct ExecutionEngine<C, S, T> {
    cache: Arc<C>,
    validator: OrderValidator,
    gate: Arc<dyn TradingGate>,
    signer: Arc<S>,
    tunnels: Arc<T>,
    cfg: EngineConfig,
}

impl<C, S, T> ExecutionEngine<C, S, T>
where
    C: BookCache,
    S: OrderSigner,
    T: TunnelSink,
{
    pub fn new(
        cache: Arc<C>,
        gate: Arc<dyn TradingGate>,
        signer: Arc<S>,
        tunnels: Arc<T>,
        cfg: EngineConfig,
    ) -> Self {
        Self {
            cache,
            validator: OrderValidator::new(Arc::clone(&gate)),
            gate,
            signer,
            tunnels,
            cfg,
        }
    }

    /// Validate, price, sign (Polymarket), and submit one order.
    pub async fn place_order(&self, order: &mut Order) -> ExecResult<PlacedOrder> {
        self.validator.validate(order)?;

        let price = self.resolve_price(order).await?;

        let signature_hex = if order.venue == Venue::Polymarket {
            let response = self
                .signer
                .sign_order(self.sign_request(order, price))
                .await?;
            Some(response.signature_hex)
        } else {
            None
        };

        // The book may have gone stale while signing.
        if !self.gate.can_trade(order.venue, &order.market_id) {
            order.status = OrderStatus::Rejected;
            return Err(ExecError::CircuitOpen {
                venue: order.venue,
                market_id: order.market_id.clone(),
            });
        }

        let frame = order_frame(order, price, signature_hex.as_deref());
        self.tunnels.submit(&order.user_id, order.venue, frame)?;
        order.status = OrderStatus::Pending;

        info!(
            order_id = %order.order_id,
            venue = %order.venue,
            price,
            "order submitted"
        );
        Ok(PlacedOrder {
            order_id: order.order_id.clone(),
            price,
            signature_hex,
        })
    }

    /// Submit two legs concurrently. If either leg fails or times out,
    /// attempt to cancel the surviving leg; the rollback is best-effort
    /// and its outcome is reported to the caller.
    pub async fn place_hedged(&self, mut buy: Order, mut sell: Order) -> HedgeReport {
        let timeout = self.cfg.leg_timeout;
        let (buy_result, sell_result) = tokio::join!(
            tokio::time::timeout(timeout, self.place_order(&mut buy)),
            tokio::time::timeout(timeout, self.place_order(&mut sell)),
        );

        let buy_status = leg_status(buy_result);
        let sell_status = leg_status(sell_result);

        let rollback = match (&buy_status, &sell_status) {
            (LegStatus::Placed(placed), failed) if !failed.is_placed() => {
                Some(self.roll_back(&buy, placed).await)
            }
            (failed, LegStatus::Placed(placed)) if !failed.is_placed() => {
                Some(self.roll_back(&sell, placed).await)
            }
            _ => None,
        };

        HedgeReport {
            buy: (buy, buy_status),
            sell: (sell, sell_status),
            rollback,
        }
    }

    /// Best-effort cancellation of a completed leg.
    async fn roll_back(&self, order: &Order, placed: &PlacedOrder) -> RollbackReport {
        warn!(order_id = %order.order_id, "hedge leg failed, rolling back surviving leg");

        let cancel_signature = if order.venue == Venue::Polymarket {
            match self
                .signer
                .sign_cancel(self.sign_request(order, placed.price))
                .await
            {
                Ok(response) => Some(response.signature_hex),
                Err(e) => {
                    return RollbackReport {
                        order_id: order.order_id.clone(),
                        succeeded: false,
                        detail: format!("cancel signing failed: {e}"),
                    }
                }
            }
        } else {
            None
        };

        let frame = cancel_frame(order, cancel_signature.as_deref());
        match self.tunnels.submit(&order.user_id, order.venue, frame) {
            Ok(()) => RollbackReport {
                order_id: order.order_id.clone(),
                succeeded: true,
                detail: "cancel submitted".to_string(),
            },
            Err(e) => RollbackReport {
                order_id: order.order_id.clone(),
                succeeded: false,
                detail: format!("cancel submission failed: {e}"),
            },
        }
    }

    /// Executable price for an order. Limit and stop-loss orders use
    /// their own price; market orders read the cached best quote and
    /// bound the price at the slippage cap from the best price.
    async fn resolve_price(&self, order: &Order) -> ExecResult<f64> {
        if order.order_type != OrderType::Market {
            return Ok(order.price);
        }

        let quote = self
            .cache
            .get_quote(order.venue, &order.market_id)
            .await?
            .ok_or_else(|| ExecError::NoQuote {
                venue: order.venue,
                market_id: order.market_id.clone(),
            })?;

        let cap = f64::from(SLIPPAGE_CAP_BPS) / 10_000.0;
        let price = match order.side {
            OrderSide::Buy if quote.ask > 0.0 => quote.ask * (1.0 + cap),
            OrderSide::Sell if quote.bid > 0.0 => quote.bid * (1.0 - cap),
            _ => {
                return Err(ExecError::NoQuote {
                    venue: order.venue,
                    market_id: order.market_id.clone(),
                })
            }
        };
        Ok(price)
    }

    fn sign_request(&self, order: &Order, price: f64) -> SignOrderRequest {
        let (maker_amount, taker_amount) = order_amounts(order, price);
        SignOrderRequest {
            domain: self.cfg.domain.clone(),
            order: OrderPayload {
                salt: String::new(),
                maker: order.user_id.clone(),
                taker: "0x0000000000000000000000000000000000000000".to_string(),
                token_id: order.asset_id.clone(),
                maker_amount: maker_amount.to_string(),
                taker_amount: taker_amount.to_string(),
                expiration: 0,
                nonce: 0,
                fee_rate_bps: 0,
                side: match order.side {
                    OrderSide::Buy => SidePayload::Buy,
                    OrderSide::Sell => SidePayload::Sell,
                },
                signature_type: SigTypePayload::Eoa,
            },
        }
    }
}

fn leg_status(
    result: Result<ExecResult<PlacedOrder>, tokio::time::error::Elapsed>,
) -> LegStatus {
    match result {
        Ok(Ok(placed)) => LegStatus::Placed(placed),
        Ok(Err(e)) => LegStatus::Rejected(e.to_string()),
        Err(_) => LegStatus::TimedOut,
    }
}

/// Maker/taker amounts in atomic units (6 decimals). Buying spends
/// USDC for outcome tokens; selling spends outcome tokens for USDC.
fn order_amounts(order: &Order, price: f64) -> (u128, u128) {
    let usdc = to_atomic(price * order.quantity);
    let tokens = to_atomic(order.quantity);
    match order.side {
        OrderSide::Buy => (usdc, tokens),
        OrderSide::Sell => (tokens, usdc),
    }
}

fn to_atomic(value: f64) -> u128 {
    (value * 1_000_000.0).round().max(0.0) as u128
}

/// The gated signed order handed to the venue tunnel.
fn order_frame(order: &Order, price: f64, signature_hex: Option<&str>) -> String {
    json!({
        "action": "place_order",
        "order_id": order.order_id,
        "market_id": order.market_id,
        "asset_id": order.asset_id,
        "side": order.side,
        "type": order.order_type,
        "price": price,
        "quantity": order.quantity,
        "signature": signature_hex,
    })
    .to_string()
}

fn cancel_frame(order: &Order, signature_hex: Option<&str>) -> String {
    json!({
        "action": "cancel_order",
        "order_id": order.order_id,
        "market_id": order.market_id,
        "signature": signature_hex,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use caesar_persistence::{CachedQuote, PersistenceResult};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeGate(AtomicBool);

    impl TradingGate for FakeGate {
        fn can_trade(&self, _venue: Venue, _market_id: &str) -> bool {
            self.0.load(Ordering::Relaxed)
        }
    }

    #[derive(Default)]
    struct FakeCache {
        quote: Mutex<Option<CachedQuote>>,
    }

    impl BookCache for FakeCache {
        fn put_quote<'a>(
            &'a self,
            _key: &'a str,
            _bid: &'a str,
            _ask: &'a str,
            _ts_ms: i64,
        ) -> caesar_persistence::cache::BoxFuture<'a, PersistenceResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn get_quote<'a>(
            &'a self,
            _venue: Venue,
            _market_id: &'a str,
        ) -> caesar_persistence::cache::BoxFuture<'a, PersistenceResult<Option<CachedQuote>>>
        {
            let quote = self.quote.lock().clone();
            Box::pin(async move { Ok(quote) })
        }
    }

    #[derive(Default)]
    struct FakeSigner {
        fail: AtomicBool,
        cancels: Mutex<Vec<String>>,
    }

    impl OrderSigner for FakeSigner {
        fn sign_order<'a>(
            &'a self,
            _request: SignOrderRequest,
        ) -> BoxFuture<'a, Result<SignOrderResponse, SignerClientError>> {
            Box::pin(async move {
                if self.fail.load(Ordering::Relaxed) {
                    return Err(SignerClientError::Protocol("signer down".into()));
                }
                Ok(SignOrderResponse {
                    signature_hex: format!("0x{}", "ab".repeat(65)),
                    signer_address: "0x0000000000000000000000000000000000000001".into(),
                    signed_at_ns: 1,
                })
            })
        }

        fn sign_cancel<'a>(
            &'a self,
            request: SignOrderRequest,
        ) -> BoxFuture<'a, Result<SignOrderResponse, SignerClientError>> {
            Box::pin(async move {
                self.cancels.lock().push(request.order.token_id.clone());
                Ok(SignOrderResponse {
                    signature_hex: format!("0x{}", "cd".repeat(65)),
                    signer_address: "0x0000000000000000000000000000000000000001".into(),
                    signed_at_ns: 2,
                })
            })
        }
    }

    /// Records frames; optionally fails for one venue.
    #[derive(Default)]
    struct FakeSink {
        frames: Mutex<Vec<(String, Venue, String)>>,
        fail_venue: Mutex<Option<Venue>>,
    }

    impl TunnelSink for FakeSink {
        fn submit(&self, user_id: &str, venue: Venue, frame: String) -> WsResult<()> {
            if *self.fail_venue.lock() == Some(venue) {
                return Err(caesar_ws::WsError::NoTunnel {
                    user_id: user_id.to_string(),
                    venue,
                });
            }
            self.frames.lock().push((user_id.to_string(), venue, frame));
            Ok(())
        }
    }

    struct Fixture {
        engine: ExecutionEngine<FakeCache, FakeSigner, FakeSink>,
        cache: Arc<FakeCache>,
        signer: Arc<FakeSigner>,
        sink: Arc<FakeSink>,
        gate: Arc<FakeGate>,
    }

    fn fixture() -> Fixture {
        let cache = Arc::new(FakeCache::default());
        let signer = Arc::new(FakeSigner::default());
        let sink = Arc::new(FakeSink::default());
        let gate = Arc::new(FakeGate(AtomicBool::new(true)));
        let engine = ExecutionEngine::new(
            Arc::clone(&cache),
            gate.clone() as Arc<dyn TradingGate>,
            Arc::clone(&signer),
            Arc::clone(&sink),
            EngineConfig::default(),
        );
        Fixture {
            engine,
            cache,
            signer,
            sink,
            gate,
        }
    }

    fn order(venue: Venue, side: OrderSide, order_type: OrderType, price: f64) -> Order {
        Order::new(
            "o-1",
            "0x1111111111111111111111111111111111111111",
            venue,
            "M",
            "42",
            side,
            order_type,
            price,
            10.0,
        )
    }

    #[tokio::test]
    async fn limit_order_is_signed_and_submitted() {
        let f = fixture();
        let mut o = order(Venue::Polymarket, OrderSide::Buy, OrderType::Limit, 0.5);

        let placed = f.engine.place_order(&mut o).await.unwrap();
        assert_eq!(o.status, OrderStatus::Pending);
        assert_eq!(placed.price, 0.5);
        assert!(placed.signature_hex.is_some());

        let frames = f.sink.frames.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].1, Venue::Polymarket);
        assert!(frames[0].2.contains("place_order"));
    }

    #[tokio::test]
    async fn kalshi_orders_skip_the_signer() {
        let f = fixture();
        // A broken signer must not matter for Kalshi.
        f.signer.fail.store(true, Ordering::Relaxed);

        let mut o = order(Venue::Kalshi, OrderSide::Buy, OrderType::Limit, 0.5);
        let placed = f.engine.place_order(&mut o).await.unwrap();
        assert!(placed.signature_hex.is_none());
        assert_eq!(o.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn market_order_applies_the_slippage_cap() {
        let f = fixture();
        *f.cache.quote.lock() = Some(CachedQuote {
            bid: 0.48,
            ask: 0.52,
            ts_ms: 1,
        });

        let mut buy = order(Venue::Polymarket, OrderSide::Buy, OrderType::Market, 0.0);
        let placed = f.engine.place_order(&mut buy).await.unwrap();
        assert!((placed.price - 0.52 * 1.001).abs() < 1e-9);

        let mut sell = order(Venue::Polymarket, OrderSide::Sell, OrderType::Market, 0.0);
        let placed = f.engine.place_order(&mut sell).await.unwrap();
        assert!((placed.price - 0.48 * 0.999).abs() < 1e-9);
    }

    #[tokio::test]
    async fn market_order_without_quote_fails() {
        let f = fixture();
        let mut o = order(Venue::Polymarket, OrderSide::Buy, OrderType::Market, 0.0);
        let err = f.engine.place_order(&mut o).await.unwrap_err();
        assert!(matches!(err, ExecError::NoQuote { .. }));
    }

    #[tokio::test]
    async fn breaker_is_rechecked_before_submission() {
        let mut o = order(Venue::Kalshi, OrderSide::Buy, OrderType::Limit, 0.5);

        // Trip the breaker between validation and submission by
        // making the gate one-shot: first call passes, second fails.
        struct OneShotGate(AtomicBool);
        impl TradingGate for OneShotGate {
            fn can_trade(&self, _venue: Venue, _market_id: &str) -> bool {
                self.0.swap(false, Ordering::Relaxed)
            }
        }

        let engine = ExecutionEngine::new(
            Arc::new(FakeCache::default()),
            Arc::new(OneShotGate(AtomicBool::new(true))) as Arc<dyn TradingGate>,
            Arc::new(FakeSigner::default()),
            Arc::new(FakeSink::default()),
            EngineConfig::default(),
        );

        let err = engine.place_order(&mut o).await.unwrap_err();
        assert!(matches!(err, ExecError::CircuitOpen { .. }));
        assert_eq!(o.status, OrderStatus::Rejected);
    }

    #[tokio::test]
    async fn hedged_success_places_both_legs() {
        let f = fixture();
        let buy = order(Venue::Polymarket, OrderSide::Buy, OrderType::Limit, 0.5);
        let sell = order(Venue::Kalshi, OrderSide::Sell, OrderType::Limit, 0.55);

        let report = f.engine.place_hedged(buy, sell).await;
        assert!(report.buy.1.is_placed());
        assert!(report.sell.1.is_placed());
        assert!(report.rollback.is_none());
        assert_eq!(f.sink.frames.lock().len(), 2);
    }

    #[tokio::test]
    async fn failed_leg_triggers_best_effort_rollback() {
        let f = fixture();
        // The Kalshi tunnel is down: the sell leg fails after the buy
        // leg was placed.
        *f.sink.fail_venue.lock() = Some(Venue::Kalshi);

        let buy = order(Venue::Polymarket, OrderSide::Buy, OrderType::Limit, 0.5);
        let sell = order(Venue::Kalshi, OrderSide::Sell, OrderType::Limit, 0.55);

        let report = f.engine.place_hedged(buy, sell).await;
        assert!(report.buy.1.is_placed());
        assert!(matches!(report.sell.1, LegStatus::Rejected(_)));

        let rollback = report.rollback.expect("rollback attempted");
        assert_eq!(rollback.order_id, "o-1");
        assert!(rollback.succeeded);
        // The cancel was signed for the Polymarket leg.
        assert_eq!(f.signer.cancels.lock().len(), 1);

        let frames = f.sink.frames.lock();
        assert!(frames.iter().any(|(_, _, frame)| frame.contains("cancel_order")));
    }

    #[tokio::test]
    async fn rollback_failure_is_reported_not_hidden() {
        let f = fixture();
        // Kalshi tunnel down and cancels unsendable: the sell leg
        // fails and the rollback of the buy leg fails too.
        struct FlakySink {
            inner: FakeSink,
        }
        impl TunnelSink for FlakySink {
            fn submit(&self, user_id: &str, venue: Venue, frame: String) -> WsResult<()> {
                if venue == Venue::Kalshi || frame.contains("cancel_order") {
                    return Err(caesar_ws::WsError::NoTunnel {
                        user_id: user_id.to_string(),
                        venue,
                    });
                }
                self.inner.submit(user_id, venue, frame)
            }
        }

        let sink = Arc::new(FlakySink {
            inner: FakeSink::default(),
        });
        let engine = ExecutionEngine::new(
            Arc::new(FakeCache::default()),
            f.gate.clone() as Arc<dyn TradingGate>,
            Arc::new(FakeSigner::default()),
            Arc::clone(&sink),
            EngineConfig::default(),
        );

        let buy = order(Venue::Polymarket, OrderSide::Buy, OrderType::Limit, 0.5);
        let sell = order(Venue::Kalshi, OrderSide::Sell, OrderType::Limit, 0.55);

        let report = engine.place_hedged(buy, sell).await;
        assert!(report.buy.1.is_placed());
        assert!(!report.sell.1.is_placed());
        let rollback = report.rollback.expect("rollback attempted");
        assert!(!rollback.succeeded);
        assert!(rollback.detail.contains("cancel submission failed"));
    }
}
