//! Circuit breaker gating order submission.
//!
//! `can_trade` passes only when all four conditions hold, checked in
//! order: no manual halt, the venue transport circuit is closed, the
//! market's data is fresh, and the post-recovery cool-off has elapsed.
//!
//! Transports are held as weak references: the breaker observes
//! connection health but never keeps a dead transport alive, and
//! transports have no reference back.

use caesar_core::{BookUpdate, Venue};
use caesar_ws::{CircuitState, WsTransport};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Injectable time source for deterministic tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The interface the validator and execution façade check before
/// letting an order through.
pub trait TradingGate: Send + Sync {
    fn can_trade(&self, venue: Venue, market_id: &str) -> bool;
}

/// Tunable parameters for the breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Maximum age of the last update before a market counts as stale.
    pub stale_threshold: Duration,
    /// Continuous healthy-data period required after a recovery before
    /// trading re-enables.
    pub cool_off: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::from_millis(1000),
            cool_off: Duration::from_secs(2),
        }
    }
}

/// Health for a single (venue, market) pair.
#[derive(Debug, Default)]
struct MarketHealth {
    last_update: Option<DateTime<Utc>>,
    /// Set on an unhealthy-to-healthy transition; trading stays blocked
    /// until the cool-off elapses.
    recovered_at: Option<DateTime<Utc>>,
    healthy: bool,
}

/// Monitors transport health and data freshness, gating all trade
/// execution behind [`CircuitBreaker::can_trade`].
pub struct CircuitBreaker {
    cfg: BreakerConfig,
    /// Unified hub stream, consumed by `run`.
    feed: Mutex<Option<mpsc::Receiver<BookUpdate>>>,
    conns: RwLock<HashMap<Venue, Weak<WsTransport>>>,
    markets: RwLock<HashMap<(Venue, String), MarketHealth>>,
    halted: RwLock<bool>,
    now: Clock,
}

impl CircuitBreaker {
    /// Create a breaker consuming the hub's unified stream. Transports
    /// are registered separately via [`CircuitBreaker::watch_connection`].
    pub fn new(cfg: BreakerConfig, feed: mpsc::Receiver<BookUpdate>) -> Self {
        Self::with_clock(cfg, feed, Arc::new(Utc::now))
    }

    /// Create a breaker with an injected clock.
    pub fn with_clock(
        cfg: BreakerConfig,
        feed: mpsc::Receiver<BookUpdate>,
        now: Clock,
    ) -> Self {
        Self {
            cfg,
            feed: Mutex::new(Some(feed)),
            conns: RwLock::new(HashMap::new()),
            markets: RwLock::new(HashMap::new()),
            halted: RwLock::new(false),
            now,
        }
    }

    /// Register a transport so its circuit state is consulted for the
    /// given venue.
    pub fn watch_connection(&self, venue: Venue, transport: &Arc<WsTransport>) {
        self.conns.write().insert(venue, Arc::downgrade(transport));
    }

    /// Force all trading off until [`CircuitBreaker::resume`].
    pub fn manual_halt(&self) {
        *self.halted.write() = true;
        warn!("manual halt engaged, all trading disabled");
    }

    /// Clear the manual halt. Markets still need fresh data and an
    /// elapsed cool-off before `can_trade` returns true.
    pub fn resume(&self) {
        *self.halted.write() = false;
        debug!("manual halt cleared");
    }

    /// Force a market into an unhealthy state (external staleness
    /// triggers such as a dispute flag). No-op for unknown markets.
    pub fn mark_stale(&self, venue: Venue, market_id: &str) {
        let mut markets = self.markets.write();
        if let Some(health) = markets.get_mut(&(venue, market_id.to_string())) {
            health.healthy = false;
        }
    }

    /// Consume the unified feed, tracking per-market freshness and
    /// recovery, until cancellation.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut feed = match self.feed.lock().take() {
            Some(feed) => feed,
            None => return,
        };

        loop {
            tokio::select! {
                () = shutdown.cancelled() => return,
                update = feed.recv() => {
                    match update {
                        Some(update) => self.record_update(&update),
                        None => return,
                    }
                }
            }
        }
    }

    fn record_update(&self, update: &BookUpdate) {
        let now = (self.now)();
        let mut markets = self.markets.write();
        let health = markets
            .entry((update.venue, update.market_id.clone()))
            .or_default();

        let was_healthy = health.healthy;
        health.last_update = Some(now);
        health.healthy = true;

        if !was_healthy {
            health.recovered_at = Some(now);
        }
    }
}

impl TradingGate for CircuitBreaker {
    /// True only when, in order:
    /// 1. no manual halt is active,
    /// 2. the registered transport for the venue (if any) is healthy,
    /// 3. the last update for this market is within the stale threshold,
    /// 4. the cool-off has elapsed since the last recovery.
    fn can_trade(&self, venue: Venue, market_id: &str) -> bool {
        if *self.halted.read() {
            return false;
        }

        if let Some(weak) = self.conns.read().get(&venue) {
            if let Some(transport) = weak.upgrade() {
                if transport.circuit_state() == CircuitState::Open {
                    return false;
                }
            }
        }

        let now = (self.now)();
        let stale = ChronoDuration::from_std(self.cfg.stale_threshold)
            .unwrap_or_else(|_| ChronoDuration::milliseconds(1000));
        let cool_off = ChronoDuration::from_std(self.cfg.cool_off)
            .unwrap_or_else(|_| ChronoDuration::seconds(2));

        let markets = self.markets.read();
        let health = match markets.get(&(venue, market_id.to_string())) {
            Some(health) => health,
            // No data received yet.
            None => return false,
        };

        let last_update = match health.last_update {
            Some(ts) => ts,
            None => return false,
        };
        if now - last_update > stale {
            return false;
        }

        if let Some(recovered_at) = health.recovered_at {
            if now - recovered_at < cool_off {
                return false;
            }
        }

        true
    }
}
