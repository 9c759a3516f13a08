//! Unified book: merges the latest best quotes from both venues for
//! every registered pair and emits events when the book crosses.
//!
//! A side is "empty" until its first update, represented by zero best
//! bid AND zero best ask (no real market trades at exactly zero).
//! Arbitrage is only considered in a direction whose ask side is
//! non-zero, which rules out empty-side false positives.

use caesar_core::{best_ask, best_bid, BookUpdate, MarketPair, Venue};
use caesar_feed::BookHub;
use caesar_telemetry::Metrics;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Capacity of the arbitrage events channel.
const EVENTS_CAPACITY: usize = 256;

/// Latest best bid/ask snapshot for one venue of a pair.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PairSide {
    pub best_bid: f64,
    pub best_ask: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Merged view for a single market pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PairState {
    pub pair: MarketPair,
    pub poly: PairSide,
    pub kalshi: PairSide,
}

/// Which venue is rich (bid) vs cheap (ask) in a crossed book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbDirection {
    /// Polymarket bid exceeds the Kalshi ask.
    PolyBidKalshiAsk,
    /// Kalshi bid exceeds the Polymarket ask.
    KalshiBidPolyAsk,
}

/// Emitted when a crossed book exceeds the configured threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrageEvent {
    pub pair: MarketPair,
    pub direction: ArbDirection,
    pub bid_venue: Venue,
    pub ask_venue: Venue,
    /// Best bid on the bid venue at emission.
    pub bid: f64,
    /// Best ask on the ask venue at emission.
    pub ask: f64,
    /// `bid - ask`; always greater than the threshold.
    pub spread: f64,
    pub timestamp: DateTime<Utc>,
}

/// Merges order book data from both venues for paired markets and
/// detects arbitrage opportunities in real time.
pub struct UnifiedBook {
    hub: Arc<BookHub>,
    /// Minimum positive spread required before an event is emitted.
    /// Zero emits on any crossed book.
    threshold: f64,
    states: Arc<RwLock<HashMap<String, PairState>>>,
    events_tx: mpsc::Sender<ArbitrageEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ArbitrageEvent>>>,
}

impl UnifiedBook {
    pub fn new(hub: Arc<BookHub>, threshold: f64) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENTS_CAPACITY);
        Self {
            hub,
            threshold,
            states: Arc::new(RwLock::new(HashMap::new())),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Register a market pair. Must be called before `run`;
    /// re-registering a name replaces the pair with empty sides.
    pub fn add_pair(&self, pair: MarketPair) {
        self.states.write().insert(
            pair.name.clone(),
            PairState {
                pair,
                poly: PairSide::default(),
                kalshi: PairSide::default(),
            },
        );
    }

    /// Take the stream of detected arbitrage opportunities.
    /// Yields `None` after the first call.
    pub fn events(&self) -> Option<mpsc::Receiver<ArbitrageEvent>> {
        self.events_rx.lock().take()
    }

    /// Current merged state for a pair.
    pub fn snapshot(&self, pair_name: &str) -> Option<PairState> {
        self.states.read().get(pair_name).cloned()
    }

    /// Subscribe to both sides of every registered pair and process
    /// updates until cancellation.
    pub async fn run(&self, shutdown: CancellationToken) {
        let pairs: Vec<MarketPair> = self
            .states
            .read()
            .values()
            .map(|ps| ps.pair.clone())
            .collect();

        let mut workers = JoinSet::new();
        for pair in pairs {
            let poly_rx = self.hub.subscribe(Venue::Polymarket, &pair.poly_market_id);
            let kalshi_rx = self.hub.subscribe(Venue::Kalshi, &pair.kalshi_market_id);

            for (venue, rx) in [(Venue::Polymarket, poly_rx), (Venue::Kalshi, kalshi_rx)] {
                let shutdown = shutdown.clone();
                let states = Arc::clone(&self.states);
                let events_tx = self.events_tx.clone();
                let pair_name = pair.name.clone();
                let threshold = self.threshold;
                let mut rx = rx;
                workers.spawn(async move {
                    loop {
                        tokio::select! {
                            () = shutdown.cancelled() => return,
                            update = rx.recv() => {
                                match update {
                                    Some(update) => apply_update(
                                        &states, &events_tx, &pair_name, venue, &update, threshold,
                                    ),
                                    None => return,
                                }
                            }
                        }
                    }
                });
            }
        }

        while workers.join_next().await.is_some() {}
    }
}

fn apply_update(
    states: &RwLock<HashMap<String, PairState>>,
    events_tx: &mpsc::Sender<ArbitrageEvent>,
    pair_name: &str,
    venue: Venue,
    update: &BookUpdate,
    threshold: f64,
) {
    let side = PairSide {
        best_bid: best_bid(&update.bids),
        best_ask: best_ask(&update.asks),
        updated_at: Some(update.timestamp),
    };

    let (pair, poly, kalshi) = {
        let mut map = states.write();
        let state = match map.get_mut(pair_name) {
            Some(state) => state,
            None => return,
        };
        match venue {
            Venue::Polymarket => state.poly = side,
            Venue::Kalshi => state.kalshi = side,
        }
        (state.pair.clone(), state.poly, state.kalshi)
    };

    check_arbitrage(events_tx, &pair, poly, kalshi, threshold);
}

fn check_arbitrage(
    events_tx: &mpsc::Sender<ArbitrageEvent>,
    pair: &MarketPair,
    poly: PairSide,
    kalshi: PairSide,
    threshold: f64,
) {
    // Direction 1: Poly bid over Kalshi ask.
    if kalshi.best_ask > 0.0 {
        let spread = poly.best_bid - kalshi.best_ask;
        if spread > threshold {
            emit(
                events_tx,
                ArbitrageEvent {
                    pair: pair.clone(),
                    direction: ArbDirection::PolyBidKalshiAsk,
                    bid_venue: Venue::Polymarket,
                    ask_venue: Venue::Kalshi,
                    bid: poly.best_bid,
                    ask: kalshi.best_ask,
                    spread,
                    timestamp: Utc::now(),
                },
            );
        }
    }

    // Direction 2: Kalshi bid over Poly ask.
    if poly.best_ask > 0.0 {
        let spread = kalshi.best_bid - poly.best_ask;
        if spread > threshold {
            emit(
                events_tx,
                ArbitrageEvent {
                    pair: pair.clone(),
                    direction: ArbDirection::KalshiBidPolyAsk,
                    bid_venue: Venue::Kalshi,
                    ask_venue: Venue::Polymarket,
                    bid: kalshi.best_bid,
                    ask: poly.best_ask,
                    spread,
                    timestamp: Utc::now(),
                },
            );
        }
    }
}

fn emit(events_tx: &mpsc::Sender<ArbitrageEvent>, event: ArbitrageEvent) {
    if events_tx.try_send(event.clone()).is_err() {
        Metrics::arb_event_dropped(&event.pair.name);
        trace!(pair = %event.pair.name, "events channel full, dropping arbitrage event");
    }
}
