//! Many-to-many fan-out hub for normalized book updates.
//!
//! Sources (decoders) register before `run`; subscriptions may be
//! opened at any time. Dispatch is non-blocking: a slow consumer loses
//! updates rather than backpressuring a source, and the drop is
//! counted. Within a single (venue, market) stream, delivery preserves
//! source order.

use caesar_core::{BookUpdate, Venue};
use caesar_telemetry::Metrics;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Capacity of a filtered subscriber channel.
const FILTERED_CAPACITY: usize = 256;
/// Capacity of a unified subscriber channel.
const UNIFIED_CAPACITY: usize = 512;

type SubKey = (Venue, String);
type FilteredSubs = Arc<RwLock<HashMap<SubKey, Vec<mpsc::Sender<BookUpdate>>>>>;
type UnifiedSubs = Arc<RwLock<Vec<mpsc::Sender<BookUpdate>>>>;

/// Many-to-many router between decoders and consumers.
#[derive(Default)]
pub struct BookHub {
    /// Registered sources, moved into worker tasks by `run`.
    sources: Mutex<Vec<mpsc::Receiver<BookUpdate>>>,
    /// Filtered subscribers keyed by (venue, market).
    filtered: FilteredSubs,
    /// Unified subscribers receiving every update.
    unified: UnifiedSubs,
}

impl BookHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a decoder's update stream as a source. Must be called before
    /// `run`.
    pub fn register(&self, source: mpsc::Receiver<BookUpdate>) {
        self.sources.lock().push(source);
    }

    /// Subscribe to updates for one (venue, market). The caller must
    /// drain the channel to avoid dropped updates.
    pub fn subscribe(&self, venue: Venue, market_id: &str) -> mpsc::Receiver<BookUpdate> {
        let (tx, rx) = mpsc::channel(FILTERED_CAPACITY);
        self.filtered
            .write()
            .entry((venue, market_id.to_string()))
            .or_default()
            .push(tx);
        rx
    }

    /// Subscribe to every update regardless of venue or market.
    /// Intended for the persistence writer and the circuit breaker.
    pub fn subscribe_all(&self) -> mpsc::Receiver<BookUpdate> {
        let (tx, rx) = mpsc::channel(UNIFIED_CAPACITY);
        self.unified.write().push(tx);
        rx
    }

    /// Consume every registered source and distribute updates until
    /// cancellation. One worker per source preserves per-source order.
    pub async fn run(&self, shutdown: CancellationToken) {
        let sources = std::mem::take(&mut *self.sources.lock());

        let mut workers = JoinSet::new();
        for mut source in sources {
            let shutdown = shutdown.clone();
            let filtered = Arc::clone(&self.filtered);
            let unified = Arc::clone(&self.unified);
            workers.spawn(async move {
                loop {
                    tokio::select! {
                        () = shutdown.cancelled() => return,
                        update = source.recv() => {
                            match update {
                                Some(update) => dispatch(&filtered, &unified, update),
                                None => return,
                            }
                        }
                    }
                }
            });
        }

        while workers.join_next().await.is_some() {}
    }
}

/// Send an update to all matching filtered subscribers and all unified
/// subscribers. Non-blocking; drops are counted per kind.
fn dispatch(filtered: &FilteredSubs, unified: &UnifiedSubs, update: BookUpdate) {
    {
        let subs = filtered.read();
        if let Some(list) = subs.get(&(update.venue, update.market_id.clone())) {
            for tx in list {
                if tx.try_send(update.clone()).is_err() {
                    Metrics::hub_update_dropped("filtered");
                    trace!(
                        venue = %update.venue,
                        market_id = %update.market_id,
                        "dropping update for slow filtered subscriber"
                    );
                }
            }
        }
    }

    let subs = unified.read();
    for tx in subs.iter() {
        if tx.try_send(update.clone()).is_err() {
            Metrics::hub_update_dropped("unified");
            trace!("dropping update for slow unified subscriber");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn update(venue: Venue, market_id: &str, bid: f64) -> BookUpdate {
        BookUpdate {
            venue,
            market_id: market_id.to_string(),
            asset_id: "asset".to_string(),
            bids: vec![caesar_core::PriceLevel::new(bid, 10.0)],
            asks: vec![],
            timestamp: Utc::now(),
            hash: None,
        }
    }

    #[tokio::test]
    async fn routes_to_filtered_and_unified() {
        let hub = Arc::new(BookHub::new());
        let (tx, rx) = mpsc::channel(16);
        hub.register(rx);

        let mut filtered = hub.subscribe(Venue::Polymarket, "M1");
        let mut other = hub.subscribe(Venue::Polymarket, "M2");
        let mut all = hub.subscribe_all();

        let shutdown = CancellationToken::new();
        let runner = {
            let hub = Arc::clone(&hub);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { hub.run(shutdown).await })
        };

        tx.send(update(Venue::Polymarket, "M1", 0.48)).await.unwrap();

        let got = filtered.recv().await.unwrap();
        assert_eq!(got.market_id, "M1");
        let got_all = all.recv().await.unwrap();
        assert_eq!(got_all.market_id, "M1");
        assert!(other.try_recv().is_err());

        shutdown.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn preserves_order_within_a_market() {
        let hub = Arc::new(BookHub::new());
        let (tx, rx) = mpsc::channel(64);
        hub.register(rx);

        let mut filtered = hub.subscribe(Venue::Kalshi, "M1");

        let shutdown = CancellationToken::new();
        let runner = {
            let hub = Arc::clone(&hub);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { hub.run(shutdown).await })
        };

        for i in 0..20 {
            tx.send(update(Venue::Kalshi, "M1", 0.01 * i as f64))
                .await
                .unwrap();
        }

        for i in 0..20 {
            let got = filtered.recv().await.unwrap();
            assert_eq!(got.bids[0].price, 0.01 * i as f64);
        }

        shutdown.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_stall_others() {
        let hub = Arc::new(BookHub::new());
        let (tx, rx) = mpsc::channel(1024);
        hub.register(rx);

        // One subscriber never reads; the other must still see updates.
        let _stuck = hub.subscribe(Venue::Polymarket, "M1");
        let mut live = hub.subscribe(Venue::Polymarket, "M1");

        let shutdown = CancellationToken::new();
        let runner = {
            let hub = Arc::clone(&hub);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { hub.run(shutdown).await })
        };

        // Exceed the stuck subscriber's buffer capacity.
        for i in 0..(FILTERED_CAPACITY + 64) {
            tx.send(update(Venue::Polymarket, "M1", 0.5 + i as f64 * 1e-6))
                .await
                .unwrap();
            // Keep the live side drained so its channel never fills.
            while let Ok(_got) = live.try_recv() {}
        }

        // The live subscriber keeps receiving past the stuck one's cap.
        tx.send(update(Venue::Polymarket, "M1", 0.99)).await.unwrap();
        let got = tokio::time::timeout(std::time::Duration::from_secs(1), live.recv())
            .await
            .expect("live subscriber should keep receiving")
            .unwrap();
        assert!(got.bids[0].price > 0.0);

        shutdown.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn run_ends_when_sources_close() {
        let hub = Arc::new(BookHub::new());
        let (tx, rx) = mpsc::channel::<BookUpdate>(4);
        hub.register(rx);
        drop(tx);

        let shutdown = CancellationToken::new();
        hub.run(shutdown).await;
    }
}
