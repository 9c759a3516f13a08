//! Two-stage best-quote writer.
//!
//! Stage one drains the hub's unified stream into a staging buffer so
//! hub dispatch is never blocked by cache latency; stage two flushes
//! the buffer to the cache, suppressing writes whose best bid/ask are
//! unchanged since the last write for the same key.

use crate::cache::{book_key, BookCache};
use caesar_core::{best_ask, best_bid, BookUpdate, PriceLevel};
use caesar_telemetry::Metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Capacity of the staging buffer between ingest and flush.
const STAGING_CAPACITY: usize = 1024;

/// Persists best bid/ask per market from the unified stream.
pub struct QuoteWriter<C> {
    cache: Arc<C>,
    feed: Mutex<Option<mpsc::Receiver<BookUpdate>>>,
    /// Last written (bid, ask) strings per cache key, for dedup.
    last: Mutex<HashMap<String, (String, String)>>,
}

impl<C: BookCache + 'static> QuoteWriter<C> {
    pub fn new(cache: Arc<C>, feed: mpsc::Receiver<BookUpdate>) -> Self {
        Self {
            cache,
            feed: Mutex::new(Some(feed)),
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Run the ingest and flush stages until cancellation.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut feed = match self.feed.lock().take() {
            Some(feed) => feed,
            None => return,
        };

        let (staging_tx, mut staging_rx) = mpsc::channel::<BookUpdate>(STAGING_CAPACITY);

        // Ingest: drain the hub feed into the staging buffer; a full
        // buffer drops the update rather than backpressuring the hub.
        let ingest_shutdown = shutdown.clone();
        let ingest = async move {
            loop {
                tokio::select! {
                    () = ingest_shutdown.cancelled() => return,
                    update = feed.recv() => {
                        match update {
                            Some(update) => {
                                let venue = update.venue;
                                if staging_tx.try_send(update).is_err() {
                                    Metrics::writer_buffer_dropped(venue.as_str());
                                    trace!(venue = %venue, "staging buffer full, dropping update");
                                }
                            }
                            None => return,
                        }
                    }
                }
            }
        };

        // Flush: write staged updates to the cache.
        let flush = async {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    update = staging_rx.recv() => {
                        match update {
                            Some(update) => self.write(&update).await,
                            None => return,
                        }
                    }
                }
            }
        };

        tokio::join!(ingest, flush);
    }

    /// Extract best quotes, dedup against the last write, and HSET.
    async fn write(&self, update: &BookUpdate) {
        let bid = format_price(best_bid(&update.bids), &update.bids);
        let ask = format_price(best_ask(&update.asks), &update.asks);
        let key = book_key(update.venue, &update.market_id);

        {
            let mut last = self.last.lock();
            if let Some(prev) = last.get(&key) {
                if prev.0 == bid && prev.1 == ask {
                    return;
                }
            }
            last.insert(key.clone(), (bid.clone(), ask.clone()));
        }

        let ts_ms = update.timestamp.timestamp_millis();
        if let Err(e) = self.cache.put_quote(&key, &bid, &ask, ts_ms).await {
            warn!(key = %key, error = %e, "cache write failed");
        }
    }
}

/// Shortest decimal representation of a best price; the literal "0"
/// for an empty side.
fn format_price(best: f64, levels: &[PriceLevel]) -> String {
    if levels.is_empty() {
        "0".to_string()
    } else {
        format!("{best}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistenceResult;
    use crate::cache::{BoxFuture, CachedQuote};
    use caesar_core::Venue;
    use chrono::{TimeZone, Utc};

    /// In-memory cache recording every write.
    #[derive(Default)]
    struct MemoryCache {
        writes: Mutex<Vec<(String, String, String, i64)>>,
    }

    impl BookCache for MemoryCache {
        fn put_quote<'a>(
            &'a self,
            key: &'a str,
            bid: &'a str,
            ask: &'a str,
            ts_ms: i64,
        ) -> BoxFuture<'a, PersistenceResult<()>> {
            Box::pin(async move {
                self.writes.lock().push((
                    key.to_string(),
                    bid.to_string(),
                    ask.to_string(),
                    ts_ms,
                ));
                Ok(())
            })
        }

        fn get_quote<'a>(
            &'a self,
            _venue: Venue,
            _market_id: &'a str,
        ) -> BoxFuture<'a, PersistenceResult<Option<CachedQuote>>> {
            Box::pin(async { Ok(None) })
        }
    }

    fn update(bid: f64, ask: f64) -> BookUpdate {
        BookUpdate {
            venue: Venue::Polymarket,
            market_id: "M1".to_string(),
            asset_id: "A".to_string(),
            bids: vec![PriceLevel::new(bid, 10.0)],
            asks: vec![PriceLevel::new(ask, 10.0)],
            timestamp: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            hash: None,
        }
    }

    #[tokio::test]
    async fn identical_quotes_write_once() {
        let cache = Arc::new(MemoryCache::default());
        let (tx, rx) = mpsc::channel(16);
        let writer = QuoteWriter::new(Arc::clone(&cache), rx);

        for _ in 0..3 {
            tx.send(update(0.48, 0.54)).await.unwrap();
        }
        tx.send(update(0.50, 0.54)).await.unwrap();
        drop(tx);

        writer.run(CancellationToken::new()).await;

        let writes = cache.writes.lock();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].0, "book:polymarket:M1");
        assert_eq!(writes[0].1, "0.48");
        assert_eq!(writes[0].2, "0.54");
        assert_eq!(writes[0].3, 1_700_000_000_000);
        assert_eq!(writes[1].1, "0.5");
    }

    #[tokio::test]
    async fn empty_sides_write_zero() {
        let cache = Arc::new(MemoryCache::default());
        let (tx, rx) = mpsc::channel(16);
        let writer = QuoteWriter::new(Arc::clone(&cache), rx);

        let mut up = update(0.48, 0.54);
        up.asks.clear();
        tx.send(up).await.unwrap();
        drop(tx);

        writer.run(CancellationToken::new()).await;

        let writes = cache.writes.lock();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].2, "0");
    }

    #[tokio::test]
    async fn best_of_side_is_derived_from_unsorted_levels() {
        let cache = Arc::new(MemoryCache::default());
        let (tx, rx) = mpsc::channel(16);
        let writer = QuoteWriter::new(Arc::clone(&cache), rx);

        let mut up = update(0.40, 0.60);
        up.bids.push(PriceLevel::new(0.49, 5.0));
        up.asks.push(PriceLevel::new(0.52, 5.0));
        tx.send(up).await.unwrap();
        drop(tx);

        writer.run(CancellationToken::new()).await;

        let writes = cache.writes.lock();
        assert_eq!(writes[0].1, "0.49");
        assert_eq!(writes[0].2, "0.52");
    }
}
