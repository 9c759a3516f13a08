//! Cache abstraction and the Redis-backed implementation.
//!
//! Schema: key `book:{venue}:{market_id}` holds a hash with fields
//! `bid` (decimal string, no trailing zeros), `ask` (decimal string),
//! and `ts` (milliseconds since epoch as a string).

use crate::error::{PersistenceError, PersistenceResult};
use caesar_core::Venue;
use redis::AsyncCommands;
use std::future::Future;
use std::pin::Pin;
use tracing::info;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A cached best quote as read back from the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedQuote {
    pub bid: f64,
    pub ask: f64,
    /// Milliseconds since epoch of the underlying update.
    pub ts_ms: i64,
}

/// The cache operations the pipeline needs. Implemented by
/// [`RedisCache`] in production and by in-memory fakes in tests.
pub trait BookCache: Send + Sync {
    /// Write the best quote fields for one market.
    fn put_quote<'a>(
        &'a self,
        key: &'a str,
        bid: &'a str,
        ask: &'a str,
        ts_ms: i64,
    ) -> BoxFuture<'a, PersistenceResult<()>>;

    /// Read a market's best quote, if present.
    fn get_quote<'a>(
        &'a self,
        venue: Venue,
        market_id: &'a str,
    ) -> BoxFuture<'a, PersistenceResult<Option<CachedQuote>>>;
}

/// Cache key for a market's best quote hash.
pub fn book_key(venue: Venue, market_id: &str) -> String {
    format!("book:{venue}:{market_id}")
}

/// Redis-backed cache.
#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisCache {
    /// Connect to Redis (`redis://host:port/db` URL, password embedded
    /// as userinfo when required).
    pub async fn connect(url: &str) -> PersistenceResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!(url, "connected to cache");
        Ok(Self { conn })
    }
}

impl BookCache for RedisCache {
    fn put_quote<'a>(
        &'a self,
        key: &'a str,
        bid: &'a str,
        ask: &'a str,
        ts_ms: i64,
    ) -> BoxFuture<'a, PersistenceResult<()>> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let fields = [
                ("bid", bid.to_string()),
                ("ask", ask.to_string()),
                ("ts", ts_ms.to_string()),
            ];
            conn.hset_multiple::<_, _, _, ()>(key, &fields).await?;
            Ok(())
        })
    }

    fn get_quote<'a>(
        &'a self,
        venue: Venue,
        market_id: &'a str,
    ) -> BoxFuture<'a, PersistenceResult<Option<CachedQuote>>> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let key = book_key(venue, market_id);
            let values: Vec<Option<String>> = redis::cmd("HMGET")
                .arg(&key)
                .arg("bid")
                .arg("ask")
                .arg("ts")
                .query_async(&mut conn)
                .await?;

            let (bid, ask, ts) = match (values.first(), values.get(1), values.get(2)) {
                (Some(Some(bid)), Some(Some(ask)), Some(Some(ts))) => (bid, ask, ts),
                _ => return Ok(None),
            };

            let parse = |s: &str, field: &str| {
                s.parse::<f64>()
                    .map_err(|_| PersistenceError::Cache(format!("bad {field} value: {s}")))
            };
            let quote = CachedQuote {
                bid: parse(bid, "bid")?,
                ask: parse(ask, "ask")?,
                ts_ms: ts
                    .parse::<i64>()
                    .map_err(|_| PersistenceError::Cache(format!("bad ts value: {ts}")))?,
            };
            Ok(Some(quote))
        })
    }
}
