//! Kalshi orderbook decoder and WebSocket authentication.
//!
//! Kalshi is a snapshot+delta venue: `orderbook_snapshot` replaces the
//! internal book for a ticker, `orderbook_delta` mutates one price
//! level. After every applied message a full `BookUpdate` is emitted.
//! YES levels map to bids and NO levels to asks; integer cent prices in
//! [0, 100] are normalized to price/100.0 at this boundary.

use crate::error::{FeedError, FeedResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use caesar_core::{BookUpdate, PriceLevel, Venue};
use chrono::Utc;
use parking_lot::Mutex;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pss, RsaPrivateKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// WebSocket path signed into the authentication headers.
pub const KALSHI_WS_PATH: &str = "/trade-api/ws/v2";

const UPDATES_CAPACITY: usize = 1024;

/// Compute the RSA-PSS authentication headers for the Kalshi WebSocket
/// upgrade request: an API key, a millisecond timestamp, and a PSS
/// signature over `timestamp || "GET" || path` using SHA-256 with salt
/// length equal to the hash length.
pub fn kalshi_auth_headers(
    api_key: &str,
    private_key_pem: &str,
) -> FeedResult<Vec<(String, String)>> {
    let key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| FeedError::InvalidKey(e.to_string()))?;

    let ts = Utc::now().timestamp_millis().to_string();
    let message = format!("{ts}GET{KALSHI_WS_PATH}");
    let digest = Sha256::digest(message.as_bytes());

    let mut rng = rand::rngs::OsRng;
    let signature = key
        .sign_with_rng(&mut rng, Pss::new::<Sha256>(), digest.as_slice())
        .map_err(|e| FeedError::Signing(e.to_string()))?;

    Ok(vec![
        ("KALSHI-ACCESS-KEY".to_string(), api_key.to_string()),
        ("KALSHI-ACCESS-TIMESTAMP".to_string(), ts),
        ("KALSHI-ACCESS-SIGNATURE".to_string(), BASE64.encode(signature)),
    ])
}

/// Subscription command envelope.
#[derive(Debug, Serialize)]
struct Command {
    id: u64,
    cmd: &'static str,
    params: CommandParams,
}

#[derive(Debug, Serialize)]
struct CommandParams {
    channels: Vec<&'static str>,
    market_ticker: String,
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    msg: RawSnapshotMsg,
}

#[derive(Debug, Deserialize)]
struct RawSnapshotMsg {
    #[serde(default)]
    market_ticker: String,
    #[serde(default)]
    market_id: String,
    #[serde(default)]
    yes: Vec<(i64, i64)>,
    #[serde(default)]
    no: Vec<(i64, i64)>,
}

#[derive(Debug, Deserialize)]
struct RawDelta {
    msg: RawDeltaMsg,
}

#[derive(Debug, Deserialize)]
struct RawDeltaMsg {
    #[serde(default)]
    market_ticker: String,
    price: i64,
    delta: i64,
    side: String,
}

/// Internal book state for a single market, keyed by cent price.
#[derive(Debug, Default)]
struct OrderBook {
    market_id: String,
    yes: HashMap<i64, i64>,
    no: HashMap<i64, i64>,
}

/// Decoder for the Kalshi market-data WebSocket.
pub struct KalshiDecoder {
    transport: Arc<caesar_ws::WsTransport>,
    raw: mpsc::Receiver<Vec<u8>>,
    updates_tx: mpsc::Sender<BookUpdate>,
    /// Books keyed by market_ticker.
    books: Mutex<HashMap<String, OrderBook>>,
    cmd_id: AtomicU64,
}

impl KalshiDecoder {
    /// Create a decoder backed by the given transport. Must be called
    /// before `transport.connect()` so no early frame is missed.
    pub fn new(transport: Arc<caesar_ws::WsTransport>) -> (Self, mpsc::Receiver<BookUpdate>) {
        let raw = transport.subscribe();
        let (updates_tx, updates_rx) = mpsc::channel(UPDATES_CAPACITY);
        (
            Self {
                transport,
                raw,
                updates_tx,
                books: Mutex::new(HashMap::new()),
                cmd_id: AtomicU64::new(0),
            },
            updates_rx,
        )
    }

    /// Send an `orderbook_delta` subscription for the given ticker.
    pub fn subscribe(&self, ticker: &str) {
        let cmd = Command {
            id: self.cmd_id.fetch_add(1, Ordering::Relaxed) + 1,
            cmd: "subscribe",
            params: CommandParams {
                channels: vec!["orderbook_delta"],
                market_ticker: ticker.to_string(),
            },
        };
        match serde_json::to_string(&cmd) {
            Ok(frame) => self.transport.send(frame),
            Err(e) => error!(error = %e, "failed to encode subscription"),
        }
    }

    /// Process snapshots and deltas until cancellation.
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => return,
                frame = self.raw.recv() => {
                    match frame {
                        Some(raw) => self.handle_frame(&raw),
                        None => return,
                    }
                }
            }
        }
    }

    fn handle_frame(&self, raw: &[u8]) {
        let env: RawEnvelope = match serde_json::from_slice(raw) {
            Ok(env) => env,
            Err(e) => {
                warn!(error = %e, "invalid JSON frame");
                return;
            }
        };

        match env.kind.as_str() {
            "orderbook_snapshot" => self.handle_snapshot(raw),
            "orderbook_delta" => self.handle_delta(raw),
            "error" => error!(frame = %String::from_utf8_lossy(raw), "venue error"),
            _ => {}
        }
    }

    fn handle_snapshot(&self, raw: &[u8]) {
        let snap: RawSnapshot = match serde_json::from_slice(raw) {
            Ok(snap) => snap,
            Err(e) => {
                warn!(error = %e, "failed to parse snapshot");
                return;
            }
        };

        let ticker = snap.msg.market_ticker.clone();
        let book = OrderBook {
            market_id: snap.msg.market_id,
            yes: snap.msg.yes.into_iter().collect(),
            no: snap.msg.no.into_iter().collect(),
        };

        let update = book_update(&ticker, &book);
        self.books.lock().insert(ticker, book);
        self.emit(update);
    }

    fn handle_delta(&self, raw: &[u8]) {
        let delta: RawDelta = match serde_json::from_slice(raw) {
            Ok(delta) => delta,
            Err(e) => {
                warn!(error = %e, "failed to parse delta");
                return;
            }
        };

        let msg = delta.msg;
        let update = {
            let mut books = self.books.lock();
            let book = match books.get_mut(&msg.market_ticker) {
                Some(book) => book,
                // Deltas require a preceding snapshot.
                None => {
                    debug!(ticker = %msg.market_ticker, "delta without snapshot, dropping");
                    return;
                }
            };

            let side = if msg.side == "no" {
                &mut book.no
            } else {
                &mut book.yes
            };

            let qty = side.get(&msg.price).copied().unwrap_or(0) + msg.delta;
            if qty <= 0 {
                side.remove(&msg.price);
            } else {
                side.insert(msg.price, qty);
            }

            book_update(&msg.market_ticker, book)
        };

        self.emit(update);
    }

    fn emit(&self, update: BookUpdate) {
        if self.updates_tx.try_send(update).is_err() {
            debug!("updates channel full, dropping book update");
        }
    }
}

/// Convert internal book state into a unified update.
/// YES levels become bids, NO levels become asks; cents normalize to
/// the (0, 1) price domain. Deltas carry no usable venue timestamp, so
/// emitted updates are stamped with the receive time.
fn book_update(ticker: &str, book: &OrderBook) -> BookUpdate {
    BookUpdate {
        venue: Venue::Kalshi,
        market_id: book.market_id.clone(),
        asset_id: ticker.to_string(),
        bids: cents_to_levels(&book.yes),
        asks: cents_to_levels(&book.no),
        timestamp: Utc::now(),
        hash: None,
    }
}

fn cents_to_levels(side: &HashMap<i64, i64>) -> Vec<PriceLevel> {
    side.iter()
        .map(|(&price, &qty)| PriceLevel::new(price as f64 / 100.0, qty as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use caesar_core::{best_ask, best_bid};

    fn decoder() -> (KalshiDecoder, mpsc::Receiver<BookUpdate>) {
        let transport = Arc::new(caesar_ws::WsTransport::new(caesar_ws::WsConfig::new(
            "wss://example.invalid/ws",
        )));
        KalshiDecoder::new(transport)
    }

    fn snapshot_frame() -> &'static [u8] {
        br#"{"type":"orderbook_snapshot","sid":1,"seq":1,"msg":{"market_ticker":"KX-TEST","market_id":"mkt-1","yes":[[48,300]],"no":[[54,200]]}}"#
    }

    #[tokio::test]
    async fn snapshot_then_delta() {
        let (decoder, mut updates) = decoder();

        decoder.handle_frame(snapshot_frame());
        let snap = updates.try_recv().unwrap();
        assert_eq!(snap.venue, Venue::Kalshi);
        assert_eq!(snap.market_id, "mkt-1");
        assert_eq!(snap.asset_id, "KX-TEST");
        assert_eq!(snap.bids, vec![PriceLevel::new(0.48, 300.0)]);
        assert_eq!(snap.asks, vec![PriceLevel::new(0.54, 200.0)]);

        decoder.handle_frame(
            br#"{"type":"orderbook_delta","sid":1,"seq":2,"msg":{"market_ticker":"KX-TEST","price":48,"delta":-100,"side":"yes"}}"#,
        );
        let after = updates.try_recv().unwrap();
        assert_eq!(best_bid(&after.bids), 0.48);
        assert_eq!(after.bids[0].size, 200.0);
        assert_eq!(best_ask(&after.asks), 0.54);
        assert_eq!(after.asks[0].size, 200.0);
    }

    #[tokio::test]
    async fn delta_to_zero_removes_level() {
        let (decoder, mut updates) = decoder();
        decoder.handle_frame(snapshot_frame());
        let _ = updates.try_recv().unwrap();

        decoder.handle_frame(
            br#"{"type":"orderbook_delta","sid":1,"seq":2,"msg":{"market_ticker":"KX-TEST","price":48,"delta":-300,"side":"yes"}}"#,
        );
        let after = updates.try_recv().unwrap();
        assert!(after.bids.is_empty());
        assert_eq!(after.asks.len(), 1);
    }

    #[tokio::test]
    async fn delta_without_snapshot_is_dropped() {
        let (decoder, mut updates) = decoder();
        decoder.handle_frame(
            br#"{"type":"orderbook_delta","sid":1,"seq":1,"msg":{"market_ticker":"UNKNOWN","price":48,"delta":10,"side":"yes"}}"#,
        );
        assert!(updates.try_recv().is_err());
    }

    #[tokio::test]
    async fn delta_on_no_side_updates_asks() {
        let (decoder, mut updates) = decoder();
        decoder.handle_frame(snapshot_frame());
        let _ = updates.try_recv().unwrap();

        decoder.handle_frame(
            br#"{"type":"orderbook_delta","sid":1,"seq":2,"msg":{"market_ticker":"KX-TEST","price":56,"delta":50,"side":"no"}}"#,
        );
        let after = updates.try_recv().unwrap();
        assert_eq!(after.asks.len(), 2);
        assert_eq!(best_ask(&after.asks), 0.54);
    }

    #[test]
    fn subscription_command_shape() {
        let cmd = Command {
            id: 7,
            cmd: "subscribe",
            params: CommandParams {
                channels: vec!["orderbook_delta"],
                market_ticker: "KX-TEST".to_string(),
            },
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(
            json,
            r#"{"id":7,"cmd":"subscribe","params":{"channels":["orderbook_delta"],"market_ticker":"KX-TEST"}}"#
        );
    }

    #[test]
    fn auth_headers_cover_key_timestamp_signature() {
        // 2048-bit keygen is slow in debug builds but fine for a single test.
        let mut rng = rand::rngs::OsRng;
        let key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let pem = rsa::pkcs8::EncodePrivateKey::to_pkcs8_pem(&key, rsa::pkcs8::LineEnding::LF)
            .unwrap()
            .to_string();

        let headers = kalshi_auth_headers("api-key-1", &pem).unwrap();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0].0, "KALSHI-ACCESS-KEY");
        assert_eq!(headers[0].1, "api-key-1");
        assert_eq!(headers[1].0, "KALSHI-ACCESS-TIMESTAMP");
        assert!(headers[1].1.parse::<i64>().is_ok());
        assert_eq!(headers[2].0, "KALSHI-ACCESS-SIGNATURE");
        assert!(BASE64.decode(&headers[2].1).is_ok());
    }

    #[test]
    fn bad_pem_is_rejected() {
        let err = kalshi_auth_headers("k", "not a pem").unwrap_err();
        assert!(matches!(err, FeedError::InvalidKey(_)));
    }
}
