//! Polymarket CLOB market-channel decoder.
//!
//! Subscribes with `{"type":"market","assets_ids":[...]}` and turns
//! `event_type="book"` snapshots into unified `BookUpdate` values.
//! Price and size arrive as decimal strings in [0,1] and are parsed to
//! binary floating point at this boundary; downstream components never
//! see the string representation.

use caesar_core::{BookUpdate, PriceLevel, Venue};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Capacity of the decoder's normalized update channel.
const UPDATES_CAPACITY: usize = 1024;

/// Market-channel subscription message.
#[derive(Debug, Serialize)]
struct SubscribeMsg<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    assets_ids: Vec<&'a str>,
}

/// Raw book event as received over the wire.
#[derive(Debug, Deserialize)]
struct RawBookEvent {
    #[serde(default)]
    asset_id: String,
    #[serde(default)]
    market: String,
    #[serde(default)]
    bids: Vec<RawPriceLevel>,
    #[serde(default)]
    asks: Vec<RawPriceLevel>,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    hash: String,
}

#[derive(Debug, Deserialize)]
struct RawPriceLevel {
    price: String,
    size: String,
}

/// Fast event-type detection before full parsing.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    event_type: String,
}

/// Decoder for the Polymarket CLOB WebSocket.
pub struct PolymarketDecoder {
    transport: Arc<caesar_ws::WsTransport>,
    /// Raw frames, registered at construction so nothing arriving
    /// between connect and subscribe is lost.
    raw: mpsc::Receiver<Vec<u8>>,
    updates_tx: mpsc::Sender<BookUpdate>,
}

impl PolymarketDecoder {
    /// Create a decoder backed by the given transport. Must be called
    /// before `transport.connect()` so the fan-out subscription exists
    /// when the read loop starts.
    ///
    /// Returns the decoder and the receiver of normalized updates to
    /// hand to the hub.
    pub fn new(transport: Arc<caesar_ws::WsTransport>) -> (Self, mpsc::Receiver<BookUpdate>) {
        let raw = transport.subscribe();
        let (updates_tx, updates_rx) = mpsc::channel(UPDATES_CAPACITY);
        (
            Self {
                transport,
                raw,
                updates_tx,
            },
            updates_rx,
        )
    }

    /// Send a market-channel subscription for the given token ids.
    pub fn subscribe(&self, token_ids: &[&str]) {
        let msg = SubscribeMsg {
            kind: "market",
            assets_ids: token_ids.to_vec(),
        };
        match serde_json::to_string(&msg) {
            Ok(frame) => self.transport.send(frame),
            Err(e) => error!(error = %e, "failed to encode subscription"),
        }
    }

    /// Read raw frames, parse book events, and push normalized updates
    /// until cancellation.
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

        match env.event_type.as_str() {
            "book" => self.handle_book(raw),
            "error" => error!(frame = %String::from_utf8_lossy(raw), "venue error"),
            // price_change, tick_size_change, last_trade_price: ignored.
            _ => {}
        }
    }

    fn handle_book(&self, raw: &[u8]) {
        let ev: RawBookEvent = match serde_json::from_slice(raw) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(error = %e, "failed to parse book event");
                return;
            }
        };

        let update = BookUpdate {
            venue: Venue::Polymarket,
            market_id: ev.market,
            asset_id: ev.asset_id.clone(),
            bids: parse_levels(&ev.bids),
            asks: parse_levels(&ev.asks),
            timestamp: parse_timestamp(&ev.timestamp),
            hash: (!ev.hash.is_empty()).then_some(ev.hash),
        };

        if self.updates_tx.try_send(update).is_err() {
            debug!(asset_id = %ev.asset_id, "updates channel full, dropping book update");
        }
    }
}

/// Convert raw string price/size pairs into levels. A level with an
/// unparsable field is skipped, not the whole frame.
fn parse_levels(raw: &[RawPriceLevel]) -> Vec<PriceLevel> {
    raw.iter()
        .filter_map(|level| {
            let price = level.price.parse::<f64>().ok()?;
            let size = level.size.parse::<f64>().ok()?;
            Some(PriceLevel::new(price, size))
        })
        .collect()
}

/// Unix-millisecond string to `DateTime<Utc>`; epoch when malformed.
fn parse_timestamp(s: &str) -> DateTime<Utc> {
    s.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_default()
}
