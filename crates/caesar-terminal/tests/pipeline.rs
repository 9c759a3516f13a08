//! End-to-end pipeline test: mock venue WebSocket -> transport ->
//! decoder -> hub -> consumers.

use caesar_core::Venue;
use caesar_feed::{BookHub, KalshiDecoder, PolymarketDecoder};
use caesar_ws::{WsConfig, WsTransport};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

/// Minimal mock venue: accepts connections and broadcasts frames.
struct MockVenue {
    addr: SocketAddr,
    clients: Arc<Mutex<Vec<mpsc::UnboundedSender<String>>>>,
}

impl MockVenue {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let clients: Arc<Mutex<Vec<mpsc::UnboundedSender<String>>>> =
            Arc::new(Mutex::new(Vec::new()));

        let clients_clone = clients.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let clients = clients_clone.clone();
                tokio::spawn(handle_client(stream, clients));
            }
        });

        Self { addr, clients }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    async fn broadcast(&self, frame: &str) {
        for client in self.clients.lock().await.iter() {
            let _ = client.send(frame.to_string());
        }
    }
}

async fn handle_client(stream: TcpStream, clients: Arc<Mutex<Vec<mpsc::UnboundedSender<String>>>>) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    let (mut write, mut read) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    clients.lock().await.push(tx);

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(frame) => {
                        if write.send(Message::Text(frame)).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                }
            }
            inbound = read.next() => {
                match inbound {
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(_)) => {}
                    _ => return,
                }
            }
        }
    }
}

fn quiet_transport(url: String, label: &str) -> Arc<WsTransport> {
    let mut cfg = WsConfig::new(url).with_label(label);
    cfg.heartbeat_timeout = Duration::from_secs(5);
    Arc::new(WsTransport::new(cfg))
}

#[tokio::test]
async fn polymarket_frames_flow_to_unified_subscribers() {
    let venue = MockVenue::start().await;
    let transport = quiet_transport(venue.url(), "polymarket");

    let (decoder, updates) = PolymarketDecoder::new(Arc::clone(&transport));
    let hub = Arc::new(BookHub::new());
    hub.register(updates);

    let mut filtered = hub.subscribe(Venue::Polymarket, "M");
    let mut all = hub.subscribe_all();

    let shutdown = CancellationToken::new();
    let hub_task = {
        let hub = Arc::clone(&hub);
        let token = shutdown.clone();
        tokio::spawn(async move { hub.run(token).await })
    };

    transport.connect().await.unwrap();
    let decoder_task = {
        let token = shutdown.clone();
        tokio::spawn(async move { decoder.run(token).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    venue
        .broadcast(
            r#"{"event_type":"book","asset_id":"A","market":"M","bids":[{"price":".48","size":"30"},{"price":".49","size":"20"}],"asks":[{"price":".52","size":"25"}],"timestamp":"1700000000000","hash":"0xabc"}"#,
        )
        .await;

    let update = timeout(Duration::from_secs(2), filtered.recv())
        .await
        .expect("filtered update within timeout")
        .unwrap();
    assert_eq!(update.venue, Venue::Polymarket);
    assert_eq!(update.market_id, "M");
    assert_eq!(update.asset_id, "A");
    assert_eq!(update.bids.len(), 2);
    assert_eq!(update.asks.len(), 1);
    assert_eq!(update.timestamp.timestamp_millis(), 1_700_000_000_000);

    let unified_update = timeout(Duration::from_secs(2), all.recv())
        .await
        .expect("unified update within timeout")
        .unwrap();
    assert_eq!(unified_update.market_id, "M");

    shutdown.cancel();
    transport.close();
    hub_task.await.unwrap();
    decoder_task.await.unwrap();
}

#[tokio::test]
async fn kalshi_snapshot_and_delta_flow_through_the_pipeline() {
    let venue = MockVenue::start().await;
    let transport = quiet_transport(venue.url(), "kalshi");

    let (decoder, updates) = KalshiDecoder::new(Arc::clone(&transport));
    let hub = Arc::new(BookHub::new());
    hub.register(updates);

    let mut filtered = hub.subscribe(Venue::Kalshi, "mkt-1");

    let shutdown = CancellationToken::new();
    let hub_task = {
        let hub = Arc::clone(&hub);
        let token = shutdown.clone();
        tokio::spawn(async move { hub.run(token).await })
    };

    transport.connect().await.unwrap();
    let decoder_task = {
        let token = shutdown.clone();
        tokio::spawn(async move { decoder.run(token).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    venue
        .broadcast(
            r#"{"type":"orderbook_snapshot","sid":1,"seq":1,"msg":{"market_ticker":"KX-T","market_id":"mkt-1","yes":[[48,300]],"no":[[54,200]]}}"#,
        )
        .await;
    venue
        .broadcast(
            r#"{"type":"orderbook_delta","sid":1,"seq":2,"msg":{"market_ticker":"KX-T","price":48,"delta":-100,"side":"yes"}}"#,
        )
        .await;

    let snapshot = timeout(Duration::from_secs(2), filtered.recv())
        .await
        .expect("snapshot within timeout")
        .unwrap();
    assert_eq!(snapshot.bids[0].size, 300.0);

    let after_delta = timeout(Duration::from_secs(2), filtered.recv())
        .await
        .expect("delta within timeout")
        .unwrap();
    assert_eq!(after_delta.bids[0].price, 0.48);
    assert_eq!(after_delta.bids[0].size, 200.0);

    shutdown.cancel();
    transport.close();
    hub_task.await.unwrap();
    decoder_task.await.unwrap();
}
