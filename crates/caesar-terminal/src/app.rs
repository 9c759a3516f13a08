//! Pipeline assembly.
//!
//! Builds both venue transports and decoders (decoders register their
//! fan-out subscriptions before the transports start reading), the
//! hub, the breaker, the writer, and the unified book, then runs every
//! loop until cancellation.

use crate::config::Config;
use crate::error::{AppError, AppResult};
use caesar_core::{MarketPair, Venue};
use caesar_detector::UnifiedBook;
use caesar_executor::{EngineConfig, ExecutionEngine};
use caesar_feed::{kalshi_auth_headers, BookHub, KalshiDecoder, PolymarketDecoder};
use caesar_persistence::{QuoteWriter, RedisCache};
use caesar_risk::{BreakerConfig, CircuitBreaker};
use caesar_signer::SignerClient;
use caesar_ws::{TunnelManager, WsConfig, WsTransport};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The assembled terminal.
pub struct Application {
    cfg: Config,
    tunnels: Arc<TunnelManager>,
}

impl Application {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            tunnels: Arc::new(TunnelManager::new()),
        }
    }

    pub fn tunnels(&self) -> Arc<TunnelManager> {
        Arc::clone(&self.tunnels)
    }

    /// Run the market-data pipeline until cancellation.
    pub async fn run(&self, shutdown: CancellationToken) -> AppResult<()> {
        caesar_ws::init_crypto();

        // Transports. Kalshi carries RSA-PSS auth headers when
        // credentials are configured.
        let poly_transport = Arc::new(WsTransport::new(
            WsConfig::new(&self.cfg.venues.poly_ws_url).with_label("polymarket"),
        ));

        let mut kalshi_cfg =
            WsConfig::new(&self.cfg.venues.kalshi_ws_url).with_label("kalshi");
        if !self.cfg.venues.kalshi_api_key.is_empty() {
            kalshi_cfg.headers = kalshi_auth_headers(
                &self.cfg.venues.kalshi_api_key,
                &self.cfg.venues.kalshi_private_key_pem,
            )?;
        }
        let kalshi_transport = Arc::new(WsTransport::new(kalshi_cfg));

        // Decoders must register their subscriptions before connect so
        // no frame arriving between connect and subscribe is lost.
        let (poly_decoder, poly_updates) = PolymarketDecoder::new(Arc::clone(&poly_transport));
        let (kalshi_decoder, kalshi_updates) = KalshiDecoder::new(Arc::clone(&kalshi_transport));

        let hub = Arc::new(BookHub::new());
        hub.register(poly_updates);
        hub.register(kalshi_updates);

        let breaker = Arc::new(CircuitBreaker::new(
            BreakerConfig::default(),
            hub.subscribe_all(),
        ));
        breaker.watch_connection(Venue::Polymarket, &poly_transport);
        breaker.watch_connection(Venue::Kalshi, &kalshi_transport);

        // Writer is optional: a missing cache degrades persistence,
        // never the pipeline.
        let writer = match RedisCache::connect(&self.cfg.cache.url()).await {
            Ok(cache) => Some(Arc::new(QuoteWriter::new(
                Arc::new(cache),
                hub.subscribe_all(),
            ))),
            Err(e) => {
                warn!(error = %e, "cache unavailable, best-quote persistence disabled");
                None
            }
        };

        let unified = Arc::new(UnifiedBook::new(
            Arc::clone(&hub),
            self.cfg.venues.arb_threshold,
        ));
        for pair in &self.cfg.pairs {
            unified.add_pair(MarketPair::new(
                &pair.name,
                &pair.poly_market_id,
                &pair.kalshi_market_id,
            ));
        }
        let events = unified.events();

        let mut loops = JoinSet::new();

        // Consumers and the hub start before the transports connect.
        {
            let hub = Arc::clone(&hub);
            let token = shutdown.clone();
            loops.spawn(async move { hub.run(token).await });
        }
        {
            let breaker = Arc::clone(&breaker);
            let token = shutdown.clone();
            loops.spawn(async move { breaker.run(token).await });
        }
        if let Some(writer) = writer {
            let token = shutdown.clone();
            loops.spawn(async move { writer.run(token).await });
        }
        {
            let unified = Arc::clone(&unified);
            let token = shutdown.clone();
            loops.spawn(async move { unified.run(token).await });
        }
        if let Some(mut events_rx) = events {
            let token = shutdown.clone();
            loops.spawn(async move {
                loop {
                    tokio::select! {
                        () = token.cancelled() => return,
                        event = events_rx.recv() => {
                            match event {
                                Some(event) => info!(
                                    pair = %event.pair.name,
                                    direction = ?event.direction,
                                    bid = event.bid,
                                    ask = event.ask,
                                    spread = event.spread,
                                    "arbitrage opportunity"
                                ),
                                None => return,
                            }
                        }
                    }
                }
            });
        }

        // Connect and subscribe.
        poly_transport.connect().await?;
        kalshi_transport.connect().await?;

        let poly_tokens: Vec<&str> = self
            .cfg
            .pairs
            .iter()
            .map(|p| p.poly_token_id.as_str())
            .collect();
        if !poly_tokens.is_empty() {
            poly_decoder.subscribe(&poly_tokens);
        }
        for pair in &self.cfg.pairs {
            kalshi_decoder.subscribe(&pair.kalshi_ticker);
        }

        {
            let token = shutdown.clone();
            loops.spawn(async move { poly_decoder.run(token).await });
        }
        {
            let token = shutdown.clone();
            loops.spawn(async move { kalshi_decoder.run(token).await });
        }

        info!(pairs = self.cfg.pairs.len(), "pipeline running");
        shutdown.cancelled().await;

        poly_transport.close();
        kalshi_transport.close();
        self.tunnels.close_all();
        while loops.join_next().await.is_some() {}
        info!("pipeline stopped");
        Ok(())
    }

    /// Build the execution engine against the live cache and the local
    /// signer socket. The cockpit drives the returned engine; the
    /// pipeline itself never places orders.
    pub async fn build_execution_engine(
        &self,
        breaker: Arc<CircuitBreaker>,
    ) -> AppResult<ExecutionEngine<RedisCache, SignerClient, TunnelManager>> {
        let cache = RedisCache::connect(&self.cfg.cache.url()).await?;
        let signer = SignerClient::connect(&self.cfg.signer.socket_path)
            .await
            .map_err(AppError::SignerClient)?;

        Ok(ExecutionEngine::new(
            Arc::new(cache),
            breaker,
            Arc::new(signer),
            self.tunnels(),
            EngineConfig::default(),
        ))
    }
}
