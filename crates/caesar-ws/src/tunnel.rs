//! Private, authenticated WebSocket tunnels.
//!
//! A tunnel is a per-(user, venue) session with its own dedicated
//! transport and venue auth headers. Isolation is structural: each
//! tunnel's frame subscription is its own channel, so one user's frames
//! are never observable through another user's handle.

use crate::error::{WsError, WsResult};
use crate::transport::{WsConfig, WsTransport};
use caesar_core::Venue;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tracing::{debug, info};

/// Parameters needed to open a private tunnel.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub user_id: String,
    pub venue: Venue,
    pub url: String,
    /// Venue auth headers (RSA-PSS for Kalshi, wallet auth for Polymarket).
    pub headers: Vec<(String, String)>,
}

/// Future IP rotation hook to spread connections across source
/// addresses or proxies. Not required for correctness.
pub trait IpPool: Send + Sync {
    /// Next outbound address or proxy URL to use.
    fn next_source(&self) -> String;
}

/// A private, authenticated WebSocket session for a single user on a
/// single venue. Credentials are held in memory only.
pub struct Tunnel {
    user_id: String,
    venue: Venue,
    transport: Arc<WsTransport>,
    frames: TokioMutex<Option<mpsc::Receiver<Vec<u8>>>>,
}

impl Tunnel {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn venue(&self) -> Venue {
        self.venue
    }

    /// Take the inbound frame stream. Yields `None` after the first
    /// call; the tunnel owner is the only reader.
    pub async fn take_frames(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.frames.lock().await.take()
    }

    /// Enqueue a frame on this tunnel's connection.
    pub fn send(&self, frame: String) {
        self.transport.send(frame);
    }

    fn close(&self) {
        self.transport.close();
    }
}

type TunnelKey = (String, Venue);

/// Manages private tunnels keyed strictly by (user, venue).
#[derive(Default)]
pub struct TunnelManager {
    tunnels: Mutex<HashMap<TunnelKey, Arc<Tunnel>>>,
    pool: Mutex<Option<Arc<dyn IpPool>>>,
}

impl TunnelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the IP rotation pool. Pass `None` to disable.
    pub fn set_ip_pool(&self, pool: Option<Arc<dyn IpPool>>) {
        *self.pool.lock() = pool;
    }

    /// The configured IP rotation pool, if any.
    pub fn ip_pool(&self) -> Option<Arc<dyn IpPool>> {
        self.pool.lock().clone()
    }

    /// Open a private tunnel. An existing tunnel for the same
    /// (user, venue) key is closed first.
    pub async fn open(&self, cfg: TunnelConfig) -> WsResult<Arc<Tunnel>> {
        let key = (cfg.user_id.clone(), cfg.venue);

        if let Some(prior) = self.tunnels.lock().remove(&key) {
            debug!(user_id = %key.0, venue = %key.1, "closing prior tunnel");
            prior.close();
        }

        let mut ws_cfg = WsConfig::new(&cfg.url)
            .with_label(format!("tunnel:{}:{}", cfg.user_id, cfg.venue));
        ws_cfg.headers = cfg.headers.clone();

        let transport = Arc::new(WsTransport::new(ws_cfg));
        // Subscribe before connect so the first authenticated frames
        // cannot be lost.
        let frames = transport.subscribe();
        transport.connect().await?;

        let tunnel = Arc::new(Tunnel {
            user_id: cfg.user_id.clone(),
            venue: cfg.venue,
            transport,
            frames: TokioMutex::new(Some(frames)),
        });

        if let Some(displaced) = self
            .tunnels
            .lock()
            .insert(key.clone(), Arc::clone(&tunnel))
        {
            // A concurrent open for the same key won the race; keep the
            // newest tunnel and tear the displaced one down.
            displaced.close();
        }

        info!(user_id = %cfg.user_id, venue = %cfg.venue, "tunnel opened");
        Ok(tunnel)
    }

    /// Active tunnel for the given user and venue, if any.
    pub fn get(&self, user_id: &str, venue: Venue) -> Option<Arc<Tunnel>> {
        self.tunnels
            .lock()
            .get(&(user_id.to_string(), venue))
            .cloned()
    }

    /// Enqueue a frame on the user's private tunnel.
    pub fn send(&self, user_id: &str, venue: Venue, frame: String) -> WsResult<()> {
        match self.get(user_id, venue) {
            Some(tunnel) => {
                tunnel.send(frame);
                Ok(())
            }
            None => Err(WsError::NoTunnel {
                user_id: user_id.to_string(),
                venue,
            }),
        }
    }

    /// Tear down the tunnel for the given user and venue.
    pub fn close(&self, user_id: &str, venue: Venue) {
        let removed = self
            .tunnels
            .lock()
            .remove(&(user_id.to_string(), venue));
        if let Some(tunnel) = removed {
            tunnel.close();
            info!(user_id, venue = %venue, "tunnel closed");
        }
    }

    /// Tear down every active tunnel.
    pub fn close_all(&self) {
        let drained: Vec<_> = self.tunnels.lock().drain().collect();
        for (_, tunnel) in drained {
            tunnel.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_on_empty_manager_is_none() {
        let manager = TunnelManager::new();
        assert!(manager.get("alice", Venue::Kalshi).is_none());
    }

    #[test]
    fn send_without_tunnel_errors() {
        let manager = TunnelManager::new();
        let err = manager
            .send("alice", Venue::Polymarket, "{}".to_string())
            .unwrap_err();
        assert!(matches!(err, WsError::NoTunnel { .. }));
    }
}
