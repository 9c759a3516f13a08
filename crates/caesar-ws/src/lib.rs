//! Resilient WebSocket transport for the Caesar trading terminal.
//!
//! Provides:
//! - Automatic reconnection with bounded exponential backoff
//! - Heartbeat timeout detection (silence on the read side)
//! - Lock-free circuit state for the breaker
//! - Non-blocking fan-out of raw frames to subscribers
//! - Private per-(user, venue) tunnels with strict isolation

pub mod error;
pub mod transport;
pub mod tunnel;

pub use error::{WsError, WsResult};
pub use transport::{CircuitState, WsConfig, WsTransport};
pub use tunnel::{IpPool, Tunnel, TunnelConfig, TunnelManager};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
