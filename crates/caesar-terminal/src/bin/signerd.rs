//! Caesar signer daemon.
//!
//! Holds the session key in a sealed region and serves signing
//! requests over the local filesystem socket. Runs with no network
//! listener; deploy with the IPC_LOCK capability so key pages can be
//! locked against swap.
//!
//! Sessions are activated by the external secrets backend handing
//! decrypted key bytes to the daemon. For development, a session can
//! be pre-activated from `CAESAR_SIGNER_DEV_KEY_HEX` and
//! `CAESAR_SIGNER_DEV_MAX_NOTIONAL`.

use alloy::primitives::U256;
use anyhow::{Context, Result};
use caesar_signer::{SessionManager, SignerServer};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Caesar signer daemon: session-keyed EIP-712 signing over a local socket.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (also settable via CAESAR_CONFIG).
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    caesar_telemetry::init_logging()?;

    let cfg = caesar_terminal::Config::load(args.config.as_deref())?;
    info!(
        env = %cfg.env,
        socket = %cfg.signer.socket_path,
        ttl_sec = cfg.signer.session_ttl_seconds,
        "caesar signer starting"
    );

    let session = Arc::new(SessionManager::new(Duration::from_secs(
        cfg.signer.session_ttl_seconds,
    )));

    activate_dev_session(&session)?;

    let server = SignerServer::bind(&cfg.signer.socket_path, Arc::clone(&session))
        .context("failed to bind signer socket")?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    let result = server.serve(shutdown).await;

    // Wipe the sealed region before the process exits.
    session.destroy();
    result.context("signer server error")?;

    info!("caesar signer stopped");
    Ok(())
}

/// Development-only session bootstrap from the environment. Production
/// sessions arrive through the secrets backend.
fn activate_dev_session(session: &SessionManager) -> Result<()> {
    let key_hex = match std::env::var("CAESAR_SIGNER_DEV_KEY_HEX") {
        Ok(value) => value,
        Err(_) => return Ok(()),
    };

    warn!("activating development session from environment key");
    let key_bytes = Zeroizing::new(
        hex::decode(key_hex.trim().trim_start_matches("0x"))
            .context("invalid CAESAR_SIGNER_DEV_KEY_HEX")?,
    );

    let max_notional = std::env::var("CAESAR_SIGNER_DEV_MAX_NOTIONAL")
        .ok()
        .and_then(|v| v.parse::<U256>().ok())
        .unwrap_or_else(|| U256::from(1_000_000_000u64));

    let address = session
        .activate(&key_bytes, max_notional)
        .context("failed to activate development session")?;
    info!(address = %address, "development session active");
    Ok(())
}
