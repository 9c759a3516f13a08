//! Caesar trading terminal entry point.

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Caesar trading terminal: unified Polymarket + Kalshi execution.
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
    info!(env = %cfg.env, pairs = cfg.pairs.len(), "caesar terminal starting");

    let app = caesar_terminal::Application::new(cfg);
    let shutdown = CancellationToken::new();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    app.run(shutdown).await?;
    info!("caesar terminal stopped");
    Ok(())
}
