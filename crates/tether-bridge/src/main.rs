use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use tether_bridge::{Bridge, BridgeConfig, CommandRouter, DispatchError, EventBus};

/// Command answered by the stock binary: returns its payload unchanged.
const PING_COMMAND: u32 = 0;

#[derive(Parser)]
#[command(name = "tether-bridge", about = "Auto-reconnecting RPC bridge to a remote controller")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/tether/bridge.toml")]
    config: PathBuf,

    /// Reconnects after the first attempt (negative retries forever)
    #[arg(long, allow_negative_numbers = true)]
    retry_count: Option<i32>,
}

async fn ping(payload: Vec<u8>) -> Result<Vec<u8>, DispatchError> {
    Ok(payload)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match BridgeConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config from {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };

    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tether_bridge::logging::init_json(&config.logging.level);
    } else {
        tether_bridge::logging::init(&config.logging.level);
    }

    let events = Arc::new(EventBus::default());
    let commands = Arc::new(CommandRouter::new().route(PING_COMMAND, ping));

    let mut bridge = match Bridge::new(&config, events, commands) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    if let Some(retry_count) = cli.retry_count {
        bridge = bridge.with_retry_count(retry_count);
    }

    let handle = bridge.shutdown_handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received SIGINT, shutting down");
        handle.shutdown();
    });

    if let Err(e) = bridge.start().await {
        tracing::error!("failed to start bridge: {e}");
        std::process::exit(1);
    }

    bridge.run().await;
    bridge.shutdown().await;
}
