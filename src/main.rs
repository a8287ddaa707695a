use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shutterman::bridge::{self, Bridge};
use shutterman::config::Config;
use shutterman::mcp23017::Devices;
use shutterman::wiring;

mod cli;

/// # Shutterman
/// Drives relay operated shutters and serves remote control over websockets.
///
/// Ctrl+C cancels every move in flight, settles each shutter on its estimated
/// position and releases the expanders before exiting.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = cli::Opts::parse();

    let config = Config::load(&opts.config)
        .with_context(|| format!("failed to load config from {}", opts.config.display()))?;

    let level = opts.log_level.as_deref().unwrap_or(&config.log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();

    info!(
        config = %opts.config.display(),
        shutters = config.shutters.len(),
        "configuration loaded"
    );

    let devices = Arc::new(Devices::new(config.drivers.relay.mcp23017.clone()));
    let shutters = wiring::build_shutters(&config, &devices)
        .await
        .context("failed to set up shutters")?;

    let scope = CancellationToken::new();
    let on_signal = scope.clone();
    ctrlc::set_handler(move || {
        info!("received Ctrl+C");
        on_signal.cancel();
    })
    .context("failed to set Ctrl+C handler")?;

    let address: IpAddr = match opts.address {
        Some(address) => address,
        None => config
            .bridge
            .address
            .parse()
            .with_context(|| format!("invalid bridge address {}", config.bridge.address))?,
    };
    let port = opts.port.unwrap_or(config.bridge.port);

    let routes = bridge::routes(Bridge::new(shutters.clone()), scope.clone());
    let shutdown = scope.clone();
    let (addr, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(SocketAddr::new(address, port), async move {
            shutdown.cancelled().await
        })
        .context("failed to bind websocket server")?;

    info!(%addr, "websocket ready");
    server.await;

    info!("shutting down");
    for shutter in &shutters {
        if let Err(e) = shutter.stop(&scope).await {
            error!(shutter = %shutter.name(), "stop failed: {}", e);
        }
        info!(
            shutter = %shutter.name(),
            state = %shutter.state(),
            position = shutter.position(),
            "final position"
        );
    }
    info!(expanders = devices.opened(), "releasing expanders");
    devices.shutdown();

    Ok(())
}
