use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use git_version::git_version;

const GIT_VERSION: &str = git_version!(fallback = "unknown");

/// Websocket controller for relay driven shutters.
#[derive(Parser)]
#[clap(name = "Shutterman", version = GIT_VERSION)]
pub struct Opts {
    #[clap(short, long, default_value = "shutterman.toml")]
    pub config: PathBuf,

    /// Overrides bridge.address from the config
    #[clap(long)]
    pub address: Option<IpAddr>,

    /// Overrides bridge.port from the config
    #[clap(long)]
    pub port: Option<u16>,

    /// Overrides log_level from the config; RUST_LOG wins over both
    #[clap(short, long)]
    pub log_level: Option<String>,
}
