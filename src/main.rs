// SPDX-FileCopyrightText: 2022 DCsunset
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use clap::Parser;
use log::info;

use chord_rust::core::Config;
use chord_rust::ChordHandle;

/// Run a single Chord ring node.
#[derive(Parser, Debug)]
#[command(name = "chord-rust", about = "Chord DHT routing node")]
struct Cli {
    /// Address to bind the RPC listener to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the RPC listener to.
    #[arg(long)]
    port: u16,

    /// `host:port` of an existing ring member to join.
    #[arg(long)]
    join: Option<String>,

    /// Stabilization interval, in seconds.
    #[arg(long, default_value_t = 1)]
    stabilize_interval_secs: u64,

    /// Disable the background stabilizer (routing-only / test mode).
    #[arg(long)]
    no_stabilizer: bool,

    /// Multiplier applied to the stabilization interval for the RPC
    /// deadline.
    #[arg(long, default_value_t = 2)]
    rpc_timeout_multiplier: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = Config {
        host: cli.host,
        port: cli.port,
        join: cli.join,
        stabilize_interval_secs: cli.stabilize_interval_secs,
        stabilizer_enabled: !cli.no_stabilizer,
        rpc_timeout_multiplier: cli.rpc_timeout_multiplier,
    };

    let handle = ChordHandle::start(config).await?;
    info!("Node {} up", handle.node().descriptor());

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    handle.stop().await?;
    Ok(())
}
