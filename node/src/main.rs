use std::net::SocketAddrV4;
use std::sync::Arc;

use clap::Parser;
use log::LevelFilter;
use net::clock::SystemClock;
use net::config::Config;
use net::chain::NullChain;
use net::engine::Engine;
use net::wire::node::Network;
use simple_logger::SimpleLogger;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Initial peer addresses to seed the candidate registry with, e.g. -p 127.0.0.1:18445
    #[arg(short = 'p', long = "peer")]
    peers: Vec<SocketAddrV4>,

    /// Which network's magic bytes to speak
    #[arg(long, value_enum, default_value = "mainnet")]
    network: NetworkArg,

    /// Maximum number of simultaneous outgoing connections outside IBD mode
    #[arg(long)]
    max_outgoing: Option<usize>,

    /// Port the admin control listener binds to
    #[arg(long)]
    admin_port: Option<u16>,
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
enum NetworkArg {
    Mainnet,
    Testnet3,
    Regtest,
}

impl From<NetworkArg> for Network {
    fn from(value: NetworkArg) -> Self {
        match value {
            NetworkArg::Mainnet => Network::Mainnet,
            NetworkArg::Testnet3 => Network::Testnet3,
            NetworkArg::Regtest => Network::Regtest,
        }
    }
}

fn init_logging() {
    SimpleLogger::new()
        .with_colors(true)
        .with_level(LevelFilter::Info)
        .with_local_timestamps()
        .init()
        .unwrap();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::io::Result<()> {
    init_logging();
    let args = Args::parse();

    let mut config = Config {
        network: args.network.into(),
        ..Config::default()
    };
    if let Some(max_outgoing) = args.max_outgoing {
        config.max_outgoing = max_outgoing;
    }
    if let Some(admin_port) = args.admin_port {
        config.admin_port = admin_port;
    }

    let slot_count = config.max_outgoing_for(true).max(config.max_outgoing_for(false)).min(args.peers.len().max(1));
    let mut engine = Engine::new(config, Box::new(NullChain::default()), Arc::new(SystemClock), slot_count).await?;
    engine.seed_candidates(args.peers);

    log::info!("engine starting, waiting for admin KILL or autoexit to stop");
    tokio::select! {
        _ = engine.run() => {}
        _ = tokio::signal::ctrl_c() => {
            log::info!("ctrl-c received, shutting down");
        }
    }

    Ok(())
}
