use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use log::LevelFilter;
use simple_logger::SimpleLogger;
use tokio::io;
use tokio::time::{timeout, Duration};

use net::checkpoint::CheckpointStore;
use net::wire::node::{Chain, NodeDesc, NodeService, NodeServiceSet};

use crate::checkpoint_file::FileCheckpointStore;
use crate::node::Node;
use crate::presenter_log::LogPresenter;

mod checkpoint_file;
mod node;
mod presenter_log;

const BITCOIN_PROTOCOL_VERSION: i32 = 70016; // matches bitcoin core v24

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Remote IP socket address. E.g. 127.0.0.1:18445 for a local regression testnet node
    #[arg(short, long)]
    remote: SocketAddr,

    /// Which network to speak to
    #[arg(short, long, value_enum, default_value_t = CliChain::Regtest)]
    chain: CliChain,

    /// Where the chain-tip checkpoint (height + last header hash) is persisted between runs
    #[arg(long, default_value = "checkpoint.dat")]
    checkpoint_file: PathBuf,

    /// Hex-encoded public-key hash to watch for via the Bloom filter; may be given multiple times
    #[arg(short, long = "watch")]
    watch_items: Vec<String>,

    /// How long to wait for the full handshake + header sync to reach the chain tip
    #[arg(long, default_value_t = 30)]
    sync_timeout_secs: u64,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum CliChain {
    Mainnet,
    Testnet3,
    Regtest,
}

impl From<CliChain> for Chain {
    fn from(chain: CliChain) -> Self {
        match chain {
            CliChain::Mainnet => Chain::Mainnet,
            CliChain::Testnet3 => Chain::Testnet3,
            CliChain::Regtest => Chain::Regtest,
        }
    }
}

fn init_logging() {
    SimpleLogger::new()
        .with_colors(true)
        .with_level(LevelFilter::Debug)
        .with_local_timestamps()
        .init()
        .unwrap();
}

fn parse_watch_items(args: &[String]) -> io::Result<Vec<Vec<u8>>> {
    args.iter()
        .map(|hex_str| hex::decode(hex_str).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e)))
        .collect()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> io::Result<()> {
    init_logging();
    let args = Args::parse();

    let chain: Chain = args.chain.into();
    let watch_items = parse_watch_items(&args.watch_items)?;

    let checkpoint_store: Arc<dyn CheckpointStore> = Arc::new(FileCheckpointStore::new(&args.checkpoint_file));
    let presenter = Arc::new(LogPresenter);

    let local = NodeDesc {
        chain,
        protocol_version: BITCOIN_PROTOCOL_VERSION,
        services: NodeServiceSet(vec![NodeService::NodeBloom]),
        sub_ver: "/spv_client.bitmagier:1.0".to_string(),
        start_height: 0,
    };

    let node = Node::new(local, checkpoint_store, presenter, watch_items);

    let sync_timeout = Duration::from_secs(args.sync_timeout_secs);
    match timeout(sync_timeout, node.connect_with(args.remote)).await {
        Ok(Ok(())) => {
            log::info!("conversation with {} ended", args.remote);
        }
        Ok(Err(err)) => {
            log::warn!("error while communicating with {}: {}", args.remote, err);
        }
        Err(_) => {
            log::warn!("session timed out before it finished on its own");
        }
    }

    Ok(())
}
