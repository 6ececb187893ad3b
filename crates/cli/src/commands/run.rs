//! Run a full node.

use super::load_config;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use forgechain_core::Address;
use forgechain_node::{NetworkServer, Node, ServiceContext, SyncMode};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::info;

#[derive(Args)]
pub struct RunArgs {
    /// Directory to store blockchain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Config file (defaults to <data-dir>/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sync mode: full or fast
    #[arg(long)]
    sync_mode: Option<SyncMode>,

    /// Network identifier
    #[arg(long)]
    network_id: Option<u64>,

    /// Maximum number of peers
    #[arg(long, default_value = "25")]
    max_peers: usize,

    /// Start mining right away
    #[arg(long)]
    mine: bool,

    /// Mining reward address (hex)
    #[arg(long)]
    etherbase: Option<String>,

    /// Accept every seal (development chains)
    #[arg(long)]
    fake_pow: bool,

    /// Use the test proof-of-work engine
    #[arg(long)]
    test_pow: bool,

    /// Stop once the head reaches this block
    #[arg(long)]
    exit_at: Option<u64>,
}

/// How often `--exit-at` checks the head.
const HEAD_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub fn run(args: RunArgs) -> Result<()> {
    let mut config = load_config(&args.data_dir, args.config.as_deref())?;
    if let Some(mode) = args.sync_mode {
        config.sync_mode = mode;
    }
    if let Some(id) = args.network_id {
        config.network_id = id;
    }
    if let Some(hex) = &args.etherbase {
        config.etherbase = Address::from_hex(hex)
            .with_context(|| format!("Invalid etherbase address: {}", hex))?;
    }
    config.pow_fake |= args.fake_pow;
    config.pow_test |= args.test_pow;

    let ctx = ServiceContext::new(config.data_dir.clone());
    let node = Node::new(&ctx, config).context("Failed to start node")?;
    node.start(&NetworkServer::new("forgechain", args.max_peers))?;

    let head = node.blockchain().current_block();
    println!();
    println!("{}", "Node running".bold().cyan());
    println!("  Engine:  {}", node.engine().name().bright_cyan());
    println!(
        "  Head:    {} {}",
        format!("#{}", head.number()).bright_black(),
        head.hash().to_hex()[..16].bright_yellow()
    );
    println!("  Network: {}", node.net_version().to_string().bright_cyan());
    println!();

    if args.mine {
        node.start_mining(true)?;
        info!(etherbase = %node.etherbase()?, "Mining requested");
    }

    match args.exit_at {
        Some(target) => {
            while node.blockchain().current_block().number() < target {
                thread::sleep(HEAD_POLL_INTERVAL);
            }
            node.stop();
        }
        None => node.wait_for_shutdown(),
    }

    let head = node.blockchain().current_block();
    println!(
        "{}  Stopped at block {}",
        "✓".green().bold(),
        head.number().to_string().bright_cyan()
    );
    Ok(())
}
