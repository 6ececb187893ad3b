//! Extend the local chain with generated blocks.

use super::chain_db_path;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use forgechain_chain::{make_chain, setup_genesis_block, BlockChain, EventHub};
use forgechain_consensus::Faker;
use forgechain_storage::{KeyValueStore, Storage};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args)]
pub struct MakechainArgs {
    /// Directory to store blockchain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Number of blocks to add
    #[arg(short = 'n', long, default_value = "10")]
    count: usize,
}

/// Generated blocks carry empty seals; only nodes running with fake or
/// test proof-of-work accept them.
pub fn run(args: MakechainArgs) -> Result<()> {
    let storage = Arc::new(
        Storage::open(chain_db_path(&args.data_dir))
            .with_context(|| "Failed to open storage. Did you run 'forgechain init'?")?,
    );
    let (config, _, _) = setup_genesis_block(&storage, None)?;
    let chain = BlockChain::new(
        storage.clone(),
        config,
        Arc::new(Faker::new()),
        Arc::new(EventHub::new()),
    )?;

    let head = chain.current_block();
    let blocks = make_chain(&chain, &head, args.count).context("Failed to generate blocks")?;
    chain.insert_chain(&blocks).context("Failed to import blocks")?;
    chain.stop();
    storage.close()?;

    let head = chain.current_block();
    println!(
        "{}  Added {} blocks, head is {} {}",
        "✓".green().bold(),
        blocks.len().to_string().bright_cyan(),
        format!("#{}", head.number()).bright_black(),
        head.hash().to_hex()[..16].bright_yellow()
    );
    Ok(())
}
