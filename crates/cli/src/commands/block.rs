//! Block operations command.

use super::chain_db_path;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use forgechain_core::Hash;
use forgechain_storage::{ChainStore, Storage};
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct BlockArgs {
    #[command(subcommand)]
    command: BlockCommand,
}

#[derive(Subcommand)]
enum BlockCommand {
    /// List recent blocks
    List {
        /// Directory to store blockchain data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Number of blocks to show
        #[arg(short, long, default_value = "10")]
        count: usize,
    },
    /// Show detailed block information
    Info {
        /// Directory to store blockchain data
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Block number or hash (hex format)
        block_id: String,
    },
}

pub fn run(args: BlockArgs) -> Result<()> {
    match args.command {
        BlockCommand::List { data_dir, count } => list_blocks(&data_dir, count),
        BlockCommand::Info { data_dir, block_id } => show_block_info(&data_dir, &block_id),
    }
}

fn open(data_dir: &Path) -> Result<Storage> {
    Storage::open(chain_db_path(data_dir))
        .with_context(|| "Failed to open storage. Did you run 'forgechain init'?")
}

fn list_blocks(data_dir: &Path, count: usize) -> Result<()> {
    let storage = open(data_dir)?;
    let chain = ChainStore::new(&storage);
    let head = chain.get_head_block()?.context("Chain has no head block")?;
    let head_number = head.number();

    println!();
    println!("{}", "Recent Blocks:".bold().cyan());
    println!();

    let start = head_number.saturating_sub(count.saturating_sub(1) as u64);
    for block in chain.get_blocks_range(start, head_number)?.iter().rev() {
        println!(
            "  {} {} {} {}",
            format!("#{}", block.number()).bright_black(),
            block.hash().to_hex()[..16].bright_yellow(),
            format!("diff {}", block.difficulty()).bright_black(),
            format!("({} txs)", block.transactions.len()).bright_black()
        );
    }

    println!();
    Ok(())
}

fn show_block_info(data_dir: &Path, block_id: &str) -> Result<()> {
    let storage = open(data_dir)?;
    let chain = ChainStore::new(&storage);

    // Try parsing as a number first, then as a hash
    let block = if let Ok(number) = block_id.parse::<u64>() {
        chain
            .get_block_by_number(number)?
            .context("Block not found")?
    } else {
        let hash = Hash::from_hex(block_id)
            .with_context(|| format!("Invalid block hash: {}", block_id))?;
        chain.get_block_by_hash(&hash)?.context("Block not found")?
    };
    let header = &block.header;

    println!();
    println!("{}", "Block Information:".bold().cyan());
    println!();
    println!("  Number:       {}", header.number.to_string().bright_cyan());
    println!("  Hash:         {}", block.hash().to_hex().bright_yellow());
    println!("  Parent Hash:  {}", header.parent_hash.to_hex().bright_black());
    println!("  State Root:   {}", header.state_root.to_hex().bright_black());
    println!("  Coinbase:     {}", header.coinbase.to_hex().bright_black());
    println!("  Timestamp:    {}", header.timestamp.to_string().bright_black());
    println!("  Difficulty:   {}", header.difficulty.to_string().bright_cyan());
    println!(
        "  Total Diff:   {}",
        block.total_difficulty.to_string().bright_cyan()
    );
    println!(
        "  Gas:          {} / {}",
        header.gas_used.to_string().bright_cyan(),
        header.gas_limit
    );
    println!("  Nonce:        {}", header.nonce.to_string().bright_black());
    println!(
        "  Transactions: {}",
        block.transactions.len().to_string().bright_cyan()
    );
    println!();

    if !block.transactions.is_empty() {
        println!("{}", "Transactions:".bold());
        println!();
        for (i, tx) in block.transactions.iter().enumerate() {
            println!(
                "  {} {} {} → {}",
                format!("{}.", i + 1).bright_black(),
                tx.hash().to_hex()[..16].bright_yellow(),
                tx.from.to_hex().bright_black(),
                tx.to.to_hex().bright_black()
            );
        }
        println!();
    }

    Ok(())
}
