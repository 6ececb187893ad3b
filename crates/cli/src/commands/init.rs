//! Initialize chain command.

use super::{chain_db_path, CONFIG_FILE};
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use forgechain_chain::{setup_genesis_block, Genesis};
use forgechain_node::NodeConfig;
use forgechain_storage::{ChainStore, KeyValueStore, Storage, BLOCKCHAIN_VERSION};
use std::fs;
use std::path::PathBuf;

#[derive(Args)]
pub struct InitArgs {
    /// Directory to store blockchain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Genesis file (JSON); the built-in genesis is used when omitted
    #[arg(short, long)]
    genesis: Option<PathBuf>,

    /// Use fake proof-of-work in the generated config
    #[arg(long)]
    fake_pow: bool,
}

pub fn run(args: InitArgs) -> Result<()> {
    println!("{}", "Initializing forgechain...".bold().cyan());
    println!();

    fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", args.data_dir))?;
    println!("{}  Created data directory", "✓".green().bold());

    let genesis: Option<Genesis> = match &args.genesis {
        Some(path) => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read genesis file: {}", path.display()))?;
            Some(serde_json::from_str(&contents).context("Invalid genesis file")?)
        }
        None => None,
    };

    let storage = Storage::open(chain_db_path(&args.data_dir))
        .with_context(|| "Failed to open storage")?;
    let (chain_config, genesis_hash, compat) = setup_genesis_block(&storage, genesis.as_ref())
        .context("Failed to write genesis block")?;
    ChainStore::new(&storage).write_blockchain_version(BLOCKCHAIN_VERSION)?;
    storage.close()?;

    println!();
    println!("{}  Genesis block ready", "✓".green().bold());
    println!("    Hash:     {}", genesis_hash.to_hex().bright_yellow());
    println!("    Chain ID: {}", chain_config.chain_id.to_string().bright_cyan());
    if let Some(compat) = compat {
        println!(
            "    {} {} (the node rewinds to block {} on start)",
            "!".yellow().bold(),
            compat,
            compat.rewind_to
        );
    }

    let config_file = args.data_dir.join(CONFIG_FILE);
    if config_file.exists() {
        println!(
            "{}  Keeping existing config: {}",
            "✓".green().bold(),
            config_file.display().to_string().bright_black()
        );
    } else {
        let config = NodeConfig {
            genesis,
            pow_fake: args.fake_pow,
            ..Default::default()
        };
        config.save(&config_file)?;
        println!(
            "{}  Saved config to: {}",
            "✓".green().bold(),
            config_file.display().to_string().bright_black()
        );
    }

    println!();
    println!("{}", "Chain initialized successfully!".green().bold());
    println!();
    println!("Next steps:");
    println!("  • Use {} to start a node", "forgechain run".bright_cyan());
    println!(
        "  • Use {} to explore blocks",
        "forgechain block list".bright_cyan()
    );

    Ok(())
}
