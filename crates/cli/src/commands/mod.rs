//! CLI commands module.

use anyhow::{Context, Result};
use clap::Subcommand;
use forgechain_node::NodeConfig;
use std::path::{Path, PathBuf};

mod block;
mod init;
mod makechain;
mod run;

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new chain
    Init(init::InitArgs),
    /// Run a full node
    Run(run::RunArgs),
    /// Extend the local chain with generated blocks (fake proof-of-work)
    Makechain(makechain::MakechainArgs),
    /// Block operations
    Block(block::BlockArgs),
}

pub fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init(args) => init::run(args),
        Commands::Run(args) => run::run(args),
        Commands::Makechain(args) => makechain::run(args),
        Commands::Block(args) => block::run(args),
    }
}

/// Name of the node config file inside a data directory.
const CONFIG_FILE: &str = "config.json";

/// Where the chain database lives inside a data directory.
pub(crate) fn chain_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("chaindata")
}

/// The config at `explicit`, else `<data_dir>/config.json`, else defaults.
/// The data directory always wins over the one in the file.
pub(crate) fn load_config(data_dir: &Path, explicit: Option<&Path>) -> Result<NodeConfig> {
    let default_path = data_dir.join(CONFIG_FILE);
    let path = explicit.unwrap_or(&default_path);
    let mut config = if path.exists() {
        NodeConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?
    } else {
        NodeConfig::default()
    };
    config.data_dir = Some(data_dir.to_path_buf());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path(), None).unwrap();
        assert_eq!(config.data_dir.as_deref(), Some(dir.path()));
        assert_eq!(config.network_id, NodeConfig::default().network_id);

        let saved = NodeConfig {
            network_id: 42,
            data_dir: Some(PathBuf::from("/elsewhere")),
            ..Default::default()
        };
        saved.save(dir.path().join(CONFIG_FILE)).unwrap();
        let config = load_config(dir.path(), None).unwrap();
        assert_eq!(config.network_id, 42);
        assert_eq!(config.data_dir.as_deref(), Some(dir.path()));
    }
}
