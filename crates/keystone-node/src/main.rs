use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod chain;
mod cli;
mod config;
mod node;

use cli::{Cli, Commands};
use config::{generate_sample_config, NodeConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, blocks } => {
            run_network(config, blocks).await?;
        }
        Commands::Init { output, validators } => {
            init_config(output, validators)?;
        }
        Commands::Keygen { output } => {
            generate_keypair(output)?;
        }
    }

    Ok(())
}

/// Run a local validator network
async fn run_network(config_path: PathBuf, blocks: u64) -> Result<()> {
    info!("Loading configuration from {:?}", config_path);

    let config = if config_path.exists() {
        NodeConfig::load(&config_path)?
    } else {
        error!(
            "Configuration file not found: {:?}. Run 'keystone init' to create one.",
            config_path
        );
        return Err(anyhow::anyhow!("Configuration file not found"));
    };

    let keys = config.node_keys()?;
    let genesis = config.to_genesis_config()?;
    node::run_network(keys, genesis, config.consensus_config(), blocks).await
}

/// Initialize a new network configuration
fn init_config(output: PathBuf, validators: usize) -> Result<()> {
    info!("Generating configuration for {} validators", validators);

    let config = generate_sample_config(validators);
    config.save(&output)?;

    info!("Configuration saved to {:?}", output);
    for id in &config.genesis.validators {
        info!("  Validator: {}", id);
    }

    println!("\nConfiguration file created: {}", output.display());
    println!("\nTo start the network, run:");
    println!("  keystone run --config {} --blocks 10", output.display());

    Ok(())
}

/// Generate a new validator keypair
fn generate_keypair(output: Option<PathBuf>) -> Result<()> {
    let key = keystone_core::NodeKey::generate();

    println!("Generated new validator key:");
    println!("  Validator ID: {}", key.validator_id());

    if let Some(path) = output {
        std::fs::write(&path, key.to_hex())?;
        info!("Secret key saved to {:?}", path);
    } else {
        println!("  Secret key:   {}", key.to_hex());
    }

    println!("\nWARNING: Keep your secret key safe! Do not share it with anyone.");

    Ok(())
}
