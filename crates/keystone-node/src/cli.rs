use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Keystone - a permissioned BFT blockchain node
#[derive(Parser)]
#[command(name = "keystone")]
#[command(about = "Keystone node and utilities")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a local validator network from a configuration file
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// Stop after finalizing this many blocks (0 = run forever)
        #[arg(short, long, default_value = "0")]
        blocks: u64,
    },

    /// Initialize a new network configuration
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,

        /// Number of validators to generate
        #[arg(short, long, default_value = "4")]
        validators: usize,
    },

    /// Generate a new validator keypair
    Keygen {
        /// Output file for secret key
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}
