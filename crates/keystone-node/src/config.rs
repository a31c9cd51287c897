use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use keystone_consensus::ConsensusConfig;
use keystone_core::{GenesisConfig, NodeKey, ValidatorId};
use serde::{Deserialize, Serialize};

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Chain ID
    pub chain_id: u64,

    /// Round 0 timeout in milliseconds; later rounds back off exponentially
    pub round_timeout_ms: u64,

    /// Upper bound on the per-round timeout in milliseconds
    pub max_round_timeout_ms: u64,

    /// Genesis configuration
    pub genesis: GenesisConfigFile,

    /// Validator private keys (hex). All validators of the local network run
    /// in-process, so every key is listed here.
    pub validator_keys: Vec<String>,
}

/// Genesis configuration for file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenesisConfigFile {
    pub timestamp: u64,
    /// Validator identities (hex)
    pub validators: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            chain_id: 1,
            round_timeout_ms: 1000,
            max_round_timeout_ms: 60_000,
            genesis: GenesisConfigFile::default(),
            validator_keys: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Load config from file
    pub fn load(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &PathBuf) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Convert genesis config to core type
    pub fn to_genesis_config(&self) -> Result<GenesisConfig> {
        let validators: Result<Vec<ValidatorId>> = self
            .genesis
            .validators
            .iter()
            .map(|s| ValidatorId::from_hex(s).map_err(|e| anyhow::anyhow!(e)))
            .collect();

        Ok(GenesisConfig {
            chain_id: self.chain_id,
            timestamp: self.genesis.timestamp,
            validators: validators?,
        })
    }

    pub fn consensus_config(&self) -> ConsensusConfig {
        ConsensusConfig {
            base_round_timeout: Duration::from_millis(self.round_timeout_ms),
            max_round_timeout: Duration::from_millis(self.max_round_timeout_ms),
        }
    }

    /// Parse the validator signing keys
    pub fn node_keys(&self) -> Result<Vec<NodeKey>> {
        if self.validator_keys.len() < 2 {
            bail!("at least two validator keys are required");
        }
        self.validator_keys
            .iter()
            .map(|s| NodeKey::from_hex(s).map_err(|e| anyhow::anyhow!(e)))
            .collect()
    }
}

/// Generate a configuration with freshly generated validator keys
pub fn generate_sample_config(validators: usize) -> NodeConfig {
    let keys: Vec<NodeKey> = (0..validators).map(|_| NodeKey::generate()).collect();

    NodeConfig {
        chain_id: 1,
        round_timeout_ms: 1000,
        max_round_timeout_ms: 60_000,
        genesis: GenesisConfigFile {
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            validators: keys.iter().map(|k| k.validator_id().to_hex()).collect(),
        },
        validator_keys: keys.iter().map(|k| k.to_hex()).collect(),
    }
}
