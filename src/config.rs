//! Configuration management for chain5470

use crate::blockchain::{DEFAULT_CHAIN_ID, DEFAULT_DIFFICULTY_BITS};
use crate::error::{ChainError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub network: NetworkConfig,
    pub database: DatabaseConfig,
    pub miner: MinerConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    pub p2p_port: u16,
    pub api_port: u16,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MinerConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Checksummed hex address rewards are paid to. Required when mining is
    /// enabled.
    #[serde(default)]
    pub beneficiary_address: String,
}

#[derive(Debug, Deserialize)]
pub struct ConsensusConfig {
    #[serde(default = "default_difficulty_bits")]
    pub difficulty_bits: u32,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            difficulty_bits: default_difficulty_bits(),
        }
    }
}

fn default_chain_id() -> u64 {
    DEFAULT_CHAIN_ID
}

fn default_db_path() -> String {
    "./data/chain.db".to_string()
}

fn default_difficulty_bits() -> u32 {
    DEFAULT_DIFFICULTY_BITS
}

fn devnet_defaults() -> Config {
    Config {
        network: NetworkConfig {
            p2p_port: 5470,
            api_port: 8080,
            chain_id: default_chain_id(),
            bootstrap_peers: Vec::new(),
        },
        database: DatabaseConfig {
            path: default_db_path(),
        },
        miner: MinerConfig {
            enabled: false,
            beneficiary_address: String::new(),
        },
        consensus: ConsensusConfig::default(),
    }
}

pub fn load_config() -> Result<Config> {
    load_config_from("config.toml")
}

pub fn load_config_from<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config_str = fs::read_to_string(path).unwrap_or_default();
    let config: Config = if config_str.is_empty() {
        // Sane devnet defaults when the config file is absent
        devnet_defaults()
    } else {
        toml::from_str(&config_str)
            .map_err(|e| ChainError::Config(format!("failed to parse config: {}", e)))?
    };

    // Validate critical values
    if config.database.path.is_empty() {
        return Err(ChainError::Config(
            "database.path must be set".to_string(),
        ));
    }

    if config.miner.enabled && config.miner.beneficiary_address.is_empty() {
        return Err(ChainError::Config(
            "miner.beneficiary_address must be set when mining is enabled".to_string(),
        ));
    }

    if config.consensus.difficulty_bits == 0 || config.consensus.difficulty_bits > 255 {
        return Err(ChainError::Config(
            "consensus.difficulty_bits must be between 1 and 255".to_string(),
        ));
    }

    Ok(config)
}
