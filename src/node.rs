//! Node orchestrator: wires config, storage, the chain engine, gossip, the
//! API server and the miner into one process with a deterministic startup
//! order.

use crate::api;
use crate::blockchain::{Blockchain, ChainParams};
use crate::config::{load_config_from, Config};
use crate::crypto::{Address, KeyPair};
use crate::error::{ChainError, Result};
use crate::gate::AcceptAll;
use crate::network::NetworkNode;
use crate::persistence::{MemoryStore, Persistence, SqliteStore};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Booting,
    Syncing,
    Ready,
    Degraded,
}

pub struct Node {
    pub config: Config,
    pub blockchain: Arc<RwLock<Blockchain>>,
    pub network: Arc<NetworkNode>,
    pub state: Arc<RwLock<NodeState>>,
}

fn open_store(config: &Config) -> Box<dyn Persistence> {
    match SqliteStore::open(&config.database.path) {
        Ok(store) => Box::new(store),
        Err(e) => {
            warn!(
                "failed to open database at {}: {}. Falling back to in-memory storage.",
                config.database.path, e
            );
            Box::new(MemoryStore::new())
        }
    }
}

impl Node {
    pub async fn init(config_path: &str) -> Result<Self> {
        let config = load_config_from(config_path)?;

        let _ = tracing_subscriber::fmt::try_init();
        info!(
            chain_id = config.network.chain_id,
            "starting chain5470 node"
        );

        let db_path = Path::new(&config.database.path);
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let params = ChainParams {
            chain_id: config.network.chain_id,
            difficulty_bits: config.consensus.difficulty_bits,
            ..ChainParams::default()
        };

        let store = open_store(&config);
        let blockchain = match Blockchain::load(params.clone(), store, Box::new(AcceptAll)) {
            Ok(chain) => chain,
            Err(e) => {
                warn!("no usable persisted chain ({}), creating a new one", e);
                let creator = Self::genesis_creator(&config)?;
                info!(creator = %creator, "issuing genesis supply");
                Blockchain::new_with_persistence(
                    params,
                    creator,
                    open_store(&config),
                    Box::new(AcceptAll),
                )?
            }
        };
        info!(height = blockchain.height(), "chain ready");

        let blockchain = Arc::new(RwLock::new(blockchain));
        let network = Arc::new(NetworkNode::new(Arc::clone(&blockchain)));
        let state = Arc::new(RwLock::new(NodeState::Booting));

        Ok(Self {
            config,
            blockchain,
            network,
            state,
        })
    }

    /// The address the genesis supply is issued to: the configured miner
    /// beneficiary when one is set, otherwise a throwaway devnet key.
    fn genesis_creator(config: &Config) -> Result<Address> {
        if config.miner.beneficiary_address.is_empty() {
            let keypair = KeyPair::generate()?;
            warn!(
                address = %keypair.address(),
                "no beneficiary configured, generated a throwaway genesis key"
            );
            // Key material stays out of the log stream; print it once so the
            // operator can recover the devnet supply.
            println!(
                "throwaway genesis secret key: {}",
                hex::encode(keypair.secret_key_bytes())
            );
            Ok(keypair.address())
        } else {
            Address::from_str(&config.miner.beneficiary_address)
                .map_err(|e| ChainError::Config(format!("bad beneficiary address: {}", e)))
        }
    }

    pub async fn start(self: Arc<Self>) -> Result<()> {
        // Gossip listener first, so bootstrap dials have something to talk back to.
        let network = Arc::clone(&self.network);
        let p2p_port = self.config.network.p2p_port;
        tokio::spawn(async move {
            if let Err(e) = network.start_server(p2p_port).await {
                error!("p2p server failed: {}", e);
            }
        });
        tokio::time::sleep(Duration::from_millis(200)).await;

        *self.state.write().await = NodeState::Syncing;
        for peer in &self.config.network.bootstrap_peers {
            let network = Arc::clone(&self.network);
            if let Err(e) = network.connect_peer(peer.clone()).await {
                warn!(peer = %peer, "bootstrap connection failed: {}", e);
            }
        }

        let api_node = Arc::new(api::Node::new_shared(
            Arc::clone(&self.blockchain),
            Arc::clone(&self.network),
            Some(Arc::clone(&self.state)),
        ));
        let api_port = self.config.network.api_port;
        let api_handle = Arc::clone(&api_node);
        tokio::spawn(async move {
            if let Err(e) = api::run_api_server(api_handle, Some(api_port)).await {
                error!("api server failed: {}", e);
            }
        });

        // The local chain was validated during load; with bootstrap dials in
        // flight, catch-up happens through gossip while we serve.
        *self.state.write().await = NodeState::Ready;

        if self.config.miner.enabled {
            let beneficiary =
                Address::from_str(&self.config.miner.beneficiary_address).map_err(|e| {
                    ChainError::Config(format!("bad beneficiary address: {}", e))
                })?;
            api_node
                .start_mining(beneficiary)
                .await
                .map_err(|e| ChainError::Config(format!("could not start miner: {:?}", e)))?;
        }

        loop {
            let height = self.blockchain.read().await.height();
            let peers = self.network.peer_count().await;
            info!(height, peers, "node running");
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
    }
}
