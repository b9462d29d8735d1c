//! Peer gossip for chain5470.
//!
//! Newline-delimited JSON messages over TCP. Every inbound transaction and
//! block funnels through the same validation path as local submissions, so a
//! peer cannot inject anything the RPC surface would reject.

use crate::blockchain::{Block, Blockchain};
use crate::error::{ChainError, RejectReason, Result};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GossipMessage {
    Version { chain_id: u64, height: u64 },
    Verack { chain_id: u64, height: u64 },
    Ping,
    Pong,
    GetAddr,
    Addr { peers: Vec<String> },
    NewTransaction { transaction: Transaction },
    NewBlock { block: Block },
    GetChain { from_index: u64 },
    Chain { blocks: Vec<Block> },
}

type PeerMap = Arc<RwLock<HashMap<String, mpsc::UnboundedSender<GossipMessage>>>>;

pub struct NetworkNode {
    chain: Arc<RwLock<Blockchain>>,
    peers: PeerMap,
}

impl NetworkNode {
    pub fn new(chain: Arc<RwLock<Blockchain>>) -> Self {
        NetworkNode {
            chain,
            peers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn list_peers(&self) -> Vec<String> {
        self.peers.read().await.keys().cloned().collect()
    }

    /// Accepts inbound peers forever. Each connection gets its own task.
    pub async fn start_server(self: Arc<Self>, port: u16) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| ChainError::Network(format!("failed to bind p2p port {}: {}", port, e)))?;
        tracing::info!(port, "gossip listener started");

        loop {
            let (stream, addr) = listener
                .accept()
                .await
                .map_err(|e| ChainError::Network(format!("accept failed: {}", e)))?;
            let node = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = node.handle_connection(stream, addr.to_string()).await {
                    tracing::debug!(peer = %addr, "connection closed: {}", e);
                }
            });
        }
    }

    /// Dials a peer and runs the same message loop as for inbound
    /// connections, opening with a version handshake.
    pub async fn connect_peer(self: Arc<Self>, addr: String) -> Result<()> {
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| ChainError::Network(format!("failed to connect to {}: {}", addr, e)))?;

        let hello = {
            let chain = self.chain.read().await;
            GossipMessage::Version {
                chain_id: chain.params.chain_id,
                height: chain.height(),
            }
        };
        let node = Arc::clone(&self);
        tokio::spawn(async move {
            if let Err(e) = node.run_peer(stream, addr.clone(), Some(hello)).await {
                tracing::debug!(peer = %addr, "connection closed: {}", e);
            }
        });
        Ok(())
    }

    async fn handle_connection(&self, stream: TcpStream, addr: String) -> Result<()> {
        self.run_peer(stream, addr, None).await
    }

    async fn run_peer(
        &self,
        stream: TcpStream,
        addr: String,
        greeting: Option<GossipMessage>,
    ) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<GossipMessage>();
        self.peers.write().await.insert(addr.clone(), tx.clone());

        // Writer task: serializes outbound messages as one JSON line each.
        let writer_addr = addr.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let mut line = match serde_json::to_string(&msg) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!(peer = %writer_addr, "unserializable message: {}", e);
                        continue;
                    }
                };
                line.push('\n');
                if writer.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        if let Some(msg) = greeting {
            let _ = tx.send(msg);
        }

        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            let message: GossipMessage = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(e) => {
                    tracing::debug!(peer = %addr, "malformed gossip line: {}", e);
                    continue;
                }
            };
            for reply in self.handle_message(message, &addr).await? {
                if tx.send(reply).is_err() {
                    break;
                }
            }
        }

        self.peers.write().await.remove(&addr);
        writer_task.abort();
        Ok(())
    }

    /// Processes one inbound message and returns the replies owed to that
    /// peer. Rejected payloads are dropped with a log line; only protocol
    /// breaches (wrong chain) tear the connection down.
    pub async fn handle_message(
        &self,
        message: GossipMessage,
        from: &str,
    ) -> Result<Vec<GossipMessage>> {
        match message {
            GossipMessage::Version { chain_id, height } => {
                let chain = self.chain.read().await;
                if chain_id != chain.params.chain_id {
                    return Err(ChainError::Network(format!(
                        "peer {} is on chain {}, this chain is {}",
                        from, chain_id, chain.params.chain_id
                    )));
                }
                let mut replies = vec![GossipMessage::Verack {
                    chain_id: chain.params.chain_id,
                    height: chain.height(),
                }];
                if height > chain.height() {
                    replies.push(GossipMessage::GetChain {
                        from_index: chain.height(),
                    });
                }
                Ok(replies)
            }
            GossipMessage::Verack { chain_id, height } => {
                let chain = self.chain.read().await;
                if chain_id != chain.params.chain_id {
                    return Err(ChainError::Network(format!(
                        "peer {} is on chain {}, this chain is {}",
                        from, chain_id, chain.params.chain_id
                    )));
                }
                if height > chain.height() {
                    Ok(vec![GossipMessage::GetChain {
                        from_index: chain.height(),
                    }])
                } else {
                    Ok(Vec::new())
                }
            }
            GossipMessage::Ping => Ok(vec![GossipMessage::Pong]),
            GossipMessage::Pong => Ok(Vec::new()),
            GossipMessage::GetAddr => {
                let peers = self.list_peers().await;
                Ok(vec![GossipMessage::Addr { peers }])
            }
            GossipMessage::Addr { peers } => {
                tracing::debug!(peer = %from, count = peers.len(), "received peer addresses");
                Ok(Vec::new())
            }
            GossipMessage::NewTransaction { transaction } => {
                let mut chain = self.chain.write().await;
                match chain.submit_transaction(transaction) {
                    Ok(hash) => {
                        tracing::debug!(tx = %hex::encode(hash), peer = %from, "transaction via gossip");
                    }
                    Err(e) if e.is_rejection() => {
                        tracing::debug!(peer = %from, "gossiped transaction rejected: {}", e);
                    }
                    Err(e) => return Err(e),
                }
                Ok(Vec::new())
            }
            GossipMessage::NewBlock { block } => {
                block
                    .verify_integrity()
                    .map_err(|e| ChainError::Network(format!("peer {} sent bad block: {}", from, e)))?;
                let mut chain = self.chain.write().await;
                match chain.apply_block(block) {
                    Ok(()) => {
                        tracing::info!(height = chain.height(), peer = %from, "block via gossip");
                        Ok(Vec::new())
                    }
                    // A height gap means we are behind; ask for the missing range.
                    Err(ChainError::Rejected(RejectReason::BadHeight { expected, got }))
                        if got > expected =>
                    {
                        Ok(vec![GossipMessage::GetChain {
                            from_index: chain.height(),
                        }])
                    }
                    Err(e) if e.is_rejection() => {
                        tracing::debug!(peer = %from, "gossiped block rejected: {}", e);
                        Ok(Vec::new())
                    }
                    Err(e) => Err(e),
                }
            }
            GossipMessage::GetChain { from_index } => {
                let chain = self.chain.read().await;
                let blocks = chain
                    .blocks
                    .iter()
                    .filter(|b| b.index >= from_index)
                    .cloned()
                    .collect();
                Ok(vec![GossipMessage::Chain { blocks }])
            }
            GossipMessage::Chain { blocks } => {
                let mut chain = self.chain.write().await;
                for block in blocks {
                    if block.index != chain.height() {
                        continue; // only blocks extending the tip are applied
                    }
                    block.verify_integrity().map_err(|e| {
                        ChainError::Network(format!("peer {} sent bad block: {}", from, e))
                    })?;
                    match chain.apply_block(block) {
                        Ok(()) => {}
                        Err(e) if e.is_rejection() => {
                            tracing::debug!(peer = %from, "sync block rejected: {}", e);
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(Vec::new())
            }
        }
    }

    /// Sends a message to every connected peer. Dead channels are dropped by
    /// their connection tasks; a failed send here is not an error.
    pub async fn broadcast(&self, message: GossipMessage) {
        let peers = self.peers.read().await;
        for (addr, sender) in peers.iter() {
            if sender.send(message.clone()).is_err() {
                tracing::debug!(peer = %addr, "peer channel closed during broadcast");
            }
        }
    }

    pub async fn broadcast_block(&self, block: Block) {
        self.broadcast(GossipMessage::NewBlock { block }).await;
    }

    pub async fn broadcast_transaction(&self, transaction: Transaction) {
        self.broadcast(GossipMessage::NewTransaction { transaction })
            .await;
    }
}
