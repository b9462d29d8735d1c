use crate::crypto::{self, Address, Sha256Hash};
use crate::error::{ChainError, RejectReason, Result};
use crate::gate::{AcceptAll, ValidationGate};
use crate::mempool::Mempool;
use crate::miner::mine_block;
use crate::persistence::{MemoryStore, Persistence};
use crate::transaction::{validation as tx_validation, Transaction, TxOrigin};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::sync::atomic::AtomicBool;

use super::state::LedgerState;
use super::validation::validate_block;

pub const TOKEN_NAME: &str = "5470";
pub const TOKEN_SYMBOL: &str = "547";

/// Base units per whole coin. All amounts in the ledger are base units.
pub const COIN: u64 = 100_000_000;
/// Fixed supply issued to the chain creator in block 0.
pub const GENESIS_SUPPLY: u64 = 5_470_000 * COIN;
/// Block reward before any halving.
pub const INITIAL_REWARD: u64 = 50 * COIN;
/// Blocks between reward halvings.
pub const HALVING_INTERVAL: u64 = 210_000;
/// After this many halvings the reward is zero forever.
pub const MAX_HALVINGS: u64 = 64;

pub const DEFAULT_CHAIN_ID: u64 = 5470;
pub const DEFAULT_DIFFICULTY_BITS: u32 = 16;

/// Fixed timestamp of block 0 so every node derives the same genesis hash.
pub const GENESIS_TIMESTAMP: u64 = 1_672_531_200_000;

/// Reward for the block at `index`: halves every [`HALVING_INTERVAL`] blocks,
/// zero once [`MAX_HALVINGS`] is reached.
pub fn block_reward(index: u64) -> u64 {
    let halvings = index / HALVING_INTERVAL;
    if halvings >= MAX_HALVINGS {
        0
    } else {
        INITIAL_REWARD >> halvings
    }
}

/// Consensus parameters fixed at chain creation.
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub chain_id: u64,
    /// Proof-of-work difficulty in leading zero bits. Constant for the life
    /// of the chain.
    pub difficulty_bits: u32,
    pub genesis_supply: u64,
    /// Recipient of all commission fees. Defaults to the genesis issuance
    /// recipient when unset.
    pub treasury: Option<Address>,
}

impl Default for ChainParams {
    fn default() -> Self {
        ChainParams {
            chain_id: DEFAULT_CHAIN_ID,
            difficulty_bits: DEFAULT_DIFFICULTY_BITS,
            genesis_supply: GENESIS_SUPPLY,
            treasury: None,
        }
    }
}

/// A mined block. `hash` commits to every other field including the full
/// transaction payloads, so any mutation after mining is detectable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub previous_hash: Sha256Hash,
    pub nonce: u64,
    pub transactions: Vec<Transaction>,
    pub hash: Sha256Hash,
}

impl Block {
    pub fn new(
        index: u64,
        previous_hash: Sha256Hash,
        transactions: Vec<Transaction>,
        timestamp: u64,
    ) -> Self {
        let mut block = Block {
            index,
            timestamp,
            previous_hash,
            nonce: 0,
            transactions,
            hash: [0u8; 32],
        };
        block.hash = block.compute_hash();
        block
    }

    /// SHA-256 of the canonical sorted-key JSON of the block contents. The
    /// stored `hash` field is excluded from its own preimage.
    pub fn compute_hash(&self) -> Sha256Hash {
        let preimage = json!({
            "index": self.index,
            "timestamp": self.timestamp,
            "previous_hash": hex::encode(self.previous_hash),
            "nonce": self.nonce,
            "transactions": self.transactions.iter()
                .map(Transaction::to_canonical_value)
                .collect::<Vec<Value>>(),
        });
        crypto::sha256(preimage.to_string().as_bytes())
    }

    pub fn hash_str(&self) -> String {
        hex::encode(self.hash)
    }

    /// Canonical wire form, hash included.
    pub fn to_canonical_value(&self) -> Value {
        json!({
            "index": self.index,
            "timestamp": self.timestamp,
            "previous_hash": hex::encode(self.previous_hash),
            "nonce": self.nonce,
            "transactions": self.transactions.iter()
                .map(Transaction::to_canonical_value)
                .collect::<Vec<Value>>(),
            "hash": hex::encode(self.hash),
        })
    }

    /// Checks that the stored hash matches the contents. Used when loading
    /// persisted blocks and when receiving blocks from peers.
    pub fn verify_integrity(&self) -> Result<()> {
        if self.hash != self.compute_hash() {
            return Err(ChainError::CorruptState(format!(
                "block {} hash does not match its contents",
                self.index
            )));
        }
        Ok(())
    }
}

impl Serialize for Block {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_canonical_value().serialize(serializer)
    }
}

#[derive(Deserialize)]
struct BlockWire {
    index: u64,
    timestamp: u64,
    previous_hash: String,
    nonce: u64,
    transactions: Vec<Transaction>,
    hash: String,
}

fn decode_hash<E: serde::de::Error>(hex_str: &str) -> std::result::Result<Sha256Hash, E> {
    let bytes = hex::decode(hex_str).map_err(E::custom)?;
    bytes
        .try_into()
        .map_err(|_| E::custom("hash must be 32 bytes"))
}

impl<'de> Deserialize<'de> for Block {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = BlockWire::deserialize(deserializer)?;
        Ok(Block {
            index: wire.index,
            timestamp: wire.timestamp,
            previous_hash: decode_hash(&wire.previous_hash)?,
            nonce: wire.nonce,
            transactions: wire.transactions,
            hash: decode_hash(&wire.hash)?,
        })
    }
}

/// The ledger engine: ordered blocks, the materialized state they imply, and
/// the mempool feeding the next block. All mutation funnels through
/// [`Blockchain::apply_block`].
pub struct Blockchain {
    pub params: ChainParams,
    pub blocks: Vec<Block>,
    pub state: LedgerState,
    pub mempool: Mempool,
    persistence: Box<dyn Persistence>,
    gate: Box<dyn ValidationGate>,
}

impl Blockchain {
    /// Creates a fresh chain with an in-memory store and a permissive gate,
    /// mining the genesis block. Intended for tests and ephemeral nodes.
    pub fn new(params: ChainParams, creator: Address) -> Result<Self> {
        Self::new_with_persistence(
            params,
            creator,
            Box::new(MemoryStore::new()),
            Box::new(AcceptAll),
        )
    }

    /// Creates a fresh chain, mining and persisting the genesis block. The
    /// full genesis supply is issued to `creator`.
    pub fn new_with_persistence(
        params: ChainParams,
        creator: Address,
        persistence: Box<dyn Persistence>,
        gate: Box<dyn ValidationGate>,
    ) -> Result<Self> {
        let genesis = Self::mine_genesis(&params, creator)?;

        let treasury = params.treasury.unwrap_or(creator);
        let mut chain = Blockchain {
            params,
            blocks: Vec::new(),
            state: LedgerState::new(treasury),
            mempool: Mempool::new(),
            persistence,
            gate,
        };
        chain.apply_block(genesis)?;
        Ok(chain)
    }

    /// Restores a chain from its persistence backend, re-validating every
    /// block (integrity, linkage, proof-of-work) and re-deriving balances by
    /// replay. Stored balances are advisory: a mismatch is logged, replay
    /// wins.
    pub fn load(
        params: ChainParams,
        persistence: Box<dyn Persistence>,
        gate: Box<dyn ValidationGate>,
    ) -> Result<Self> {
        let blocks = persistence.load_chain()?;
        let genesis = blocks
            .first()
            .ok_or_else(|| ChainError::CorruptState("no persisted chain".to_string()))?;
        let creator = genesis
            .transactions
            .iter()
            .find(|tx| tx.from == TxOrigin::Genesis)
            .map(|tx| tx.to)
            .ok_or_else(|| {
                ChainError::CorruptState("genesis block carries no genesis issuance".to_string())
            })?;

        let treasury = params.treasury.unwrap_or(creator);
        let mut chain = Blockchain {
            params,
            blocks: Vec::new(),
            state: LedgerState::new(treasury),
            mempool: Mempool::new(),
            persistence,
            gate,
        };

        for block in blocks {
            block.verify_integrity()?;
            chain.state = validate_block(
                &block,
                chain.blocks.last(),
                &chain.state,
                &chain.params,
                chain.gate.as_ref(),
            )
            .map_err(|e| {
                ChainError::CorruptState(format!(
                    "persisted block {} fails validation: {}",
                    block.index, e
                ))
            })?;
            chain.blocks.push(block);
        }

        match chain.persistence.load_balances() {
            Ok(stored) if stored != chain.state.balances => {
                tracing::warn!(
                    "stored balances diverge from replay; using replayed balances"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("could not read stored balances: {}", e);
            }
        }

        tracing::info!(height = chain.height(), "chain restored from storage");
        Ok(chain)
    }

    fn mine_genesis(params: &ChainParams, creator: Address) -> Result<Block> {
        let issuance = Transaction::genesis_issuance(
            creator,
            params.genesis_supply,
            GENESIS_TIMESTAMP,
            params.chain_id,
        );
        let genesis = Block::new(0, [0u8; 32], vec![issuance], GENESIS_TIMESTAMP);
        mine_block(genesis, params.difficulty_bits, &AtomicBool::new(false))
    }

    pub fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Index of the next block to be mined.
    pub fn height(&self) -> u64 {
        self.blocks.len() as u64
    }

    /// Admits an externally submitted transaction into the mempool.
    ///
    /// Nonce and balance checks account for transactions already pending from
    /// the same sender, so a client may queue sequential nonces without
    /// waiting for each block.
    pub fn submit_transaction(&mut self, tx: Transaction) -> Result<Sha256Hash> {
        if tx.from.is_sentinel() {
            return Err(ChainError::Rejected(RejectReason::ReservedSender));
        }
        tx_validation::check_wellformed(&tx, self.params.chain_id)?;
        tx_validation::check_signature(&tx)?;
        tx_validation::check_gate(&tx, self.gate.as_ref())?;

        let sender = tx
            .from
            .account()
            .ok_or(ChainError::Rejected(RejectReason::ReservedSender))?;

        let expected = self.state.next_nonce(&sender) + self.mempool.pending_from(&sender);
        if tx.nonce != expected {
            return Err(ChainError::Rejected(RejectReason::BadNonce {
                expected,
                got: tx.nonce,
            }));
        }

        let required =
            self.mempool.pending_outflow(&sender) + tx.amount as u128 + tx.fee() as u128;
        let available = self.state.balance(&sender);
        if (available as u128) < required {
            return Err(ChainError::Rejected(RejectReason::InsufficientBalance {
                required: u64::try_from(required).unwrap_or(u64::MAX),
                available,
            }));
        }

        self.mempool.add(tx)
    }

    /// Assembles the next candidate block from the mempool: the reward
    /// transaction first (while the schedule still pays one), then every
    /// pending transaction that is valid against the working state. The
    /// candidate is unmined; callers hand it to the miner.
    pub fn build_candidate(&mut self, beneficiary: Address) -> Result<Block> {
        let tip = self
            .tip()
            .ok_or_else(|| ChainError::CorruptState("cannot extend an empty chain".to_string()))?;
        let index = tip.index + 1;
        let previous_hash = tip.hash;
        let timestamp = chrono::Utc::now().timestamp_millis() as u64;

        self.mempool.prune_stale(&self.state);

        let mut working = self.state.clone();
        let mut transactions = Vec::new();

        let reward = block_reward(index);
        if reward > 0 {
            let reward_tx = Transaction::reward(beneficiary, reward, timestamp, self.params.chain_id);
            working.apply_transaction(&reward_tx, index)?;
            transactions.push(reward_tx);
        }

        for tx in self.mempool.snapshot() {
            // A transaction that fails against the working state stays pooled;
            // it may become valid once an earlier one from the same sender
            // lands.
            if working.apply_transaction(&tx, index).is_ok() {
                transactions.push(tx);
            }
        }

        Ok(Block::new(index, previous_hash, transactions, timestamp))
    }

    /// Validates and commits a mined block. State transitions are staged on a
    /// copy and swapped in only after every transaction applies, so a
    /// rejected block leaves no trace. Included transactions leave the
    /// mempool; the new state is persisted with one retry.
    pub fn apply_block(&mut self, block: Block) -> Result<()> {
        let next_state = validate_block(
            &block,
            self.tip(),
            &self.state,
            &self.params,
            self.gate.as_ref(),
        )?;

        for tx in &block.transactions {
            self.mempool.remove(&tx.hash());
        }
        self.blocks.push(block);
        self.state = next_state;
        self.mempool.prune_stale(&self.state);

        // The block is committed in memory regardless of storage health; a
        // persist failure is surfaced so operators notice, and the chain can
        // be re-persisted from memory on the next block.
        let committed = self.blocks.last().ok_or_else(|| {
            ChainError::CorruptState("chain empty after commit".to_string())
        })?;
        if let Err(first) = self.persistence.save_chain_state(committed, &self.state) {
            tracing::warn!("persist failed, retrying once: {}", first);
            self.persistence
                .save_chain_state(committed, &self.state)
                .map_err(|second| {
                    ChainError::Collaborator(format!(
                        "block {} accepted but not persisted: {}",
                        committed.index, second
                    ))
                })?;
        }
        Ok(())
    }
}
