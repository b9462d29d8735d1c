//! Database persistence layer for chain5470

use crate::blockchain::{Block, LedgerState};
use crate::crypto::Address;
use crate::error::{ChainError, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// Abstraction for persistence backends. Implementations provide atomic
/// saving of a block together with the balances it implies, and loading of
/// the stored chain for replay at startup.
pub trait Persistence: Send + Sync {
    /// Saves a block and the post-block balances in one atomic step.
    fn save_chain_state(&self, block: &Block, state: &LedgerState) -> Result<()>;
    fn save_block(&self, block: &Block) -> Result<()>;
    fn save_balances(&self, state: &LedgerState) -> Result<()>;
    /// All stored blocks in index order. Empty when nothing was persisted.
    fn load_chain(&self) -> Result<Vec<Block>>;
    /// Stored balances. Advisory only: callers re-derive balances by replay
    /// and treat a mismatch as drift, not truth.
    fn load_balances(&self) -> Result<HashMap<Address, u64>>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::Database(format!("failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS chain (
                idx INTEGER PRIMARY KEY,
                data TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| ChainError::Database(format!("failed to create chain table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS balances (
                address TEXT PRIMARY KEY,
                balance INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| ChainError::Database(format!("failed to create balances table: {}", e)))?;

        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ChainError::Database("mutex poisoned".to_string()))
    }

    fn insert_block(conn: &Connection, block: &Block) -> Result<()> {
        let data = serde_json::to_string(block)
            .map_err(|e| ChainError::Database(format!("failed to serialize block: {}", e)))?;
        conn.execute(
            "INSERT OR REPLACE INTO chain (idx, data) VALUES (?1, ?2)",
            params![block.index as i64, data],
        )
        .map_err(|e| ChainError::Database(format!("failed to save block: {}", e)))?;
        Ok(())
    }

    fn replace_balances(conn: &Connection, state: &LedgerState) -> Result<()> {
        conn.execute("DELETE FROM balances", [])
            .map_err(|e| ChainError::Database(format!("failed to clear balances: {}", e)))?;
        for (address, balance) in &state.balances {
            conn.execute(
                "INSERT INTO balances (address, balance) VALUES (?1, ?2)",
                params![address.to_checksum_hex(), *balance as i64],
            )
            .map_err(|e| ChainError::Database(format!("failed to save balance: {}", e)))?;
        }
        Ok(())
    }
}

impl Persistence for SqliteStore {
    fn save_chain_state(&self, block: &Block, state: &LedgerState) -> Result<()> {
        let conn = self.lock()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| ChainError::Database(format!("failed to start transaction: {}", e)))?;

        Self::insert_block(&tx, block)?;
        Self::replace_balances(&tx, state)?;

        tx.commit()
            .map_err(|e| ChainError::Database(format!("failed to commit transaction: {}", e)))?;
        Ok(())
    }

    fn save_block(&self, block: &Block) -> Result<()> {
        let conn = self.lock()?;
        Self::insert_block(&conn, block)
    }

    fn save_balances(&self, state: &LedgerState) -> Result<()> {
        let conn = self.lock()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| ChainError::Database(format!("failed to start transaction: {}", e)))?;
        Self::replace_balances(&tx, state)?;
        tx.commit()
            .map_err(|e| ChainError::Database(format!("failed to commit transaction: {}", e)))?;
        Ok(())
    }

    fn load_chain(&self) -> Result<Vec<Block>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT idx, data FROM chain ORDER BY idx ASC")
            .map_err(|e| ChainError::Database(format!("failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                let idx: i64 = row.get(0)?;
                let data: String = row.get(1)?;
                Ok((idx, data))
            })
            .map_err(|e| ChainError::Database(format!("failed to query chain: {}", e)))?;

        let mut blocks = Vec::new();
        for row in rows {
            let (idx, data) =
                row.map_err(|e| ChainError::Database(format!("failed to read row: {}", e)))?;
            let block: Block = serde_json::from_str(&data).map_err(|e| {
                ChainError::CorruptState(format!("stored block {} does not parse: {}", idx, e))
            })?;
            if block.index as i64 != idx {
                return Err(ChainError::CorruptState(format!(
                    "stored block index {} disagrees with its row key {}",
                    block.index, idx
                )));
            }
            blocks.push(block);
        }
        Ok(blocks)
    }

    fn load_balances(&self) -> Result<HashMap<Address, u64>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT address, balance FROM balances")
            .map_err(|e| ChainError::Database(format!("failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                let address: String = row.get(0)?;
                let balance: i64 = row.get(1)?;
                Ok((address, balance))
            })
            .map_err(|e| ChainError::Database(format!("failed to query balances: {}", e)))?;

        let mut balances = HashMap::new();
        for row in rows {
            let (address_hex, balance) =
                row.map_err(|e| ChainError::Database(format!("failed to read row: {}", e)))?;
            let address = Address::from_str(&address_hex).map_err(|e| {
                ChainError::CorruptState(format!("stored address does not parse: {}", e))
            })?;
            balances.insert(address, balance as u64);
        }
        Ok(balances)
    }
}

/// Simple in-memory persistence implementation useful for tests and
/// ephemeral runs.
#[derive(Clone, Default)]
pub struct MemoryStore {
    blocks: Arc<Mutex<Vec<Block>>>,
    balances: Arc<Mutex<HashMap<Address, u64>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for MemoryStore {
    fn save_chain_state(&self, block: &Block, state: &LedgerState) -> Result<()> {
        self.save_block(block)?;
        self.save_balances(state)
    }

    fn save_block(&self, block: &Block) -> Result<()> {
        let mut blocks = self
            .blocks
            .lock()
            .map_err(|_| ChainError::Database("mutex poisoned".to_string()))?;
        blocks.retain(|b| b.index != block.index);
        blocks.push(block.clone());
        blocks.sort_by_key(|b| b.index);
        Ok(())
    }

    fn save_balances(&self, state: &LedgerState) -> Result<()> {
        let mut balances = self
            .balances
            .lock()
            .map_err(|_| ChainError::Database("mutex poisoned".to_string()))?;
        *balances = state.balances.clone();
        Ok(())
    }

    fn load_chain(&self) -> Result<Vec<Block>> {
        let blocks = self
            .blocks
            .lock()
            .map_err(|_| ChainError::Database("mutex poisoned".to_string()))?;
        Ok(blocks.clone())
    }

    fn load_balances(&self) -> Result<HashMap<Address, u64>> {
        let balances = self
            .balances
            .lock()
            .map_err(|_| ChainError::Database("mutex poisoned".to_string()))?;
        Ok(balances.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{Blockchain, ChainParams};
    use crate::crypto::KeyPair;
    use crate::gate::AcceptAll;

    fn low_difficulty() -> ChainParams {
        ChainParams {
            difficulty_bits: 8,
            ..ChainParams::default()
        }
    }

    #[test]
    fn test_sqlite_open_creates_tables() {
        let store = SqliteStore::open(":memory:").unwrap();
        assert!(store.load_chain().unwrap().is_empty());
        assert!(store.load_balances().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.db");
        let path = path.to_str().unwrap();
        let creator = KeyPair::generate().unwrap().address();

        let genesis = {
            let store = SqliteStore::open(path).unwrap();
            let chain = Blockchain::new_with_persistence(
                low_difficulty(),
                creator,
                Box::new(store),
                Box::new(AcceptAll),
            )
            .unwrap();
            chain.tip().unwrap().clone()
        };

        let store = SqliteStore::open(path).unwrap();
        let blocks = store.load_chain().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0], genesis);

        let balances = store.load_balances().unwrap();
        assert_eq!(balances.get(&creator), Some(&crate::blockchain::GENESIS_SUPPLY));
    }

    #[test]
    fn test_corrupt_block_row_surfaces_as_corrupt_state() {
        let store = SqliteStore::open(":memory:").unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO chain (idx, data) VALUES (0, 'not json')",
                [],
            )
            .unwrap();
        }
        assert!(matches!(
            store.load_chain(),
            Err(ChainError::CorruptState(_))
        ));
    }

    #[test]
    fn test_memory_store_replaces_same_index() {
        let creator = KeyPair::generate().unwrap().address();
        let chain = Blockchain::new(low_difficulty(), creator).unwrap();
        let block = chain.tip().unwrap().clone();

        let store = MemoryStore::new();
        store.save_block(&block).unwrap();
        store.save_block(&block).unwrap();
        assert_eq!(store.load_chain().unwrap().len(), 1);
    }
}
