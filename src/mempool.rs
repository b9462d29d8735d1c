//! Transaction mempool: insertion-ordered holding area for transactions that
//! passed admission but are not yet in an accepted block.

use crate::blockchain::core::state::LedgerState;
use crate::crypto::{Address, Sha256Hash};
use crate::error::{ChainError, RejectReason, Result};
use crate::transaction::Transaction;
use std::collections::HashSet;

pub const DEFAULT_MEMPOOL_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Default)]
pub struct Mempool {
    transactions: Vec<Transaction>,
    seen: HashSet<Sha256Hash>,
    capacity: usize,
}

impl Mempool {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMPOOL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Mempool {
            transactions: Vec::new(),
            seen: HashSet::new(),
            capacity,
        }
    }

    pub fn add(&mut self, tx: Transaction) -> Result<Sha256Hash> {
        if self.transactions.len() >= self.capacity {
            return Err(ChainError::MempoolFull);
        }
        let hash = tx.hash();
        if !self.seen.insert(hash) {
            return Err(ChainError::Rejected(RejectReason::DuplicateTransaction));
        }
        self.transactions.push(tx);
        Ok(hash)
    }

    pub fn remove(&mut self, hash: &Sha256Hash) {
        if self.seen.remove(hash) {
            self.transactions.retain(|tx| tx.hash() != *hash);
        }
    }

    pub fn get(&self, hash: &Sha256Hash) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.hash() == *hash)
    }

    pub fn contains(&self, hash: &Sha256Hash) -> bool {
        self.seen.contains(hash)
    }

    /// All pending transactions in insertion order.
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.transactions.clone()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Number of pending transactions spending from `address`. Used to admit
    /// chains of sequential nonces before the earlier ones are mined.
    pub fn pending_from(&self, address: &Address) -> u64 {
        self.transactions
            .iter()
            .filter(|tx| tx.from.account() == Some(*address))
            .count() as u64
    }

    /// Total amount plus fees already committed by pending transactions from
    /// `address`.
    pub fn pending_outflow(&self, address: &Address) -> u128 {
        self.transactions
            .iter()
            .filter(|tx| tx.from.account() == Some(*address))
            .map(|tx| tx.amount as u128 + tx.fee() as u128)
            .sum()
    }

    /// Drops transactions that can never become valid again because their
    /// nonce is below the sender's next expected nonce. Transactions that are
    /// merely ahead of the current nonce stay queued.
    pub fn prune_stale(&mut self, state: &LedgerState) {
        let seen = &mut self.seen;
        self.transactions.retain(|tx| {
            let stale = match tx.from.account() {
                Some(sender) => tx.nonce < state.next_nonce(&sender),
                None => true, // sentinels never belong in the mempool
            };
            if stale {
                seen.remove(&tx.hash());
            }
            !stale
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::transaction::TxOrigin;

    fn tx_from(keypair: &KeyPair, nonce: u64, amount: u64) -> Transaction {
        let to = KeyPair::generate().unwrap().address();
        Transaction::new(
            TxOrigin::Account(keypair.address()),
            to,
            amount,
            nonce, // distinct timestamps keep hashes distinct
            nonce,
            5470,
        )
    }

    #[test]
    fn test_insertion_order_preserved() {
        let keypair = KeyPair::generate().unwrap();
        let mut pool = Mempool::new();
        for nonce in 0..5 {
            pool.add(tx_from(&keypair, nonce, 100)).unwrap();
        }
        let nonces: Vec<u64> = pool.snapshot().iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let keypair = KeyPair::generate().unwrap();
        let mut pool = Mempool::new();
        let tx = tx_from(&keypair, 0, 100);
        pool.add(tx.clone()).unwrap();
        let result = pool.add(tx);
        assert!(matches!(
            result,
            Err(ChainError::Rejected(RejectReason::DuplicateTransaction))
        ));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_capacity_enforced() {
        let keypair = KeyPair::generate().unwrap();
        let mut pool = Mempool::with_capacity(2);
        pool.add(tx_from(&keypair, 0, 100)).unwrap();
        pool.add(tx_from(&keypair, 1, 100)).unwrap();
        assert!(matches!(
            pool.add(tx_from(&keypair, 2, 100)),
            Err(ChainError::MempoolFull)
        ));
    }

    #[test]
    fn test_remove_and_pending_accounting() {
        let keypair = KeyPair::generate().unwrap();
        let address = keypair.address();
        let mut pool = Mempool::new();
        let hash = pool.add(tx_from(&keypair, 0, 1000)).unwrap();
        pool.add(tx_from(&keypair, 1, 2000)).unwrap();

        assert_eq!(pool.pending_from(&address), 2);
        // 1000 + fee 2 + 2000 + fee 4
        assert_eq!(pool.pending_outflow(&address), 3006);

        pool.remove(&hash);
        assert_eq!(pool.len(), 1);
        assert!(!pool.contains(&hash));
        assert_eq!(pool.pending_from(&address), 1);
    }

    #[test]
    fn test_prune_stale_drops_spent_nonces() {
        let keypair = KeyPair::generate().unwrap();
        let mut pool = Mempool::new();
        pool.add(tx_from(&keypair, 0, 100)).unwrap();
        pool.add(tx_from(&keypair, 1, 100)).unwrap();

        let mut state = LedgerState::new(KeyPair::generate().unwrap().address());
        state.nonces.insert(keypair.address(), 1);

        pool.prune_stale(&state);
        let nonces: Vec<u64> = pool.snapshot().iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, vec![1]);
    }
}
