//! Materialized ledger state: balances and per-account nonces, derived by
//! replaying blocks in order. Never mutated except through block application;
//! always reconstructible from genesis.

use crate::crypto::Address;
use crate::error::{ChainError, RejectReason, Result};
use crate::transaction::{Transaction, TxOrigin};
use std::collections::HashMap;

use super::chain::Block;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerState {
    pub balances: HashMap<Address, u64>,
    /// Next expected nonce per account. Absent means 0.
    pub nonces: HashMap<Address, u64>,
    /// Distinguished recipient of all commission fees.
    pub treasury: Address,
    /// Total issuance so far: genesis supply plus cumulative rewards.
    /// Invariant: equals the sum of all balances (fees are redistributed
    /// internally, never destroyed).
    pub issued: u64,
}

impl LedgerState {
    pub fn new(treasury: Address) -> Self {
        LedgerState {
            balances: HashMap::new(),
            nonces: HashMap::new(),
            treasury,
            issued: 0,
        }
    }

    pub fn balance(&self, address: &Address) -> u64 {
        *self.balances.get(address).unwrap_or(&0)
    }

    pub fn next_nonce(&self, address: &Address) -> u64 {
        *self.nonces.get(address).unwrap_or(&0)
    }

    pub fn total_balance(&self) -> u64 {
        self.balances.values().sum()
    }

    fn credit(&mut self, address: Address, amount: u64) -> Result<()> {
        let entry = self.balances.entry(address).or_insert(0);
        *entry = entry
            .checked_add(amount)
            .ok_or(ChainError::Rejected(RejectReason::Overflow))?;
        Ok(())
    }

    /// Applies one transaction. Issuance origins credit without debit or
    /// nonce bookkeeping; spends debit amount plus commission, credit the
    /// recipient, route the fee to the treasury and advance the nonce.
    pub fn apply_transaction(&mut self, tx: &Transaction, block_index: u64) -> Result<()> {
        match tx.from {
            TxOrigin::System => {
                self.credit(tx.to, tx.amount)?;
                self.issued = self
                    .issued
                    .checked_add(tx.amount)
                    .ok_or(ChainError::Rejected(RejectReason::Overflow))?;
            }
            TxOrigin::Genesis => {
                if block_index != 0 {
                    return Err(ChainError::Rejected(RejectReason::GenesisOutsideBlockZero));
                }
                self.credit(tx.to, tx.amount)?;
                self.issued = self
                    .issued
                    .checked_add(tx.amount)
                    .ok_or(ChainError::Rejected(RejectReason::Overflow))?;
            }
            TxOrigin::Account(sender) => {
                let fee = tx.fee();
                let total = tx
                    .amount
                    .checked_add(fee)
                    .ok_or(ChainError::Rejected(RejectReason::Overflow))?;

                let available = self.balance(&sender);
                if available < total {
                    return Err(ChainError::Rejected(RejectReason::InsufficientBalance {
                        required: total,
                        available,
                    }));
                }

                let expected = self.next_nonce(&sender);
                if tx.nonce != expected {
                    return Err(ChainError::Rejected(RejectReason::BadNonce {
                        expected,
                        got: tx.nonce,
                    }));
                }

                self.balances.insert(sender, available - total);
                self.credit(tx.to, tx.amount)?;
                let treasury = self.treasury;
                self.credit(treasury, fee)?;
                self.nonces.insert(sender, expected + 1);
            }
        }
        Ok(())
    }

    /// Applies all transactions of a block in order. Callers stage this on a
    /// clone and commit only on success so a mid-block failure never leaves
    /// partial state visible.
    pub fn apply_block(&mut self, block: &Block) -> Result<()> {
        for tx in &block.transactions {
            self.apply_transaction(tx, block.index)?;
        }
        Ok(())
    }

    /// Rebuilds state by replaying `blocks` from genesis. The treasury
    /// defaults to the recipient of the genesis issuance (the chain creator)
    /// unless overridden.
    pub fn replay(blocks: &[Block], treasury_override: Option<Address>) -> Result<LedgerState> {
        let genesis = blocks.first().ok_or_else(|| {
            ChainError::CorruptState("cannot replay an empty chain".to_string())
        })?;
        let creator = genesis
            .transactions
            .iter()
            .find(|tx| tx.from == TxOrigin::Genesis)
            .map(|tx| tx.to)
            .ok_or_else(|| {
                ChainError::CorruptState("genesis block carries no genesis issuance".to_string())
            })?;

        let mut state = LedgerState::new(treasury_override.unwrap_or(creator));
        for block in blocks {
            state.apply_block(block)?;
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    const CHAIN_ID: u64 = 5470;

    fn issued_state(keypair: &KeyPair, supply: u64, treasury: Address) -> LedgerState {
        let mut state = LedgerState::new(treasury);
        let tx = Transaction::genesis_issuance(keypair.address(), supply, 0, CHAIN_ID);
        state.apply_transaction(&tx, 0).unwrap();
        state
    }

    #[test]
    fn test_spend_debits_fee_to_treasury_and_bumps_nonce() {
        let sender = KeyPair::generate().unwrap();
        let recipient = KeyPair::generate().unwrap().address();
        let treasury = KeyPair::generate().unwrap().address();
        let mut state = issued_state(&sender, 1_000_000, treasury);

        let tx = Transaction::new(
            TxOrigin::Account(sender.address()),
            recipient,
            1000,
            0,
            0,
            CHAIN_ID,
        );
        state.apply_transaction(&tx, 1).unwrap();

        assert_eq!(state.balance(&sender.address()), 998_998);
        assert_eq!(state.balance(&recipient), 1000);
        assert_eq!(state.balance(&treasury), 2);
        assert_eq!(state.next_nonce(&sender.address()), 1);
        // Fees are redistribution, not burn.
        assert_eq!(state.total_balance(), state.issued);
    }

    #[test]
    fn test_spending_exact_balance_leaves_zero() {
        let sender = KeyPair::generate().unwrap();
        let recipient = KeyPair::generate().unwrap().address();
        let treasury = KeyPair::generate().unwrap().address();
        // 1002 covers amount 1000 plus fee 2 exactly.
        let mut state = issued_state(&sender, 1002, treasury);

        let tx = Transaction::new(
            TxOrigin::Account(sender.address()),
            recipient,
            1000,
            0,
            0,
            CHAIN_ID,
        );
        state.apply_transaction(&tx, 1).unwrap();
        assert_eq!(state.balance(&sender.address()), 0);
    }

    #[test]
    fn test_overspend_rejected_without_partial_state() {
        let sender = KeyPair::generate().unwrap();
        let recipient = KeyPair::generate().unwrap().address();
        let treasury = KeyPair::generate().unwrap().address();
        let mut state = issued_state(&sender, 1001, treasury);
        let before = state.clone();

        let tx = Transaction::new(
            TxOrigin::Account(sender.address()),
            recipient,
            1000,
            0,
            0,
            CHAIN_ID,
        );
        let result = state.apply_transaction(&tx, 1);
        assert!(matches!(
            result,
            Err(ChainError::Rejected(RejectReason::InsufficientBalance { .. }))
        ));
        assert_eq!(state, before);
    }

    #[test]
    fn test_nonce_must_be_sequential() {
        let sender = KeyPair::generate().unwrap();
        let recipient = KeyPair::generate().unwrap().address();
        let treasury = KeyPair::generate().unwrap().address();
        let mut state = issued_state(&sender, 1_000_000, treasury);

        let mut tx = Transaction::new(
            TxOrigin::Account(sender.address()),
            recipient,
            100,
            0,
            1, // gap: expected 0
            CHAIN_ID,
        );
        assert!(matches!(
            state.apply_transaction(&tx, 1),
            Err(ChainError::Rejected(RejectReason::BadNonce {
                expected: 0,
                got: 1
            }))
        ));

        tx.nonce = 0;
        state.apply_transaction(&tx, 1).unwrap();

        // Reusing nonce 0 is replay and must fail; nonce 1 is now accepted.
        let replayed = Transaction::new(
            TxOrigin::Account(sender.address()),
            recipient,
            100,
            1,
            0,
            CHAIN_ID,
        );
        assert!(state.apply_transaction(&replayed, 1).is_err());

        let next = Transaction::new(
            TxOrigin::Account(sender.address()),
            recipient,
            100,
            2,
            1,
            CHAIN_ID,
        );
        state.apply_transaction(&next, 1).unwrap();
        assert_eq!(state.next_nonce(&sender.address()), 2);
    }

    #[test]
    fn test_genesis_issuance_only_in_block_zero() {
        let recipient = KeyPair::generate().unwrap().address();
        let treasury = KeyPair::generate().unwrap().address();
        let mut state = LedgerState::new(treasury);

        let tx = Transaction::genesis_issuance(recipient, 1000, 0, CHAIN_ID);
        assert!(matches!(
            state.apply_transaction(&tx, 3),
            Err(ChainError::Rejected(RejectReason::GenesisOutsideBlockZero))
        ));
        state.apply_transaction(&tx, 0).unwrap();
        assert_eq!(state.issued, 1000);
    }

    #[test]
    fn test_system_reward_credits_without_nonce() {
        let miner = KeyPair::generate().unwrap().address();
        let treasury = KeyPair::generate().unwrap().address();
        let mut state = LedgerState::new(treasury);

        let tx = Transaction::reward(miner, 5_000_000_000, 0, CHAIN_ID);
        state.apply_transaction(&tx, 7).unwrap();
        assert_eq!(state.balance(&miner), 5_000_000_000);
        assert_eq!(state.next_nonce(&miner), 0);
        assert_eq!(state.issued, 5_000_000_000);
    }
}
