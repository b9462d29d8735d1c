//! Full block validation, separated from the chain engine so it can run
//! against any (tip, state) pair: the live chain, a replay during load, or a
//! block received from a peer.

use crate::blockchain::core::chain::{block_reward, Block, ChainParams};
use crate::blockchain::core::state::LedgerState;
use crate::crypto::Sha256Hash;
use crate::error::{ChainError, RejectReason, Result};
use crate::gate::ValidationGate;
use crate::miner::{meets_target, pow_target};
use crate::transaction::{validation as tx_validation, TxOrigin};
use std::collections::HashSet;

/// Validates `block` as the successor of `tip` (`None` for genesis) and
/// returns the ledger state after applying it. Fail-fast: structural checks
/// first, then proof-of-work, then per-transaction rules against a working
/// copy of `state`. The input state is never mutated.
pub fn validate_block(
    block: &Block,
    tip: Option<&Block>,
    state: &LedgerState,
    params: &ChainParams,
    gate: &dyn ValidationGate,
) -> Result<LedgerState> {
    let expected_index = tip.map_or(0, |t| t.index + 1);
    if block.index != expected_index {
        return Err(ChainError::Rejected(RejectReason::BadHeight {
            expected: expected_index,
            got: block.index,
        }));
    }

    let expected_previous = tip.map_or([0u8; 32], |t| t.hash);
    if block.previous_hash != expected_previous {
        return Err(ChainError::Rejected(RejectReason::BadLinkage {
            expected: hex::encode(expected_previous),
            got: hex::encode(block.previous_hash),
        }));
    }

    if block.hash != block.compute_hash() {
        return Err(ChainError::Rejected(RejectReason::HashMismatch));
    }

    if !meets_target(&block.hash, &pow_target(params.difficulty_bits)) {
        return Err(ChainError::Rejected(RejectReason::BadProofOfWork));
    }

    check_reward_shape(block)?;

    let mut seen: HashSet<Sha256Hash> = HashSet::new();
    let mut working = state.clone();
    for tx in &block.transactions {
        if !seen.insert(tx.hash()) {
            return Err(ChainError::Rejected(RejectReason::DuplicateTransaction));
        }
        tx_validation::check_wellformed(tx, params.chain_id)?;
        if !tx.from.is_sentinel() {
            tx_validation::check_signature(tx)?;
            tx_validation::check_gate(tx, gate)?;
        }
        working.apply_transaction(tx, block.index)?;
    }

    Ok(working)
}

/// At most one reward transaction per block; when present it must come first
/// and pay exactly the scheduled amount for this height.
fn check_reward_shape(block: &Block) -> Result<()> {
    let system_count = block
        .transactions
        .iter()
        .filter(|tx| tx.from == TxOrigin::System)
        .count();
    if system_count > 1 {
        return Err(ChainError::Rejected(RejectReason::BadRewardPlacement));
    }
    if system_count == 1 && block.transactions[0].from != TxOrigin::System {
        return Err(ChainError::Rejected(RejectReason::BadRewardPlacement));
    }

    if let Some(reward_tx) = block
        .transactions
        .first()
        .filter(|tx| tx.from == TxOrigin::System)
    {
        let expected = block_reward(block.index);
        if reward_tx.amount != expected {
            return Err(ChainError::Rejected(RejectReason::BadRewardAmount {
                expected,
                got: reward_tx.amount,
            }));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::core::chain::{Blockchain, DEFAULT_CHAIN_ID, INITIAL_REWARD};
    use crate::crypto::KeyPair;
    use crate::gate::AcceptAll;
    use crate::miner::mine_block;
    use crate::transaction::Transaction;
    use std::sync::atomic::AtomicBool;

    const DIFFICULTY: u32 = 8;

    fn test_chain() -> Blockchain {
        let creator = KeyPair::generate().unwrap().address();
        let params = ChainParams {
            difficulty_bits: DIFFICULTY,
            ..ChainParams::default()
        };
        Blockchain::new(params, creator).unwrap()
    }

    fn mined_successor(chain: &Blockchain, transactions: Vec<Transaction>) -> Block {
        let tip = chain.tip().unwrap();
        let block = Block::new(tip.index + 1, tip.hash, transactions, tip.timestamp + 1);
        mine_block(block, DIFFICULTY, &AtomicBool::new(false)).unwrap()
    }

    fn reward_to(miner: &KeyPair, index: u64) -> Transaction {
        Transaction::reward(
            miner.address(),
            block_reward(index),
            1_700_000_000_000,
            DEFAULT_CHAIN_ID,
        )
    }

    #[test]
    fn test_valid_successor_accepted() {
        let chain = test_chain();
        let miner = KeyPair::generate().unwrap();
        let block = mined_successor(&chain, vec![reward_to(&miner, 1)]);

        let next = validate_block(
            &block,
            chain.tip(),
            &chain.state,
            &chain.params,
            &AcceptAll,
        )
        .unwrap();
        assert_eq!(next.balance(&miner.address()), INITIAL_REWARD);
    }

    #[test]
    fn test_stale_parent_rejected() {
        let mut chain = test_chain();
        let miner = KeyPair::generate().unwrap();

        // Mine against the current tip, then advance the chain before applying.
        let stale = mined_successor(&chain, vec![reward_to(&miner, 1)]);
        let winner = mined_successor(&chain, vec![reward_to(&miner, 1)]);
        chain.apply_block(winner).unwrap();

        let result = validate_block(&stale, chain.tip(), &chain.state, &chain.params, &AcceptAll);
        assert!(matches!(
            result,
            Err(ChainError::Rejected(
                RejectReason::BadHeight { .. } | RejectReason::BadLinkage { .. }
            ))
        ));
    }

    #[test]
    fn test_wrong_reward_amount_rejected() {
        let chain = test_chain();
        let miner = KeyPair::generate().unwrap();
        let inflated = Transaction::reward(
            miner.address(),
            INITIAL_REWARD + 1,
            1_700_000_000_000,
            DEFAULT_CHAIN_ID,
        );
        let block = mined_successor(&chain, vec![inflated]);

        let result = validate_block(&block, chain.tip(), &chain.state, &chain.params, &AcceptAll);
        assert!(matches!(
            result,
            Err(ChainError::Rejected(RejectReason::BadRewardAmount { .. }))
        ));
    }

    #[test]
    fn test_misplaced_reward_rejected() {
        let chain = test_chain();
        let miner = KeyPair::generate().unwrap();
        let creator = KeyPair::generate().unwrap();
        let mut spend = Transaction::new(
            TxOrigin::Account(creator.address()),
            miner.address(),
            1,
            1_700_000_000_000,
            0,
            DEFAULT_CHAIN_ID,
        );
        spend.sign(&creator).unwrap();
        let block = mined_successor(&chain, vec![spend, reward_to(&miner, 1)]);

        let result = validate_block(&block, chain.tip(), &chain.state, &chain.params, &AcceptAll);
        assert!(matches!(
            result,
            Err(ChainError::Rejected(RejectReason::BadRewardPlacement))
        ));
    }

    #[test]
    fn test_duplicate_transaction_in_block_rejected() {
        let chain = test_chain();
        let miner = KeyPair::generate().unwrap();
        let reward = reward_to(&miner, 1);
        let block = mined_successor(&chain, vec![reward.clone(), reward]);

        let result = validate_block(&block, chain.tip(), &chain.state, &chain.params, &AcceptAll);
        assert!(matches!(
            result,
            Err(ChainError::Rejected(
                RejectReason::DuplicateTransaction | RejectReason::BadRewardPlacement
            ))
        ));
    }

    #[test]
    fn test_tampered_block_rejected() {
        let chain = test_chain();
        let miner = KeyPair::generate().unwrap();
        let mut block = mined_successor(&chain, vec![reward_to(&miner, 1)]);
        block.transactions[0].amount += 1;

        let result = validate_block(&block, chain.tip(), &chain.state, &chain.params, &AcceptAll);
        assert!(matches!(
            result,
            Err(ChainError::Rejected(RejectReason::HashMismatch))
        ));
    }

    #[test]
    fn test_unsigned_spend_in_block_rejected() {
        let chain = test_chain();
        let miner = KeyPair::generate().unwrap();
        let creator = KeyPair::generate().unwrap();
        let spend = Transaction::new(
            TxOrigin::Account(creator.address()),
            miner.address(),
            1,
            1_700_000_000_000,
            0,
            DEFAULT_CHAIN_ID,
        );
        let block = mined_successor(&chain, vec![reward_to(&miner, 1), spend]);

        let result = validate_block(&block, chain.tip(), &chain.state, &chain.params, &AcceptAll);
        assert!(matches!(
            result,
            Err(ChainError::Rejected(RejectReason::BadSignature))
        ));
    }
}
