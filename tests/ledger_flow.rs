//! End-to-end ledger flow: issuance, spending, mining, fees, replay
//! protection and restart recovery, exercised through the public engine API.

use chain5470::blockchain::{
    block_reward, Blockchain, ChainParams, LedgerState, DEFAULT_CHAIN_ID,
};
use chain5470::crypto::KeyPair;
use chain5470::error::{ChainError, RejectReason};
use chain5470::gate::AcceptAll;
use chain5470::miner::mine_block;
use chain5470::persistence::SqliteStore;
use chain5470::transaction::{Transaction, TxOrigin};
use std::sync::atomic::AtomicBool;

const DIFFICULTY: u32 = 8;

fn params_with_treasury(genesis_supply: u64, treasury: &KeyPair) -> ChainParams {
    ChainParams {
        difficulty_bits: DIFFICULTY,
        genesis_supply,
        treasury: Some(treasury.address()),
        ..ChainParams::default()
    }
}

fn signed_spend(from: &KeyPair, to: &KeyPair, amount: u64, nonce: u64) -> Transaction {
    let mut tx = Transaction::new(
        TxOrigin::Account(from.address()),
        to.address(),
        amount,
        1_700_000_000_000 + nonce,
        nonce,
        DEFAULT_CHAIN_ID,
    );
    tx.sign(from).expect("signing failed");
    tx
}

fn mine_next(chain: &mut Blockchain, beneficiary: &KeyPair) {
    let candidate = chain.build_candidate(beneficiary.address()).unwrap();
    let mined = mine_block(candidate, DIFFICULTY, &AtomicBool::new(false)).unwrap();
    chain.apply_block(mined).unwrap();
}

#[test]
fn test_spend_mine_and_fee_routing() {
    let creator = KeyPair::generate().unwrap();
    let recipient = KeyPair::generate().unwrap();
    let treasury = KeyPair::generate().unwrap();
    let miner = KeyPair::generate().unwrap();

    let mut chain =
        Blockchain::new(params_with_treasury(1_000_000, &treasury), creator.address()).unwrap();
    assert_eq!(chain.state.balance(&creator.address()), 1_000_000);

    chain
        .submit_transaction(signed_spend(&creator, &recipient, 1000, 0))
        .unwrap();
    mine_next(&mut chain, &miner);

    assert_eq!(chain.height(), 2);
    assert_eq!(chain.state.balance(&creator.address()), 998_998);
    assert_eq!(chain.state.balance(&recipient.address()), 1000);
    assert_eq!(chain.state.balance(&treasury.address()), 2);
    assert_eq!(chain.state.balance(&miner.address()), block_reward(1));
    assert_eq!(chain.state.next_nonce(&creator.address()), 1);
    assert!(chain.mempool.is_empty());

    // Replaying nonce 0 must be rejected at admission.
    let result = chain.submit_transaction(signed_spend(&creator, &recipient, 1000, 0));
    assert!(matches!(
        result,
        Err(ChainError::Rejected(RejectReason::BadNonce {
            expected: 1,
            got: 0
        }))
    ));

    // Conservation: everything in circulation was issued.
    assert_eq!(chain.state.total_balance(), chain.state.issued);
}

#[test]
fn test_sequential_nonces_across_blocks() {
    let creator = KeyPair::generate().unwrap();
    let recipient = KeyPair::generate().unwrap();
    let treasury = KeyPair::generate().unwrap();
    let miner = KeyPair::generate().unwrap();

    let mut chain =
        Blockchain::new(params_with_treasury(1_000_000, &treasury), creator.address()).unwrap();

    // Two queued spends with consecutive nonces land in one block.
    chain
        .submit_transaction(signed_spend(&creator, &recipient, 1000, 0))
        .unwrap();
    chain
        .submit_transaction(signed_spend(&creator, &recipient, 2000, 1))
        .unwrap();
    mine_next(&mut chain, &miner);

    assert_eq!(chain.state.next_nonce(&creator.address()), 2);
    assert_eq!(chain.state.balance(&recipient.address()), 3000);
    // Fees: 2 on 1000, 4 on 2000.
    assert_eq!(chain.state.balance(&treasury.address()), 6);
    assert_eq!(chain.state.balance(&creator.address()), 1_000_000 - 3006);
}

#[test]
fn test_restart_recovers_identical_state() {
    let creator = KeyPair::generate().unwrap();
    let recipient = KeyPair::generate().unwrap();
    let treasury = KeyPair::generate().unwrap();
    let miner = KeyPair::generate().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("chain.db");
    let db_path = db_path.to_str().unwrap();
    let params = params_with_treasury(1_000_000, &treasury);

    let (blocks_before, state_before) = {
        let store = SqliteStore::open(db_path).unwrap();
        let mut chain = Blockchain::new_with_persistence(
            params.clone(),
            creator.address(),
            Box::new(store),
            Box::new(AcceptAll),
        )
        .unwrap();

        chain
            .submit_transaction(signed_spend(&creator, &recipient, 1000, 0))
            .unwrap();
        mine_next(&mut chain, &miner);
        (chain.blocks.clone(), chain.state.clone())
    };

    let store = SqliteStore::open(db_path).unwrap();
    let restored = Blockchain::load(params, Box::new(store), Box::new(AcceptAll)).unwrap();

    assert_eq!(restored.blocks, blocks_before);
    assert_eq!(restored.state, state_before);
    assert_eq!(restored.state.balance(&creator.address()), 998_998);
}

#[test]
fn test_replay_is_deterministic() {
    let creator = KeyPair::generate().unwrap();
    let recipient = KeyPair::generate().unwrap();
    let treasury = KeyPair::generate().unwrap();
    let miner = KeyPair::generate().unwrap();

    let mut chain =
        Blockchain::new(params_with_treasury(1_000_000, &treasury), creator.address()).unwrap();
    chain
        .submit_transaction(signed_spend(&creator, &recipient, 1000, 0))
        .unwrap();
    mine_next(&mut chain, &miner);

    let replayed = LedgerState::replay(&chain.blocks, Some(treasury.address())).unwrap();
    assert_eq!(replayed, chain.state);
}

#[test]
fn test_stale_mined_block_discarded() {
    let creator = KeyPair::generate().unwrap();
    let treasury = KeyPair::generate().unwrap();
    let miner_a = KeyPair::generate().unwrap();
    let miner_b = KeyPair::generate().unwrap();

    let mut chain =
        Blockchain::new(params_with_treasury(1_000_000, &treasury), creator.address()).unwrap();

    // Two miners race on the same parent; the loser's block must not apply.
    let candidate_a = chain.build_candidate(miner_a.address()).unwrap();
    let candidate_b = chain.build_candidate(miner_b.address()).unwrap();
    let mined_a = mine_block(candidate_a, DIFFICULTY, &AtomicBool::new(false)).unwrap();
    let mined_b = mine_block(candidate_b, DIFFICULTY, &AtomicBool::new(false)).unwrap();

    chain.apply_block(mined_a).unwrap();
    let result = chain.apply_block(mined_b);
    assert!(result.unwrap_err().is_rejection());

    assert_eq!(chain.height(), 2);
    assert_eq!(chain.state.balance(&miner_a.address()), block_reward(1));
    assert_eq!(chain.state.balance(&miner_b.address()), 0);
}

#[test]
fn test_insufficient_balance_never_enters_a_block() {
    let creator = KeyPair::generate().unwrap();
    let recipient = KeyPair::generate().unwrap();
    let treasury = KeyPair::generate().unwrap();

    let mut chain =
        Blockchain::new(params_with_treasury(1001, &treasury), creator.address()).unwrap();

    // 1000 + fee 2 exceeds the 1001 supply.
    let result = chain.submit_transaction(signed_spend(&creator, &recipient, 1000, 0));
    assert!(matches!(
        result,
        Err(ChainError::Rejected(RejectReason::InsufficientBalance {
            required: 1002,
            available: 1001
        }))
    ));
    assert!(chain.mempool.is_empty());
}
