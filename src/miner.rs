//! Proof-of-work search.
//!
//! The search is CPU-bound and runs outside the ledger lock on a candidate
//! built from an immutable snapshot; the cancel flag lets the node abandon an
//! attempt when the chain advances underneath it.

use crate::blockchain::Block;
use crate::error::{ChainError, RejectReason, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// How often the nonce loop polls the cancel flag.
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Builds the 256-bit target for a difficulty expressed in leading zero bits.
pub fn pow_target(difficulty_bits: u32) -> [u8; 32] {
    let mut target = [0xFF; 32];
    let leading_zeros = difficulty_bits / 8;
    let partial_bits = difficulty_bits % 8;

    for item in target.iter_mut().take(leading_zeros as usize) {
        *item = 0;
    }

    if leading_zeros < 32 && partial_bits > 0 {
        target[leading_zeros as usize] = 0xFF >> partial_bits;
    }
    target
}

/// Big-endian comparison: a hash at or below the target satisfies the proof.
pub fn meets_target(hash: &[u8; 32], target: &[u8; 32]) -> bool {
    hash <= target
}

/// Searches for a nonce whose block hash meets the difficulty target.
/// Unbounded except for the cancel flag; a cancelled attempt returns a
/// `MiningCancelled` rejection and its partial work is discarded.
pub fn mine_block(mut block: Block, difficulty_bits: u32, cancel: &AtomicBool) -> Result<Block> {
    let target = pow_target(difficulty_bits);
    let mut nonce = block.nonce;

    loop {
        if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
            return Err(ChainError::Rejected(RejectReason::MiningCancelled));
        }

        block.nonce = nonce;
        let hash = block.compute_hash();
        if meets_target(&hash, &target) {
            block.hash = hash;
            return Ok(block);
        }

        nonce = nonce.wrapping_add(1);
        if nonce == 0 {
            // Nonce space exhausted; vary the timestamp and restart.
            block.timestamp = block.timestamp.saturating_add(1);
        }
    }
}
