//! Stateless transaction checks shared by mempool admission and block
//! validation. Balance and nonce checks live with the ledger state, which
//! owns the data they need.

use crate::error::{ChainError, RejectReason, Result};
use crate::gate::ValidationGate;
use crate::transaction::types::Transaction;

/// Structural checks that need no ledger state: size, chain binding, and the
/// sentinel signature rules.
pub fn check_wellformed(tx: &Transaction, chain_id: u64) -> Result<()> {
    tx.validate_size()?;

    if tx.chain_id != chain_id {
        return Err(ChainError::Rejected(RejectReason::WrongChain {
            expected: chain_id,
            got: tx.chain_id,
        }));
    }

    // Sentinels issue value; they must never look signed.
    if tx.from.is_sentinel() && tx.has_signature_material() {
        return Err(ChainError::Rejected(RejectReason::SentinelSigned));
    }

    Ok(())
}

/// Signature check for account spends, as a typed rejection.
pub fn check_signature(tx: &Transaction) -> Result<()> {
    if tx.verify_signature() {
        Ok(())
    } else {
        Err(ChainError::Rejected(RejectReason::BadSignature))
    }
}

/// Consults the external validation gate when the transaction carries a
/// proof. A gate failure fails closed: the transaction is not accepted.
pub fn check_gate(tx: &Transaction, gate: &dyn ValidationGate) -> Result<()> {
    if tx.proof.is_none() {
        return Ok(());
    }
    match gate.check(tx) {
        Ok(true) => Ok(()),
        Ok(false) => Err(ChainError::Rejected(RejectReason::GateRejected)),
        Err(e) => Err(ChainError::Collaborator(format!(
            "validation gate unavailable: {}",
            e
        ))),
    }
}
