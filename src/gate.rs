//! External validation gate.
//!
//! The gate is an opaque accept/reject oracle (anomaly detector, ZK proof
//! checker) consulted for proof-bearing transactions before they are
//! accepted. The engine treats it as replaceable and never embeds its
//! implementation; `AcceptAll` stands in where no real gate is deployed.

use crate::error::{ChainError, Result};
use crate::transaction::types::Transaction;

pub trait ValidationGate: Send + Sync {
    /// Returns Ok(true) to accept, Ok(false) to reject. An Err means the
    /// gate is unreachable; callers fail closed.
    fn check(&self, tx: &Transaction) -> Result<bool>;
}

/// Default gate: accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ValidationGate for AcceptAll {
    fn check(&self, _tx: &Transaction) -> Result<bool> {
        Ok(true)
    }
}

/// Rejects everything. Useful in tests for exercising the rejection path.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAll;

impl ValidationGate for RejectAll {
    fn check(&self, _tx: &Transaction) -> Result<bool> {
        Ok(false)
    }
}

/// Always fails as unreachable. Useful in tests for the fail-closed path.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unavailable;

impl ValidationGate for Unavailable {
    fn check(&self, _tx: &Transaction) -> Result<bool> {
        Err(ChainError::Collaborator("gate offline".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::transaction::{validation, Transaction, TxOrigin};

    fn proofless_tx() -> Transaction {
        let keypair = KeyPair::generate().unwrap();
        let to = KeyPair::generate().unwrap().address();
        Transaction::new(TxOrigin::Account(keypair.address()), to, 10, 0, 0, 5470)
    }

    #[test]
    fn test_gate_not_consulted_without_proof() {
        // Even an unreachable gate must not block a proofless transaction.
        let tx = proofless_tx();
        assert!(validation::check_gate(&tx, &Unavailable).is_ok());
    }

    #[test]
    fn test_gate_rejection_and_fail_closed() {
        let tx = proofless_tx().with_proof("zk:deadbeef".to_string());

        assert!(validation::check_gate(&tx, &AcceptAll).is_ok());

        let rejected = validation::check_gate(&tx, &RejectAll);
        assert!(rejected.is_err());
        assert!(rejected.unwrap_err().is_rejection());

        let unavailable = validation::check_gate(&tx, &Unavailable);
        assert!(matches!(unavailable, Err(ChainError::Collaborator(_))));
    }
}
