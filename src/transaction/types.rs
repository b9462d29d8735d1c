/// Transaction types for chain5470
use crate::crypto::{self, Address, KeyPair, Sha256Hash};
use crate::error::{ChainError, RejectReason};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// Maximum transaction size in bytes (100KB) to prevent DoS
pub const MAX_TRANSACTION_SIZE: usize = 100_000;

/// Commission on spends: 0.2%, truncated. Redistributed to the treasury,
/// never destroyed.
pub const COMMISSION_NUMER: u128 = 2;
pub const COMMISSION_DENOM: u128 = 1000;

/// Fee for a spend of `amount` base units, computed by integer truncation.
pub fn commission(amount: u64) -> u64 {
    ((amount as u128 * COMMISSION_NUMER) / COMMISSION_DENOM) as u64
}

/// Reserved sender string for block-reward issuance.
pub const SYSTEM_SENDER: &str = "system";
/// Reserved sender string for the one-time genesis supply issuance.
pub const GENESIS_SENDER: &str = "genesis";

/// Who a transaction spends from. The two sentinels issue value and never
/// carry a signature; everything else is a signed account spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxOrigin {
    System,
    Genesis,
    Account(Address),
}

impl TxOrigin {
    pub fn is_sentinel(&self) -> bool {
        matches!(self, TxOrigin::System | TxOrigin::Genesis)
    }

    pub fn account(&self) -> Option<Address> {
        match self {
            TxOrigin::Account(addr) => Some(*addr),
            _ => None,
        }
    }

    pub fn as_canonical_string(&self) -> String {
        match self {
            TxOrigin::System => SYSTEM_SENDER.to_string(),
            TxOrigin::Genesis => GENESIS_SENDER.to_string(),
            TxOrigin::Account(addr) => addr.to_checksum_hex(),
        }
    }
}

impl fmt::Display for TxOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_canonical_string())
    }
}

impl FromStr for TxOrigin {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            SYSTEM_SENDER => Ok(TxOrigin::System),
            GENESIS_SENDER => Ok(TxOrigin::Genesis),
            other => Address::from_hex(other).map(TxOrigin::Account),
        }
    }
}

impl Serialize for TxOrigin {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_canonical_string())
    }
}

impl<'de> Deserialize<'de> for TxOrigin {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An atomic value-transfer request.
///
/// Amounts are unsigned base units (see [`crate::blockchain::COIN`]). The
/// signature (compact ECDSA, hex) covers the canonical byte encoding produced
/// by [`Transaction::signable_message`]; `public_key` is carried alongside so
/// verifiers can re-derive and check the sender address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub from: TxOrigin,
    pub to: Address,
    pub amount: u64,
    pub timestamp: u64,
    pub nonce: u64,
    pub chain_id: u64,
    /// Opaque application payload, carried verbatim.
    pub data: Option<String>,
    pub signature: Option<String>,
    pub public_key: Option<String>,
    /// Opaque proof consumed by the external validation gate.
    pub proof: Option<String>,
}

impl Transaction {
    pub fn new(
        from: TxOrigin,
        to: Address,
        amount: u64,
        timestamp: u64,
        nonce: u64,
        chain_id: u64,
    ) -> Self {
        Transaction {
            from,
            to,
            amount,
            timestamp,
            nonce,
            chain_id,
            data: None,
            signature: None,
            public_key: None,
            proof: None,
        }
    }

    /// Block-reward issuance from the `system` sentinel.
    pub fn reward(to: Address, amount: u64, timestamp: u64, chain_id: u64) -> Self {
        Transaction::new(TxOrigin::System, to, amount, timestamp, 0, chain_id)
    }

    /// One-time supply issuance from the `genesis` sentinel.
    pub fn genesis_issuance(to: Address, amount: u64, timestamp: u64, chain_id: u64) -> Self {
        Transaction::new(TxOrigin::Genesis, to, amount, timestamp, 0, chain_id)
    }

    pub fn with_data(mut self, data: String) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_proof(mut self, proof: String) -> Self {
        self.proof = Some(proof);
        self
    }

    /// The commission owed on this transaction's amount. Sentinel issuance
    /// carries no fee.
    pub fn fee(&self) -> u64 {
        if self.from.is_sentinel() {
            0
        } else {
            commission(self.amount)
        }
    }

    /// True when any signature or proof material is attached. Sentinel
    /// transactions must keep this false.
    pub fn has_signature_material(&self) -> bool {
        self.signature.is_some() || self.public_key.is_some() || self.proof.is_some()
    }

    /// Canonical byte encoding for signing: fixed field order, big-endian
    /// fixed-width integers, optional payload length-prefixed. Signature,
    /// public key and proof are excluded.
    pub fn signable_message(&self) -> Vec<u8> {
        let mut message = Vec::new();
        message.extend_from_slice(b"5470TX:");
        let origin = self.from.as_canonical_string();
        message.extend_from_slice(&(origin.len() as u32).to_be_bytes());
        message.extend_from_slice(origin.as_bytes());
        message.extend_from_slice(self.to.as_bytes());
        message.extend_from_slice(&self.amount.to_be_bytes());
        message.extend_from_slice(&self.timestamp.to_be_bytes());
        message.extend_from_slice(&self.nonce.to_be_bytes());
        message.extend_from_slice(&self.chain_id.to_be_bytes());
        match &self.data {
            Some(data) => {
                message.push(1);
                message.extend_from_slice(&(data.len() as u32).to_be_bytes());
                message.extend_from_slice(data.as_bytes());
            }
            None => message.push(0),
        }
        message
    }

    /// SHA-256 of the canonical byte encoding. Stable across serialization
    /// round-trips.
    pub fn message_hash(&self) -> Sha256Hash {
        crypto::sha256(&self.signable_message())
    }

    /// Signs the canonical encoding and attaches signature and public key.
    pub fn sign(&mut self, keypair: &KeyPair) -> Result<(), ChainError> {
        let signature = keypair.sign(&self.signable_message())?;
        self.signature = Some(hex::encode(signature));
        self.public_key = Some(hex::encode(keypair.public_key_bytes()));
        Ok(())
    }

    /// Verifies the attached signature and that `from` is exactly the address
    /// derived from the attached public key. Returns false, never panics, on
    /// malformed material.
    pub fn verify_signature(&self) -> bool {
        let sender = match self.from.account() {
            Some(addr) => addr,
            None => return false,
        };
        let (signature_hex, public_key_hex) = match (&self.signature, &self.public_key) {
            (Some(sig), Some(pk)) => (sig, pk),
            _ => return false,
        };
        let signature = match hex::decode(signature_hex) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let public_key_bytes = match hex::decode(public_key_hex) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let public_key = match secp256k1::PublicKey::from_slice(&public_key_bytes) {
            Ok(pk) => pk,
            Err(_) => return false,
        };
        if Address::from_public_key(&public_key) != sender {
            return false;
        }
        crypto::verify_signature(&public_key_bytes, &self.signable_message(), &signature).is_ok()
    }

    /// Deterministic, sorted-key representation used for block hashing and
    /// wire transfer. Includes signature and proof material, mirroring the
    /// persisted form.
    pub fn to_canonical_value(&self) -> Value {
        json!({
            "from": self.from.as_canonical_string(),
            "to": self.to.to_checksum_hex(),
            "amount": self.amount,
            "timestamp": self.timestamp,
            "nonce": self.nonce,
            "chain_id": self.chain_id,
            "data": self.data,
            "signature": self.signature,
            "public_key": self.public_key,
            "proof": self.proof,
        })
    }

    /// Content hash of the full canonical representation, used for mempool
    /// membership and lookups.
    pub fn hash(&self) -> Sha256Hash {
        crypto::sha256(self.to_canonical_value().to_string().as_bytes())
    }

    pub fn hash_str(&self) -> String {
        hex::encode(self.hash())
    }

    /// Validate transaction size to prevent DoS attacks
    pub fn validate_size(&self) -> Result<(), ChainError> {
        let serialized = bincode::serialize(self)
            .map_err(|e| ChainError::Serialization(format!("Serialization failed: {}", e)))?;

        if serialized.len() > MAX_TRANSACTION_SIZE {
            return Err(ChainError::Rejected(RejectReason::TxTooLarge {
                size: serialized.len(),
                max: MAX_TRANSACTION_SIZE,
            }));
        }
        Ok(())
    }
}

impl Serialize for Transaction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Wire form is the canonical sorted-key dict.
        self.to_canonical_value().serialize(serializer)
    }
}

#[derive(Deserialize)]
struct TransactionWire {
    from: TxOrigin,
    to: Address,
    amount: u64,
    timestamp: u64,
    nonce: u64,
    chain_id: u64,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    public_key: Option<String>,
    #[serde(default)]
    proof: Option<String>,
}

impl<'de> Deserialize<'de> for Transaction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = TransactionWire::deserialize(deserializer)?;
        Ok(Transaction {
            from: wire.from,
            to: wire.to,
            amount: wire.amount,
            timestamp: wire.timestamp,
            nonce: wire.nonce,
            chain_id: wire.chain_id,
            data: wire.data,
            signature: wire.signature,
            public_key: wire.public_key,
            proof: wire.proof,
        })
    }
}
