//! Error types for chain5470

use thiserror::Error;

/// Typed reason for a business-rule rejection. These are always recoverable:
/// the offending transaction or block is dropped and the reason is reported,
/// the process keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("previous hash does not match chain tip (expected {expected}, got {got})")]
    BadLinkage { expected: String, got: String },
    #[error("unexpected block index (expected {expected}, got {got})")]
    BadHeight { expected: u64, got: u64 },
    #[error("block hash does not match its contents")]
    HashMismatch,
    #[error("block hash does not meet the difficulty target")]
    BadProofOfWork,
    #[error("reward transaction must be the only system transaction and come first")]
    BadRewardPlacement,
    #[error("reward amount must be {expected}, got {got}")]
    BadRewardAmount { expected: u64, got: u64 },
    #[error("system and genesis transactions must not carry a signature or proof")]
    SentinelSigned,
    #[error("genesis issuance is only valid in block 0")]
    GenesisOutsideBlockZero,
    #[error("transaction is for chain {got}, this chain is {expected}")]
    WrongChain { expected: u64, got: u64 },
    #[error("signature verification failed")]
    BadSignature,
    #[error("validation gate rejected the transaction")]
    GateRejected,
    #[error("bad nonce (expected {expected}, got {got})")]
    BadNonce { expected: u64, got: u64 },
    #[error("insufficient balance (need {required}, have {available})")]
    InsufficientBalance { required: u64, available: u64 },
    #[error("duplicate transaction")]
    DuplicateTransaction,
    #[error("amount plus fee overflows")]
    Overflow,
    #[error("transaction too large ({size} bytes, max {max})")]
    TxTooLarge { size: usize, max: usize },
    #[error("external submitters may not use the system or genesis sender")]
    ReservedSender,
    #[error("mining attempt was cancelled")]
    MiningCancelled,
}

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// Malformed key or signature material. Fatal to the operation, not the process.
    #[error("cryptographic error: {0}")]
    Crypto(String),
    /// Business-rule failure with a typed reason code.
    #[error("rejected: {0}")]
    Rejected(RejectReason),
    /// Persisted chain or balance data fails re-derivation. Fatal at startup.
    #[error("corrupt state: {0}")]
    CorruptState(String),
    /// Persistence or validation gate unreachable; block acceptance fails closed.
    #[error("collaborator unavailable: {0}")]
    Collaborator(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("mempool is full")]
    MempoolFull,
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("config error: {0}")]
    Config(String),
}

impl ChainError {
    /// True for business rejections, false for infrastructure failures.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ChainError::Rejected(_))
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::Database(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
