//! chain5470 - a proof-of-work ledger for the 5470 token
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`blockchain`] - Chain engine, ledger state and block validation
//! - [`transaction`] - Transaction types and admission checks
//! - [`mempool`] - Pending transaction pool
//!
//! ## Consensus
//! - [`miner`] - Proof-of-work search
//!
//! ## Cryptography
//! - [`crypto`] - secp256k1 signatures and checksummed addresses
//! - [`gate`] - Pluggable external validation gate
//!
//! ## State Management
//! - [`persistence`] - Database layer (SQLite)
//!
//! ## Networking & Integration
//! - [`network`] - Peer gossip
//! - [`api`] - REST API server
//! - [`node`] - Process orchestration
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod mempool;
pub mod transaction;

// ============================================================================
// Consensus & Mining
// ============================================================================
pub mod miner;

// ============================================================================
// Cryptography & Admission
// ============================================================================
pub mod crypto;
pub mod gate;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;

// ============================================================================
// Networking & Integration
// ============================================================================
pub mod api;
pub mod network;
pub mod node;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
