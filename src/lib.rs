//! # Voter DID anchoring core
//!
//! Turns a stabilized fingerprint template into a `did:key` identifier and
//! anchors it in an EVM registry contract keyed by national id.
//!
//! ## Architecture Overview
//! 1. **Biometrics**: ISO/IEC 19794-2 template intake (`biometrics::template`)
//! 2. **Wallet**: deterministic Ed25519 derivation and the operator signing key
//! 3. **Contracts / Blockchain**: registry ABI and the JSON-RPC chain client
//! 4. **Services**: the registration orchestrator and its HTTP surface
//! 5. **Storage**: the persisted registry binding

pub mod biometrics;
pub mod blockchain;
pub mod contracts;
pub mod error;
pub mod models;
pub mod services;
pub mod settings;
pub mod storage;
pub mod utils;
pub mod wallet;

pub use error::{AnchorError, Result};
