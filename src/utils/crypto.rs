// src/utils/crypto.rs
//! Hash primitives used across the pipeline.
//!
//! SHA-256 (via `ring`) drives key derivation; Keccak-256 (via `ethers`) is
//! Ethereum's hash and keys event topics and the ABI fingerprint.

use ethers::utils::keccak256 as ethers_keccak256;
use ring::digest::{digest, SHA256};

/// Computes a SHA-256 digest of the input data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(digest(&SHA256, data).as_ref());
    out
}

/// Computes a Keccak-256 hash of the input data (Ethereum-compatible).
///
/// # Example
/// ```
/// use voter_did_anchor::utils::crypto::keccak256;
/// let hash = keccak256(b"");
/// assert_eq!(hash[0], 0xc5);
/// ```
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    ethers_keccak256(data)
}
