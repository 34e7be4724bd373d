// src/wallet/operator_key.rs
//! Operator signing key for registry transactions.
//!
//! The operator account pays for and signs every `registerDID` transaction on
//! behalf of field personnel. Uses the following primitives:
//! - secp256k1 curve (via `k256` crate)
//! - EIP-155 transaction signing (via `ethers` wallet)
//!
//! # Security Notes
//! - Imported once from a hex string and held only in memory
//! - Never persisted, serialized or logged
//! - The underlying scalar is zeroed when the key is dropped

use crate::error::{AnchorError, Result};
use crate::utils::serialization::decode_hex;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Signature};
use k256::ecdsa::SigningKey;
use std::fmt;
use zeroize::Zeroizing;

/// In-memory operator key with its derived account address.
pub struct OperatorKey {
    wallet: LocalWallet,
}

impl OperatorKey {
    /// Imports a key from hex (with or without `0x`).
    ///
    /// # Errors
    /// `KeyMalformed` if the string is not 32 bytes of hex or the value is
    /// zero or not below the curve order.
    pub fn from_hex(private_key: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            decode_hex(private_key)
                .map_err(|e| AnchorError::KeyMalformed(format!("invalid hex: {e}")))?,
        );
        Self::from_bytes(&bytes)
    }

    /// Imports a key from raw scalar bytes.
    pub fn from_bytes(private_key: &[u8]) -> Result<Self> {
        if private_key.len() != 32 {
            return Err(AnchorError::KeyMalformed(format!(
                "expected 32 bytes, got {}",
                private_key.len()
            )));
        }
        let signing_key = SigningKey::from_slice(private_key).map_err(|_| {
            AnchorError::KeyMalformed("not a valid secp256k1 scalar".into())
        })?;
        Ok(Self {
            wallet: LocalWallet::from(signing_key),
        })
    }

    /// Binds the key to a chain id for EIP-155 replay protection.
    pub fn with_chain_id(self, chain_id: u64) -> Self {
        Self {
            wallet: self.wallet.with_chain_id(chain_id),
        }
    }

    /// Ethereum account address controlled by this key.
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Signs a fully populated transaction.
    pub(crate) async fn sign_transaction(&self, tx: &TypedTransaction) -> Result<Signature> {
        self.wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| AnchorError::SubmissionRejected(format!("signing failed: {e}")))
    }
}

impl fmt::Debug for OperatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorKey")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
