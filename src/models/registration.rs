// src/models/registration.rs
//! Registration and verification outcomes.
//!
//! These replace loosely shaped `{success, did, isVerified, error}` bags with
//! closed, tagged variants: every caller matches on exactly the statuses the
//! orchestrator can produce.

use crate::error::{AnchorError, Result};
use crate::models::did::Did;
use crate::wallet::key_derivation::KeyPair;
use ethers::types::{Address, H256, U256};
use serde::Serialize;

/// Whether the chain client found a usable registry binding at start-up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingState {
    Ready,
    NotBound,
}

/// Terminal outcome of polling one transaction receipt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceiptStatus {
    /// Receipt succeeded and carried the expected `DIDRegistered` event.
    Confirmed { block_number: u64 },
    /// Receipt observed with failure status, or without the expected event.
    Failed { reason: String },
    /// Deadline reached without a receipt.
    TimedOut,
    /// Caller cancelled the poll; nothing is known about the transaction.
    Cancelled,
}

impl ReceiptStatus {
    /// Converts the poll outcome into a block number or a terminal error.
    ///
    /// Cancellation is reported as a timeout: the transaction may still land.
    pub fn into_result(self, tx_hash: H256) -> Result<u64> {
        match self {
            ReceiptStatus::Confirmed { block_number } => Ok(block_number),
            ReceiptStatus::Failed { reason } => Err(AnchorError::Reverted { tx_hash, reason }),
            ReceiptStatus::TimedOut | ReceiptStatus::Cancelled => {
                Err(AnchorError::ReceiptTimeout { tx_hash })
            }
        }
    }
}

/// Lifecycle status of a [`RegistrationRecord`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Confirmed,
    Failed,
}

/// One submitted `(national_id, did)` registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RegistrationRecord {
    pub national_id: String,
    pub did: Did,
    pub tx_hash: H256,
    pub block_number: Option<u64>,
    pub status: RecordStatus,
}

impl RegistrationRecord {
    /// A freshly accepted submission.
    pub fn submitted(national_id: &str, did: Did, tx_hash: H256) -> Self {
        Self {
            national_id: national_id.to_string(),
            did,
            tx_hash,
            block_number: None,
            status: RecordStatus::Pending,
        }
    }

    /// Advances the record with a poll outcome. Timeouts and cancellations
    /// leave it pending.
    pub fn apply(&mut self, receipt: &ReceiptStatus) {
        match receipt {
            ReceiptStatus::Confirmed { block_number } => {
                self.block_number = Some(*block_number);
                self.status = RecordStatus::Confirmed;
            }
            ReceiptStatus::Failed { .. } => self.status = RecordStatus::Failed,
            ReceiptStatus::TimedOut | ReceiptStatus::Cancelled => {}
        }
    }
}

/// Why a registration was kept off chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OffChainReason {
    InsufficientFunds,
}

/// Outcome of [`Orchestrator::register`](crate::services::orchestrator::Orchestrator::register).
///
/// Only `Confirmed` carries the derived key pair; it is never serialized.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegistrationResult {
    Confirmed {
        did: Did,
        tx_hash: H256,
        block_number: u64,
        #[serde(skip)]
        key_pair: KeyPair,
    },
    Pending {
        did: Did,
        tx_hash: H256,
    },
    Failed {
        did: Did,
        tx_hash: H256,
        reason: String,
    },
    AlreadyRegistered {
        did: Did,
    },
    OffChainOnly {
        did: Did,
        reason: OffChainReason,
        account: Address,
        balance: U256,
    },
}

impl RegistrationResult {
    pub fn did(&self) -> &Did {
        match self {
            RegistrationResult::Confirmed { did, .. }
            | RegistrationResult::Pending { did, .. }
            | RegistrationResult::Failed { did, .. }
            | RegistrationResult::AlreadyRegistered { did }
            | RegistrationResult::OffChainOnly { did, .. } => did,
        }
    }

    pub fn tx_hash(&self) -> Option<H256> {
        match self {
            RegistrationResult::Confirmed { tx_hash, .. }
            | RegistrationResult::Pending { tx_hash, .. }
            | RegistrationResult::Failed { tx_hash, .. } => Some(*tx_hash),
            RegistrationResult::AlreadyRegistered { .. }
            | RegistrationResult::OffChainOnly { .. } => None,
        }
    }

    /// The snake_case status tag, as serialized.
    pub fn status(&self) -> &'static str {
        match self {
            RegistrationResult::Confirmed { .. } => "confirmed",
            RegistrationResult::Pending { .. } => "pending",
            RegistrationResult::Failed { .. } => "failed",
            RegistrationResult::AlreadyRegistered { .. } => "already_registered",
            RegistrationResult::OffChainOnly { .. } => "off_chain_only",
        }
    }

    /// The derived key pair, present only for confirmed registrations.
    pub fn key_pair(&self) -> Option<&KeyPair> {
        match self {
            RegistrationResult::Confirmed { key_pair, .. } => Some(key_pair),
            _ => None,
        }
    }
}

/// Outcome of [`Orchestrator::verify`](crate::services::orchestrator::Orchestrator::verify).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub verified: bool,
    /// DID stored on chain for the national id, if any.
    pub stored: Option<String>,
    /// DID regenerated from the supplied template, if one was supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub did_local: Option<Did>,
}

impl VerificationResult {
    /// Lookup-only verification: verified when anything is stored.
    pub fn from_stored(stored: Option<String>) -> Self {
        Self {
            verified: stored.is_some(),
            stored,
            did_local: None,
        }
    }

    /// Template verification: exact string equality against the stored DID.
    pub fn compare(stored: Option<String>, did_local: Did) -> Self {
        let verified = stored.as_deref() == Some(did_local.as_str());
        Self {
            verified,
            stored,
            did_local: Some(did_local),
        }
    }
}
