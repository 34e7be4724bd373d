// src/services/orchestrator.rs
//! Registration and verification orchestrator.
//!
//! Ties template intake, key derivation and the chain client into the two
//! operations exposed to field software:
//! - `register`: template → DID → `registerDID` transaction → receipt
//! - `verify`: compare a freshly derived DID (or just a lookup) against the
//!   registry
//!
//! Template and derivation failures abort before any RPC is issued. The
//! derived secret seed leaves this module only inside a confirmed
//! [`RegistrationResult`].

use crate::biometrics::template;
use crate::blockchain::evm_client::ChainClient;
use crate::contracts::voter_did_registry::{validate_national_id, RegistrationMatch};
use crate::error::{AnchorError, Result};
use crate::models::progress::{Milestone, ProgressSink};
use crate::models::registration::{
    OffChainReason, ReceiptStatus, RegistrationRecord, RegistrationResult, VerificationResult,
};
use crate::wallet::key_derivation::{derive_from_template, DerivedIdentity};
use crate::wallet::operator_key::OperatorKey;
use ethers::providers::{Http, JsonRpcClient};
use ethers::types::{Address, Bytes, H256};
use std::time::Duration;
use tokio::sync::watch;

/// Default receipt deadline for registrations and deployments.
pub const DEFAULT_RECEIPT_DEADLINE: Duration = Duration::from_secs(30);

/// Policy knobs for [`Orchestrator`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Report `off_chain_only` instead of failing when the operator cannot pay gas.
    pub allow_db_only: bool,
    /// Skip the transaction when the registry already stores the same DID.
    pub skip_if_registered: bool,
    pub receipt_deadline: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            allow_db_only: false,
            skip_if_registered: true,
            receipt_deadline: DEFAULT_RECEIPT_DEADLINE,
        }
    }
}

/// Registration and verification entry point, built once per process and
/// shared by reference.
pub struct Orchestrator<P = Http> {
    chain: ChainClient<P>,
    settings: OrchestratorSettings,
    progress: ProgressSink,
}

impl<P: JsonRpcClient> Orchestrator<P> {
    pub fn new(chain: ChainClient<P>, settings: OrchestratorSettings) -> Self {
        Self {
            chain,
            settings,
            progress: ProgressSink::none(),
        }
    }

    /// Attaches a milestone observer.
    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn chain(&self) -> &ChainClient<P> {
        &self.chain
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Imports the operator key from a hex string (optional `0x`).
    ///
    /// # Returns
    /// The operator's account address.
    ///
    /// # Errors
    /// `KeyMalformed` if the string is not a valid secp256k1 scalar.
    pub async fn import_operator_key(&self, private_key_hex: &str) -> Result<Address> {
        let key = OperatorKey::from_hex(private_key_hex)?;
        Ok(self.chain.install_key(key).await)
    }

    /// Deploys a fresh registry and binds to it.
    pub async fn deploy_registry(&self, bytecode: Bytes) -> Result<Address> {
        self.chain
            .deploy_registry(bytecode, self.settings.receipt_deadline)
            .await
    }

    /// Anchors the DID derived from `iso_template_b64` under `national_id`.
    ///
    /// # Arguments
    /// * `national_id` - Registry key for the voter
    /// * `iso_template_b64` - Base64 ISO/IEC 19794-2 record from the minutiae service
    ///
    /// # Returns
    /// - `Confirmed` with the block number and the derived key pair
    /// - `Pending` when no receipt arrived before the deadline
    /// - `Failed` when the transaction reverted or emitted no matching event
    /// - `AlreadyRegistered` when the registry already holds this DID
    /// - `OffChainOnly` when gas cannot be paid and `allow_db_only` is set
    ///
    /// # Errors
    /// Template and derivation errors before any RPC; chain client errors
    /// (`InsufficientFunds`, `NetworkError`, `SubmissionRejected`) otherwise.
    pub async fn register(&self, national_id: &str, iso_template_b64: &str) -> Result<RegistrationResult> {
        self.register_with_cancel(national_id, iso_template_b64, None).await
    }

    /// [`register`](Self::register) whose receipt wait ends early, as
    /// `Pending`, when `cancel` flips to `true`.
    pub async fn register_with_cancel(
        &self,
        national_id: &str,
        iso_template_b64: &str,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<RegistrationResult> {
        validate_national_id(national_id)?;
        let identity = self.derive(iso_template_b64)?;
        let did = identity.did.clone();

        if self.settings.skip_if_registered {
            if let Some(existing) = self.chain.get_did(national_id).await? {
                if existing == did.as_str() {
                    log::info!("{did}: already_registered");
                    return Ok(RegistrationResult::AlreadyRegistered { did });
                }
            }
        }

        let tx_hash = match self.chain.register(national_id, did.as_str()).await {
            Ok(tx_hash) => tx_hash,
            Err(AnchorError::InsufficientFunds { account, balance }) if self.settings.allow_db_only => {
                log::warn!("{did}: off_chain_only (operator {account:#x} holds {balance} wei)");
                return Ok(RegistrationResult::OffChainOnly {
                    did,
                    reason: OffChainReason::InsufficientFunds,
                    account,
                    balance,
                });
            }
            Err(e) => return Err(e),
        };
        self.progress.emit(Milestone::TxSubmitted);

        let mut record = RegistrationRecord::submitted(national_id, did.clone(), tx_hash);
        let receipt = self.poll_record(&mut record, cancel).await?;

        let result = match receipt {
            ReceiptStatus::Confirmed { block_number } => {
                self.progress.emit(Milestone::TxConfirmed);
                RegistrationResult::Confirmed {
                    did,
                    tx_hash,
                    block_number,
                    key_pair: identity.key_pair,
                }
            }
            ReceiptStatus::Failed { reason } => RegistrationResult::Failed { did, tx_hash, reason },
            ReceiptStatus::TimedOut | ReceiptStatus::Cancelled => RegistrationResult::Pending { did, tx_hash },
        };
        log::info!("{}: {}", result.did(), result.status());
        Ok(result)
    }

    /// Re-polls a submitted registration, typically one reported `Pending`.
    pub async fn poll_receipt(
        &self,
        tx_hash: H256,
        expected: &RegistrationMatch,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ReceiptStatus> {
        self.chain
            .poll_receipt(tx_hash, expected, self.settings.receipt_deadline, cancel)
            .await
    }

    /// Polls the receipt of `record` and advances its status.
    pub async fn poll_record(
        &self,
        record: &mut RegistrationRecord,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ReceiptStatus> {
        let expected = RegistrationMatch::exact(&record.national_id, record.did.as_str());
        let receipt = self.poll_receipt(record.tx_hash, &expected, cancel).await?;
        record.apply(&receipt);
        log::debug!(
            "{:#x} is {:?} (block {:?})",
            record.tx_hash,
            record.status,
            record.block_number
        );
        Ok(receipt)
    }

    /// Checks the registry for `national_id`.
    ///
    /// Without a template this is a lookup: verified when any DID is stored.
    /// With a template the derived DID must equal the stored one exactly.
    pub async fn verify(&self, national_id: &str, iso_template_b64: Option<&str>) -> Result<VerificationResult> {
        validate_national_id(national_id)?;
        let result = match iso_template_b64 {
            None => VerificationResult::from_stored(self.chain.get_did(national_id).await?),
            Some(template_b64) => {
                let did_local = self.derive(template_b64)?.did;
                let stored = self.chain.get_did(national_id).await?;
                VerificationResult::compare(stored, did_local)
            }
        };
        log::info!(
            "verification {}: {}",
            result.stored.as_deref().unwrap_or("no DID stored"),
            if result.verified { "verified" } else { "not_verified" }
        );
        Ok(result)
    }

    /// Releases the operator key; its scalar is zeroed on drop.
    pub async fn shutdown(&self) {
        self.chain.forget_operator_key().await;
        log::info!("orchestrator shut down");
    }

    fn derive(&self, iso_template_b64: &str) -> Result<DerivedIdentity> {
        let template = template::decode_and_validate(iso_template_b64)?;
        self.progress.emit(Milestone::TemplateDecoded);
        derive_from_template(&template, &self.progress)
    }
}
