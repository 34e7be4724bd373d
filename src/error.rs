// src/error.rs
//! Error taxonomy shared by every layer of the anchoring core.
//!
//! Template intake and key derivation fail before any network traffic, the
//! chain client classifies provider failures into structured variants, and the
//! command-line driver turns a variant into a process exit status.

use ethers::types::{Address, H256, U256};
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AnchorError>;

/// Every failure the registration and verification pipeline can surface.
#[derive(Debug, Error)]
pub enum AnchorError {
    /// Bad base64, missing or wrong ISO header, or inconsistent record length.
    #[error("malformed ISO template: {0}")]
    TemplateMalformed(String),

    /// Template too short to yield a 32-byte stable secret.
    #[error("template too short to derive a stable secret: {len} bytes, need at least {min}")]
    InsufficientEntropy { len: usize, min: usize },

    /// Ed25519 key construction rejected the seed.
    #[error("Ed25519 key derivation rejected the seed: {0}")]
    CryptoFailure(String),

    /// Operator private key is not a valid secp256k1 scalar.
    #[error("malformed operator key: {0}")]
    KeyMalformed(String),

    #[error("invalid national id: {0}")]
    InvalidNationalId(String),

    #[error("invalid did:key identifier: {0}")]
    InvalidDid(String),

    /// A malformed address, hash or other command argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The node reports a chain id other than the configured one.
    #[error("connected to chain {observed}, expected chain {expected}")]
    NetworkMismatch { expected: u64, observed: u64 },

    #[error("network error: {0}")]
    NetworkError(String),

    /// The operator account cannot pay for gas.
    #[error("operator account {account:#x} cannot pay for gas (balance {balance} wei)")]
    InsufficientFunds { account: Address, balance: U256 },

    /// The node refused the transaction (bad nonce, underpriced, revert on estimation).
    #[error("transaction rejected by node: {0}")]
    SubmissionRejected(String),

    #[error("registry deployment failed: {0}")]
    DeploymentFailed(String),

    #[error("no receipt for transaction {tx_hash:#x} before the deadline")]
    ReceiptTimeout { tx_hash: H256 },

    #[error("transaction {tx_hash:#x} failed: {reason}")]
    Reverted { tx_hash: H256, reason: String },

    #[error("no VoterDID registry contract is bound; deploy or bind one first")]
    RegistryNotBound,

    #[error("no operator key has been imported")]
    OperatorKeyMissing,

    #[error("registry ABI error: {0}")]
    ContractAbi(String),

    #[error("binding store error: {0}")]
    BindingStore(String),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl AnchorError {
    /// Process exit status used by the command-line driver.
    pub fn exit_code(&self) -> u8 {
        match self {
            AnchorError::TemplateMalformed(_)
            | AnchorError::InsufficientEntropy { .. }
            | AnchorError::KeyMalformed(_)
            | AnchorError::InvalidNationalId(_)
            | AnchorError::InvalidDid(_)
            | AnchorError::InvalidInput(_) => 2,
            AnchorError::NetworkMismatch { .. }
            | AnchorError::NetworkError(_)
            | AnchorError::ReceiptTimeout { .. } => 3,
            AnchorError::InsufficientFunds { .. } => 4,
            AnchorError::CryptoFailure(_) => 5,
            _ => 1,
        }
    }

    /// Stable snake_case tag for machine-readable error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            AnchorError::TemplateMalformed(_) => "template_malformed",
            AnchorError::InsufficientEntropy { .. } => "insufficient_entropy",
            AnchorError::CryptoFailure(_) => "crypto_failure",
            AnchorError::KeyMalformed(_) => "key_malformed",
            AnchorError::InvalidNationalId(_) => "invalid_national_id",
            AnchorError::InvalidDid(_) => "invalid_did",
            AnchorError::InvalidInput(_) => "invalid_input",
            AnchorError::NetworkMismatch { .. } => "network_mismatch",
            AnchorError::NetworkError(_) => "network_error",
            AnchorError::InsufficientFunds { .. } => "insufficient_funds",
            AnchorError::SubmissionRejected(_) => "submission_rejected",
            AnchorError::DeploymentFailed(_) => "deployment_failed",
            AnchorError::ReceiptTimeout { .. } => "receipt_timeout",
            AnchorError::Reverted { .. } => "reverted",
            AnchorError::RegistryNotBound => "registry_not_bound",
            AnchorError::OperatorKeyMissing => "operator_key_missing",
            AnchorError::ContractAbi(_) => "contract_abi",
            AnchorError::BindingStore(_) => "binding_store",
            AnchorError::Config(_) => "config",
        }
    }

    /// True for failures caused by caller-supplied input.
    pub fn is_validation(&self) -> bool {
        self.exit_code() == 2
    }
}
