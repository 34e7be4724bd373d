// src/blockchain/evm_client.rs
//! EVM chain client for the VoterDID registry.
//!
//! Wraps an ethers [`Provider`] over any JSON-RPC transport and adds what the
//! registry workflow needs on top of raw RPC:
//! - chain id check and restoration of a persisted registry binding
//! - a single in-memory operator key that signs every transaction
//! - locally tracked nonces, one submission at a time per operator
//! - classification of node errors into [`AnchorError`] variants
//! - receipt polling with a deadline, backoff and cancellation
//!
//! Transactions are legacy EIP-155 transactions signed locally and sent with
//! `eth_sendRawTransaction`, so no node-side account management is needed.

use crate::contracts::voter_did_registry::{RegistrationMatch, VoterDidRegistry};
use crate::error::{AnchorError, Result};
use crate::models::registration::{BindingState, ReceiptStatus};
use crate::storage::binding_store::{BindingStore, ContractBinding};
use crate::wallet::operator_key::OperatorKey;
use ethers::providers::{Http, JsonRpcClient, Middleware, Provider, ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, Bytes, TransactionReceipt, TransactionRequest, H256, U256, U64};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::{sleep_until, timeout_at, Instant};

/// Fastest receipt polling cadence: at most two queries per second.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound for the retry delay after failed receipt queries.
pub const MAX_POLL_BACKOFF: Duration = Duration::from_secs(8);

/// Stand-in for deadlines too distant to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// How a receipt wait ended.
enum ReceiptWait {
    Receipt(TransactionReceipt),
    TimedOut,
    Cancelled,
}

/// JSON-RPC client bound to one chain, one registry and one operator key.
pub struct ChainClient<P = Http> {
    provider: Provider<P>,
    rpc_endpoint: String,
    chain_id: u64,
    store: BindingStore,
    registry: VoterDidRegistry,
    contract: RwLock<Option<Address>>,
    operator: RwLock<Option<Arc<OperatorKey>>>,
    /// Next nonce for the operator. Held for the whole of a submission.
    nonce: Mutex<Option<U256>>,
    poll_interval: Duration,
}

impl ChainClient<Http> {
    /// Opens an HTTP JSON-RPC connection and initializes the client.
    pub async fn connect(
        rpc_endpoint: &str,
        expected_chain_id: u64,
        store: BindingStore,
    ) -> Result<(Self, BindingState)> {
        let provider = Provider::<Http>::try_from(rpc_endpoint).map_err(|e| {
            AnchorError::NetworkError(format!("invalid RPC endpoint {rpc_endpoint}: {e}"))
        })?;
        Self::initialize(provider, rpc_endpoint, expected_chain_id, store).await
    }
}

impl<P: JsonRpcClient> ChainClient<P> {
    /// Checks the chain id and restores a compatible persisted binding.
    ///
    /// # Errors
    /// `NetworkMismatch` when the node serves another chain; nothing is
    /// written in that case.
    pub async fn initialize(
        provider: Provider<P>,
        rpc_endpoint: &str,
        expected_chain_id: u64,
        store: BindingStore,
    ) -> Result<(Self, BindingState)> {
        let observed = provider.get_chainid().await.map_err(network_error)?;
        if observed > U256::from(u64::MAX) {
            return Err(AnchorError::NetworkError(format!("node reported chain id {observed} outside u64")));
        }
        let observed = observed.low_u64();
        if observed != expected_chain_id {
            return Err(AnchorError::NetworkMismatch {
                expected: expected_chain_id,
                observed,
            });
        }

        let fingerprint = VoterDidRegistry::abi_fingerprint();
        let contract = match store.load()? {
            Some(binding) if binding.is_compatible(observed, &fingerprint) => Some(binding.contract_address),
            Some(binding) => {
                log::warn!(
                    "ignoring registry binding in {} (chain {}, different ABI or chain)",
                    store.path().display(),
                    binding.chain_id
                );
                None
            }
            None => None,
        };

        let state = match contract {
            Some(address) => {
                log::info!("registry bound at {address:#x} on chain {observed}");
                BindingState::Ready
            }
            None => {
                log::info!("connected to chain {observed}; no registry bound");
                BindingState::NotBound
            }
        };

        let client = Self {
            provider,
            rpc_endpoint: rpc_endpoint.to_string(),
            chain_id: observed,
            store,
            registry: VoterDidRegistry::new(),
            contract: RwLock::new(contract),
            operator: RwLock::new(None),
            nonce: Mutex::new(None),
            poll_interval: MIN_POLL_INTERVAL,
        };
        Ok((client, state))
    }

    /// Sets the receipt polling cadence, never faster than [`MIN_POLL_INTERVAL`].
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn rpc_endpoint(&self) -> &str {
        &self.rpc_endpoint
    }

    pub async fn contract_address(&self) -> Option<Address> {
        *self.contract.read().await
    }

    pub async fn operator_address(&self) -> Option<Address> {
        self.operator.read().await.as_ref().map(|key| key.address())
    }

    /// Loads the operator key from raw scalar bytes.
    pub async fn import_key(&self, private_key: &[u8]) -> Result<Address> {
        let key = OperatorKey::from_bytes(private_key)?;
        Ok(self.install_key(key).await)
    }

    /// Installs an already parsed operator key, replacing any previous one.
    pub async fn install_key(&self, key: OperatorKey) -> Address {
        let key = key.with_chain_id(self.chain_id);
        let address = key.address();
        *self.operator.write().await = Some(Arc::new(key));
        *self.nonce.lock().await = None;
        log::info!("operator account {address:#x} loaded");
        address
    }

    /// Drops the operator key. Its scalar is zeroed once the last in-flight
    /// submission releases it.
    pub async fn forget_operator_key(&self) {
        if self.operator.write().await.take().is_some() {
            log::debug!("operator key released");
        }
        *self.nonce.lock().await = None;
    }

    /// Binds to an already deployed registry and persists the binding.
    pub async fn bind_registry(&self, address: Address) -> Result<()> {
        let binding = ContractBinding {
            rpc_endpoint: self.rpc_endpoint.clone(),
            chain_id: self.chain_id,
            contract_address: address,
            abi_fingerprint: VoterDidRegistry::abi_fingerprint(),
            operator_address: self.operator_address().await,
        };
        self.store.save(&binding)?;
        *self.contract.write().await = Some(address);
        log::info!("registry bound at {address:#x}");
        Ok(())
    }

    /// Deploys the registry from creation bytecode and binds to it.
    ///
    /// # Errors
    /// `DeploymentFailed` when the node rejects the deployment or no receipt
    /// with a contract address arrives before `deadline`. Funding and
    /// transport failures keep their own variants.
    pub async fn deploy_registry(&self, bytecode: Bytes, deadline: Duration) -> Result<Address> {
        let operator = self.operator().await?;
        let tx_hash = self.submit(&operator, None, bytecode).await.map_err(|e| match e {
            AnchorError::SubmissionRejected(reason) => AnchorError::DeploymentFailed(reason),
            other => other,
        })?;
        log::debug!("registry deployment submitted in {tx_hash:#x}");

        let receipt = match self.wait_for_receipt(tx_hash, deadline, None).await {
            ReceiptWait::Receipt(receipt) => receipt,
            ReceiptWait::TimedOut | ReceiptWait::Cancelled => {
                return Err(AnchorError::DeploymentFailed(format!(
                    "no receipt for deployment {tx_hash:#x} within {}s",
                    deadline.as_secs()
                )))
            }
        };

        let address = match (receipt.status, receipt.contract_address) {
            (Some(status), Some(address)) if status == U64::one() => address,
            _ => {
                return Err(AnchorError::DeploymentFailed(format!(
                    "deployment {tx_hash:#x} produced no runtime contract"
                )))
            }
        };
        self.bind_registry(address).await?;
        Ok(address)
    }

    /// Submits `registerDID(national_id, did)` and returns once the node
    /// accepts the transaction.
    pub async fn register(&self, national_id: &str, did: &str) -> Result<H256> {
        let contract = self.require_contract().await?;
        let operator = self.operator().await?;
        let calldata = self.registry.encode_register(national_id, did)?;
        self.submit(&operator, Some(contract), calldata).await
    }

    /// Polls for the receipt of a registration until `deadline` elapses or
    /// `cancel` flips to `true`.
    ///
    /// A receipt counts as confirmed only when it succeeded and carries a
    /// `DIDRegistered` event from the bound registry satisfying `expected`.
    pub async fn poll_receipt(
        &self,
        tx_hash: H256,
        expected: &RegistrationMatch,
        deadline: Duration,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ReceiptStatus> {
        let contract = self.require_contract().await?;
        let status = match self.wait_for_receipt(tx_hash, deadline, cancel).await {
            ReceiptWait::Receipt(receipt) => self.judge_receipt(&receipt, contract, expected),
            ReceiptWait::TimedOut => ReceiptStatus::TimedOut,
            ReceiptWait::Cancelled => ReceiptStatus::Cancelled,
        };
        log::debug!("receipt poll for {tx_hash:#x} ended as {status:?}");
        Ok(status)
    }

    /// Reads the DID stored for `national_id`; `None` when the slot is empty.
    pub async fn get_did(&self, national_id: &str) -> Result<Option<String>> {
        let contract = self.require_contract().await?;
        let call: TypedTransaction = TransactionRequest::new()
            .to(contract)
            .data(self.registry.encode_get_did(national_id)?)
            .into();

        let output = self.provider.call(&call, None).await.map_err(network_error)?;
        let stored = self.registry.decode_get_did(&output)?;
        Ok(Some(stored).filter(|did| !did.is_empty()))
    }

    async fn operator(&self) -> Result<Arc<OperatorKey>> {
        self.operator
            .read()
            .await
            .clone()
            .ok_or(AnchorError::OperatorKeyMissing)
    }

    async fn require_contract(&self) -> Result<Address> {
        self.contract_address().await.ok_or(AnchorError::RegistryNotBound)
    }

    /// Builds, signs and sends one transaction while holding the nonce lock,
    /// so transactions from this operator reach the node in call order.
    async fn submit(&self, operator: &OperatorKey, to: Option<Address>, data: Bytes) -> Result<H256> {
        let mut next_nonce = self.nonce.lock().await;
        let outcome = self.sign_and_send(operator, to, data, *next_nonce).await;
        *next_nonce = match &outcome {
            Ok((_, nonce)) => Some(nonce + 1),
            // Unknown whether the node saw it; refetch next time.
            Err(_) => None,
        };
        outcome.map(|(tx_hash, _)| tx_hash)
    }

    async fn sign_and_send(
        &self,
        operator: &OperatorKey,
        to: Option<Address>,
        data: Bytes,
        cached_nonce: Option<U256>,
    ) -> Result<(H256, U256)> {
        let account = operator.address();
        let nonce = match cached_nonce {
            Some(nonce) => nonce,
            None => self
                .provider
                .get_transaction_count(account, Some(BlockNumber::Pending.into()))
                .await
                .map_err(network_error)?,
        };

        let mut request = TransactionRequest::new()
            .from(account)
            .data(data)
            .nonce(nonce)
            .chain_id(self.chain_id);
        if let Some(to) = to {
            request = request.to(to);
        }
        let mut tx: TypedTransaction = request.into();

        let gas = match self.provider.estimate_gas(&tx, None).await {
            Ok(gas) => gas,
            Err(e) => return Err(self.classify_submission_error(e, account).await),
        };
        let gas_price = self.provider.get_gas_price().await.map_err(network_error)?;
        tx.set_gas(gas);
        tx.set_gas_price(gas_price);

        let signature = operator.sign_transaction(&tx).await?;
        let raw = tx.rlp_signed(&signature);
        let tx_hash = match self.provider.send_raw_transaction(raw).await {
            Ok(pending) => pending.tx_hash(),
            Err(e) => return Err(self.classify_submission_error(e, account).await),
        };

        log::debug!("submitted {tx_hash:#x} from {account:#x} with nonce {nonce}");
        Ok((tx_hash, nonce))
    }

    /// Maps a provider failure on the submission path onto the error taxonomy.
    async fn classify_submission_error(&self, err: ProviderError, account: Address) -> AnchorError {
        let Some(response) = err.as_error_response() else {
            return network_error(err);
        };
        if !is_insufficient_funds(&response.message) {
            return AnchorError::SubmissionRejected(response.message.clone());
        }
        match self.provider.get_balance(account, None).await {
            Ok(balance) => AnchorError::InsufficientFunds { account, balance },
            Err(e) => network_error(e),
        }
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        deadline: Duration,
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> ReceiptWait {
        let deadline = instant_after(deadline);
        let mut backoff = self.poll_interval;

        loop {
            if cancel.as_ref().map_or(false, |rx| *rx.borrow()) {
                return ReceiptWait::Cancelled;
            }

            let query = self.provider.get_transaction_receipt(tx_hash);
            let delay = tokio::select! {
                answer = timeout_at(deadline, query) => match answer {
                    Err(_) => return ReceiptWait::TimedOut,
                    Ok(Ok(Some(receipt))) => return ReceiptWait::Receipt(receipt),
                    Ok(Ok(None)) => {
                        backoff = self.poll_interval;
                        self.poll_interval
                    }
                    Ok(Err(e)) => {
                        log::debug!("receipt query for {tx_hash:#x} failed, retrying in {backoff:?}: {e}");
                        let delay = backoff;
                        backoff = (backoff * 2).min(MAX_POLL_BACKOFF);
                        delay
                    }
                },
                _ = cancelled(&mut cancel) => return ReceiptWait::Cancelled,
            };

            let wake = instant_after(delay).min(deadline);
            tokio::select! {
                _ = sleep_until(wake) => {}
                _ = cancelled(&mut cancel) => return ReceiptWait::Cancelled,
            }
            if Instant::now() >= deadline {
                return ReceiptWait::TimedOut;
            }
        }
    }

    fn judge_receipt(
        &self,
        receipt: &TransactionReceipt,
        contract: Address,
        expected: &RegistrationMatch,
    ) -> ReceiptStatus {
        if receipt.status != Some(U64::one()) {
            return ReceiptStatus::Failed {
                reason: "transaction reverted".into(),
            };
        }
        match self.registry.find_registration(&receipt.logs, contract, expected) {
            Some(_) => ReceiptStatus::Confirmed {
                block_number: receipt.block_number.map(|n| n.as_u64()).unwrap_or_default(),
            },
            None => ReceiptStatus::Failed {
                reason: "receipt carries no matching DIDRegistered event".into(),
            },
        }
    }
}

/// Resolves once `cancel` holds `true`; never resolves without a receiver
/// or after the sender is gone.
async fn cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = cancel else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

fn is_insufficient_funds(message: &str) -> bool {
    message.to_ascii_lowercase().contains("insufficient funds")
}

fn instant_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay).unwrap_or(now + FAR_FUTURE)
}

fn network_error(err: impl std::fmt::Display) -> AnchorError {
    AnchorError::NetworkError(err.to_string())
}
