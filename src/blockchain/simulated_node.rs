// src/blockchain/simulated_node.rs
//! In-memory EVM node for tests.
//!
//! Speaks just enough Ethereum JSON-RPC for [`ChainClient`](super::evm_client::ChainClient):
//! signed raw transactions are decoded and their sender recovered, nonces and
//! balances are enforced, and `registerDID`/`getDID` run against an in-memory
//! mapping that emits `DIDRegistered` logs. Mining is instant by default or
//! manual via [`SimulatedNode::mine`].

use crate::contracts::voter_did_registry::VoterDidRegistry;
use crate::utils::crypto::keccak256;
use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, JsonRpcError, ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Log, NameOrAddress, TransactionReceipt, H256, U256, U64};
use ethers::utils::{get_contract_address, rlp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

pub const GAS_PRICE: u64 = 1_000_000_000;
const DEPLOY_GAS: u64 = 500_000;
const REGISTER_GAS: u64 = 90_000;
const TRANSFER_GAS: u64 = 21_000;

/// When accepted transactions are included in a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MiningMode {
    /// Every transaction is mined in its own block on acceptance.
    Instant,
    /// Transactions wait in the pool until [`SimulatedNode::mine`].
    Manual,
}

#[derive(Debug, thiserror::Error)]
pub enum SimulatedNodeError {
    #[error("{0}")]
    Rpc(JsonRpcError),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl RpcError for SimulatedNodeError {
    fn as_error_response(&self) -> Option<&JsonRpcError> {
        match self {
            SimulatedNodeError::Rpc(e) => Some(e),
            _ => None,
        }
    }

    fn as_serde_error(&self) -> Option<&serde_json::Error> {
        match self {
            SimulatedNodeError::Serde(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SimulatedNodeError> for ProviderError {
    fn from(e: SimulatedNodeError) -> Self {
        ProviderError::JsonRpcClientError(Box::new(e))
    }
}

fn rpc_error(message: impl Into<String>) -> SimulatedNodeError {
    SimulatedNodeError::Rpc(JsonRpcError {
        code: -32000,
        message: message.into(),
        data: None,
    })
}

/// Fields of a call or gas estimation request the node looks at.
#[derive(Debug, Deserialize)]
struct CallRequest {
    from: Option<Address>,
    to: Option<Address>,
    data: Option<Bytes>,
}

#[derive(Debug)]
struct PooledTx {
    hash: H256,
    from: Address,
    to: Option<Address>,
    nonce: U256,
    gas: U256,
    data: Bytes,
}

#[derive(Debug)]
struct ChainState {
    chain_id: u64,
    mining: MiningMode,
    offline: bool,
    revert_next: bool,
    emit_events: bool,
    block_number: u64,
    balances: HashMap<Address, U256>,
    nonces: HashMap<Address, U256>,
    pool: Vec<PooledTx>,
    receipts: HashMap<H256, TransactionReceipt>,
    registries: HashMap<Address, HashMap<String, String>>,
    calls: Vec<String>,
}

/// Cloneable handle to one simulated chain.
#[derive(Clone, Debug)]
pub struct SimulatedNode {
    state: Arc<Mutex<ChainState>>,
    registry: VoterDidRegistry,
}

impl SimulatedNode {
    pub fn new(chain_id: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(ChainState {
                chain_id,
                mining: MiningMode::Instant,
                offline: false,
                revert_next: false,
                emit_events: true,
                block_number: 0,
                balances: HashMap::new(),
                nonces: HashMap::new(),
                pool: Vec::new(),
                receipts: HashMap::new(),
                registries: HashMap::new(),
                calls: Vec::new(),
            })),
            registry: VoterDidRegistry::new(),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().unwrap()
    }

    pub fn fund(&self, account: Address, wei: U256) {
        self.state().balances.insert(account, wei);
    }

    pub fn set_mining(&self, mode: MiningMode) {
        self.state().mining = mode;
    }

    /// Makes every request fail at the transport level.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// The next executed registry call reverts.
    pub fn revert_next(&self) {
        self.state().revert_next = true;
    }

    pub fn emit_events(&self, enabled: bool) {
        self.state().emit_events = enabled;
    }

    /// Places a registry at a fixed address without a deployment transaction.
    pub fn install_registry(&self) -> Address {
        let address = Address::repeat_byte(0x5f);
        self.state().registries.entry(address).or_default();
        address
    }

    /// Mines all pooled transactions into one block. Returns its number.
    pub fn mine(&self) -> u64 {
        let mut state = self.state();
        state.mine_block(&self.registry)
    }

    pub fn pending_count(&self) -> usize {
        self.state().pool.len()
    }

    /// Advances an account's nonce as if it sent a transaction elsewhere.
    pub fn bump_nonce(&self, account: Address) {
        *self.state().nonces.entry(account).or_default() += U256::one();
    }

    pub fn nonce_of(&self, account: Address) -> u64 {
        self.state().nonce(account).as_u64()
    }

    /// DID stored under `national_id` in any installed registry.
    pub fn stored_did(&self, national_id: &str) -> Option<String> {
        self.state()
            .registries
            .values()
            .find_map(|entries| entries.get(national_id).cloned())
            .filter(|did| !did.is_empty())
    }

    /// Every RPC method received, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state().calls.iter().filter(|m| *m == method).count()
    }

    fn handle(&self, method: &str, params: &Value) -> Result<Value, SimulatedNodeError> {
        let mut state = self.state();
        state.calls.push(method.to_string());
        if state.offline {
            return Err(SimulatedNodeError::Transport("connection refused".into()));
        }

        match method {
            "eth_chainId" => to_json(U64::from(state.chain_id)),
            "eth_gasPrice" => to_json(U256::from(GAS_PRICE)),
            "eth_getBalance" => {
                let account: Address = param(params, 0)?;
                to_json(state.balance(account))
            }
            "eth_getTransactionCount" => {
                let account: Address = param(params, 0)?;
                to_json(state.nonce(account))
            }
            "eth_estimateGas" => {
                let call: CallRequest = param(params, 0)?;
                to_json(state.estimate_gas(&self.registry, &call)?)
            }
            "eth_sendRawTransaction" => {
                let raw: Bytes = param(params, 0)?;
                let hash = state.accept(&raw)?;
                if state.mining == MiningMode::Instant {
                    state.mine_block(&self.registry);
                }
                to_json(hash)
            }
            "eth_getTransactionReceipt" => {
                let hash: H256 = param(params, 0)?;
                to_json(state.receipts.get(&hash))
            }
            "eth_call" => {
                let call: CallRequest = param(params, 0)?;
                to_json(state.call(&self.registry, &call)?)
            }
            other => Err(SimulatedNodeError::Rpc(JsonRpcError {
                code: -32601,
                message: format!("the method {other} does not exist/is not available"),
                data: None,
            })),
        }
    }
}

impl ChainState {
    fn balance(&self, account: Address) -> U256 {
        self.balances.get(&account).copied().unwrap_or_default()
    }

    fn nonce(&self, account: Address) -> U256 {
        self.nonces.get(&account).copied().unwrap_or_default()
    }

    fn gas_for(&self, registry: &VoterDidRegistry, to: Option<Address>, data: &[u8]) -> Result<u64, SimulatedNodeError> {
        match to {
            None => Ok(DEPLOY_GAS),
            Some(to) if self.registries.contains_key(&to) => registry
                .decode_register(data)
                .map(|_| REGISTER_GAS)
                .map_err(|_| rpc_error("execution reverted")),
            Some(_) => Ok(TRANSFER_GAS),
        }
    }

    fn estimate_gas(&self, registry: &VoterDidRegistry, call: &CallRequest) -> Result<U256, SimulatedNodeError> {
        let data = call.data.clone().unwrap_or_default();
        let gas = self.gas_for(registry, call.to, &data)?;
        let from = call.from.unwrap_or_default();
        if self.balance(from) < U256::from(gas) * U256::from(GAS_PRICE) {
            return Err(rpc_error("insufficient funds for gas * price + value"));
        }
        Ok(U256::from(gas))
    }

    fn accept(&mut self, raw: &Bytes) -> Result<H256, SimulatedNodeError> {
        let (tx, signature) = TypedTransaction::decode_signed(&rlp::Rlp::new(raw.as_ref()))
            .map_err(|e| rpc_error(format!("invalid transaction: {e}")))?;
        let from = signature
            .recover(tx.sighash())
            .map_err(|e| rpc_error(format!("invalid sender: {e}")))?;

        if tx.chain_id().map(|id| id.as_u64()) != Some(self.chain_id) {
            return Err(rpc_error("invalid chain id for signer"));
        }

        let nonce = tx.nonce().copied().unwrap_or_default();
        let expected = self.nonce(from);
        if nonce < expected {
            return Err(rpc_error(format!("nonce too low: next nonce {expected}, tx nonce {nonce}")));
        }
        if nonce > expected {
            return Err(rpc_error(format!("nonce too high: next nonce {expected}, tx nonce {nonce}")));
        }

        let gas = tx.gas().copied().unwrap_or_default();
        let cost = gas * tx.gas_price().unwrap_or_default();
        let balance = self.balance(from);
        if balance < cost {
            return Err(rpc_error(format!(
                "insufficient funds for gas * price + value: balance {balance}, tx cost {cost}"
            )));
        }

        let hash = H256::from(keccak256(raw.as_ref()));
        if self.receipts.contains_key(&hash) || self.pool.iter().any(|p| p.hash == hash) {
            return Err(rpc_error("already known"));
        }

        self.balances.insert(from, balance - cost);
        self.nonces.insert(from, expected + U256::one());
        let to = match tx.to() {
            Some(NameOrAddress::Address(address)) => Some(*address),
            _ => None,
        };
        self.pool.push(PooledTx {
            hash,
            from,
            to,
            nonce,
            gas,
            data: tx.data().cloned().unwrap_or_default(),
        });
        Ok(hash)
    }

    fn call(&self, registry: &VoterDidRegistry, call: &CallRequest) -> Result<Bytes, SimulatedNodeError> {
        let Some(entries) = call.to.and_then(|to| self.registries.get(&to)) else {
            return Ok(Bytes::new());
        };
        let data = call.data.clone().unwrap_or_default();
        let national_id = registry
            .decode_get_did_call(&data)
            .map_err(|_| rpc_error("execution reverted"))?;
        let stored = entries.get(&national_id).cloned().unwrap_or_default();
        Ok(Bytes::from(ethers::abi::encode(&[ethers::abi::Token::String(stored)])))
    }

    fn mine_block(&mut self, registry: &VoterDidRegistry) -> u64 {
        self.block_number += 1;
        let block = self.block_number;
        let pooled = std::mem::take(&mut self.pool);
        for (index, tx) in pooled.into_iter().enumerate() {
            let receipt = self.execute(registry, tx, block, index as u64);
            self.receipts.insert(receipt.transaction_hash, receipt);
        }
        block
    }

    fn execute(&mut self, registry: &VoterDidRegistry, tx: PooledTx, block: u64, index: u64) -> TransactionReceipt {
        let mut receipt = TransactionReceipt {
            transaction_hash: tx.hash,
            transaction_index: U64::from(index),
            block_hash: Some(H256::from_low_u64_be(block)),
            block_number: Some(U64::from(block)),
            from: tx.from,
            to: tx.to,
            gas_used: Some(tx.gas),
            status: Some(U64::one()),
            ..Default::default()
        };

        let Some(to) = tx.to else {
            let address = get_contract_address(tx.from, tx.nonce);
            self.registries.entry(address).or_default();
            receipt.contract_address = Some(address);
            return receipt;
        };

        if !self.registries.contains_key(&to) {
            return receipt;
        }

        let decoded = registry.decode_register(&tx.data);
        if std::mem::take(&mut self.revert_next) || decoded.is_err() {
            receipt.status = Some(U64::zero());
            return receipt;
        }

        if let Ok((national_id, did)) = decoded {
            if self.emit_events {
                receipt.logs.push(Log {
                    address: to,
                    topics: vec![
                        VoterDidRegistry::did_registered_topic(),
                        VoterDidRegistry::national_id_topic(&national_id),
                    ],
                    data: VoterDidRegistry::encode_event_data(&did),
                    block_hash: receipt.block_hash,
                    block_number: receipt.block_number,
                    transaction_hash: Some(tx.hash),
                    transaction_index: Some(receipt.transaction_index),
                    log_index: Some(U256::zero()),
                    ..Default::default()
                });
            }
            self.registries.entry(to).or_default().insert(national_id, did);
        }
        receipt
    }
}

fn param<T: DeserializeOwned>(params: &Value, index: usize) -> Result<T, SimulatedNodeError> {
    let value = params.get(index).cloned().unwrap_or(Value::Null);
    Ok(serde_json::from_value(value)?)
}

fn to_json<T: Serialize>(value: T) -> Result<Value, SimulatedNodeError> {
    Ok(serde_json::to_value(value)?)
}

#[async_trait]
impl JsonRpcClient for SimulatedNode {
    type Error = SimulatedNodeError;

    async fn request<T, R>(&self, method: &str, params: T) -> Result<R, Self::Error>
    where
        T: Debug + Serialize + Send + Sync,
        R: DeserializeOwned + Send,
    {
        let params = serde_json::to_value(params)?;
        let result = self.handle(method, &params)?;
        Ok(serde_json::from_value(result)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::{Middleware, Provider};

    #[tokio::test]
    async fn test_unknown_method_is_rpc_error() {
        let node = SimulatedNode::new(31337);
        let provider = Provider::new(node.clone());
        let err = provider.get_block_number().await.unwrap_err();
        assert!(err.as_error_response().is_some());
        assert_eq!(node.calls(), vec!["eth_blockNumber".to_string()]);
    }

    #[tokio::test]
    async fn test_offline_node_is_transport_error() {
        let node = SimulatedNode::new(31337);
        node.set_offline(true);
        let err = Provider::new(node).get_chainid().await.unwrap_err();
        assert!(err.as_error_response().is_none());
    }

    #[test]
    fn test_manual_mining_holds_pool() {
        let node = SimulatedNode::new(31337);
        node.set_mining(MiningMode::Manual);
        assert_eq!(node.pending_count(), 0);
        assert_eq!(node.mine(), 1);
        assert_eq!(node.mine(), 2);
    }
}
