// src/storage/binding_store.rs
//! Local registry binding store.
//!
//! Remembers which registry contract the process is anchored to so a restart
//! can skip deployment. The file is a plain `.env`-style key/value document:
//!
//! ```text
//! rpc_endpoint=http://127.0.0.1:8545
//! chain_id=31337
//! contract_address=0x5fbdb2315678afecb367f032d93f642f64180aa3
//! operator_public_address=0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266
//! abi_fingerprint=3c1e...
//! ```
//!
//! The operator private key is never written here.

use crate::error::{AnchorError, Result};
use ethers::types::Address;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const RPC_ENDPOINT: &str = "rpc_endpoint";
const CHAIN_ID: &str = "chain_id";
const CONTRACT_ADDRESS: &str = "contract_address";
const OPERATOR_ADDRESS: &str = "operator_public_address";
const ABI_FINGERPRINT: &str = "abi_fingerprint";

/// A registry contract bound to one chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractBinding {
    pub rpc_endpoint: String,
    pub chain_id: u64,
    pub contract_address: Address,
    pub abi_fingerprint: String,
    pub operator_address: Option<Address>,
}

impl ContractBinding {
    /// True when this binding can be reused on `chain_id` with the given ABI.
    pub fn is_compatible(&self, chain_id: u64, abi_fingerprint: &str) -> bool {
        self.chain_id == chain_id && self.abi_fingerprint == abi_fingerprint
    }
}

/// File-backed [`ContractBinding`] persistence.
#[derive(Clone, Debug)]
pub struct BindingStore {
    path: PathBuf,
}

impl BindingStore {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the binding, or `None` when no file exists yet.
    pub fn load(&self) -> Result<Option<ContractBinding>> {
        if !self.path.exists() {
            return Ok(None);
        }

        #[allow(deprecated)]
        let entries = dotenv::from_path_iter(&self.path)
            .map_err(|e| self.error("read", e))?
            .collect::<std::result::Result<HashMap<String, String>, _>>()
            .map_err(|e| self.error("parse", e))?;

        let field = |key: &str| {
            entries
                .get(key)
                .map(String::as_str)
                .ok_or_else(|| AnchorError::BindingStore(format!("{} is missing `{key}`", self.path.display())))
        };

        let chain_id = field(CHAIN_ID)?
            .parse::<u64>()
            .map_err(|e| self.error("parse chain_id in", e))?;
        let contract_address = field(CONTRACT_ADDRESS)?
            .parse::<Address>()
            .map_err(|e| self.error("parse contract_address in", e))?;
        let operator_address = match entries.get(OPERATOR_ADDRESS).filter(|v| !v.is_empty()) {
            Some(value) => Some(
                value
                    .parse::<Address>()
                    .map_err(|e| self.error("parse operator_public_address in", e))?,
            ),
            None => None,
        };

        Ok(Some(ContractBinding {
            rpc_endpoint: field(RPC_ENDPOINT)?.to_string(),
            chain_id,
            contract_address,
            abi_fingerprint: field(ABI_FINGERPRINT)?.to_string(),
            operator_address,
        }))
    }

    /// Writes the binding, replacing any previous one in a single rename.
    pub fn save(&self, binding: &ContractBinding) -> Result<()> {
        let mut body = String::new();
        let mut line = |key: &str, value: String| {
            body.push_str(key);
            body.push('=');
            body.push_str(&value);
            body.push('\n');
        };
        line(RPC_ENDPOINT, binding.rpc_endpoint.clone());
        line(CHAIN_ID, binding.chain_id.to_string());
        line(CONTRACT_ADDRESS, format!("{:#x}", binding.contract_address));
        if let Some(operator) = binding.operator_address {
            line(OPERATOR_ADDRESS, format!("{operator:#x}"));
        }
        line(ABI_FINGERPRINT, binding.abi_fingerprint.clone());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.error("create directory for", e))?;
        }

        let staging = self.path.with_extension("tmp");
        let mut file = fs::File::create(&staging).map_err(|e| self.error("create", e))?;
        file.write_all(body.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| self.error("write", e))?;
        fs::rename(&staging, &self.path).map_err(|e| self.error("replace", e))?;

        log::debug!("registry binding written to {}", self.path.display());
        Ok(())
    }

    fn error(&self, action: &str, cause: impl std::fmt::Display) -> AnchorError {
        AnchorError::BindingStore(format!("cannot {action} {}: {cause}", self.path.display()))
    }
}
