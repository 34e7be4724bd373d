// src/settings.rs
//! Runtime configuration.
//!
//! Sources, later ones winning:
//! 1. built-in defaults (a local development node)
//! 2. `voter-did.toml`, or the file passed with `--config`
//! 3. `VOTER_DID_*` environment variables, e.g. `VOTER_DID_RPC_ENDPOINT`
//!
//! The operator private key is deliberately not a setting: it is read from
//! `OPERATOR_PRIVATE_KEY` only and never written anywhere.

use crate::error::{AnchorError, Result};
use crate::services::orchestrator::OrchestratorSettings;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroizing;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "voter-did.toml";

/// Environment variable holding the operator key as hex.
pub const OPERATOR_KEY_ENV: &str = "OPERATOR_PRIVATE_KEY";

const ENV_PREFIX: &str = "VOTER_DID";

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub rpc_endpoint: String,
    pub expected_chain_id: u64,
    pub binding_path: PathBuf,
    pub registry_bytecode_path: PathBuf,
    pub receipt_deadline_secs: u64,
    pub poll_interval_ms: u64,
    pub allow_db_only: bool,
    pub skip_if_registered: bool,
    pub api_bind: SocketAddr,
}

impl Settings {
    /// Loads defaults, then the config file, then the environment.
    ///
    /// An explicit `config_path` must exist; the default file is optional.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let file = match config_path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = Self::defaults()?
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize::<Settings>()?;
        log::debug!("settings loaded: {settings:?}");
        Ok(settings)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(Config::builder()
            .set_default("rpc_endpoint", "http://127.0.0.1:8545")?
            .set_default("expected_chain_id", 31337_i64)?
            .set_default("binding_path", "voter-did-binding.env")?
            .set_default("registry_bytecode_path", "contracts/VoterDIDRegistry.bin")?
            .set_default("receipt_deadline_secs", 30_i64)?
            .set_default("poll_interval_ms", 500_i64)?
            .set_default("allow_db_only", false)?
            .set_default("skip_if_registered", true)?
            .set_default("api_bind", "127.0.0.1:3000")?)
    }

    pub fn receipt_deadline(&self) -> Duration {
        Duration::from_secs(self.receipt_deadline_secs)
    }

    /// Receipt polling cadence, never faster than twice per second.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(500))
    }

    pub fn orchestrator(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            allow_db_only: self.allow_db_only,
            skip_if_registered: self.skip_if_registered,
            receipt_deadline: self.receipt_deadline(),
        }
    }
}

/// Reads the operator key from [`OPERATOR_KEY_ENV`].
pub fn operator_key_from_env() -> Result<Zeroizing<String>> {
    std::env::var(OPERATOR_KEY_ENV)
        .map(Zeroizing::new)
        .map_err(|_| AnchorError::OperatorKeyMissing)
}
