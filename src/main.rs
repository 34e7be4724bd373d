// src/main.rs

//! # Voter DID - Command-Line Driver
//!
//! Field and back-office entry point for the anchoring core.
//!
//! ## Commands
//! - `init`: connect to the node and report the registry binding
//! - `import-key`: check the operator key and print its account address
//! - `deploy` / `bind`: create or adopt the VoterDID registry
//! - `register` / `verify` / `poll`: the registration workflow
//! - `inspect`: decode a template and derive its DID offline
//! - `serve`: run the HTTP API
//!
//! ## Environment Variables
//! - `OPERATOR_PRIVATE_KEY`: operator account key (hex), required to submit
//! - `VOTER_DID_*`: overrides for any setting, e.g. `VOTER_DID_RPC_ENDPOINT`
//! - `RUST_LOG`: log filter (default `info`)
//!
//! ## Exit Status
//! `0` success, `2` invalid input, `3` network or chain mismatch, `4`
//! insufficient funds, `5` cryptographic failure, `1` anything else
//! (including a failed registration or an unverified voter).

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use ethers::types::{Address, H256};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use voter_did_anchor::biometrics::template::{self, TemplateHeader, FORMAT_IDENTIFIER};
use voter_did_anchor::blockchain::evm_client::ChainClient;
use voter_did_anchor::contracts::voter_did_registry::{load_bytecode, RegistrationMatch};
use voter_did_anchor::models::progress::ProgressSink;
use voter_did_anchor::models::registration::{BindingState, RegistrationResult};
use voter_did_anchor::services::api_server::ApiServer;
use voter_did_anchor::services::orchestrator::Orchestrator;
use voter_did_anchor::settings::{operator_key_from_env, Settings};
use voter_did_anchor::storage::binding_store::BindingStore;
use voter_did_anchor::utils::serialization::{encode_base64, serialize_pretty};
use voter_did_anchor::wallet::key_derivation::derive_from_template;
use voter_did_anchor::wallet::operator_key::OperatorKey;
use voter_did_anchor::AnchorError;

#[derive(Parser)]
#[command(name = "voter-did", version, about = "Derive voter did:key identifiers and anchor them on an EVM registry")]
struct Cli {
    /// Configuration file (default: ./voter-did.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to the node and report whether a registry is bound
    Init,
    /// Validate OPERATOR_PRIVATE_KEY and print the operator address
    ImportKey,
    /// Deploy a new VoterDID registry and bind to it
    Deploy {
        /// Hex creation bytecode (default: registry_bytecode_path setting)
        #[arg(long)]
        bytecode: Option<PathBuf>,
    },
    /// Bind to an already deployed registry
    Bind {
        /// Registry contract address
        address: String,
    },
    /// Derive the voter DID from a template and anchor it
    Register {
        #[arg(long)]
        national_id: String,
        #[command(flatten)]
        template: TemplateSource,
    },
    /// Check a voter against the registry
    Verify {
        #[arg(long)]
        national_id: String,
        #[command(flatten)]
        template: OptionalTemplateSource,
    },
    /// Re-poll a pending registration
    Poll {
        #[arg(long)]
        tx_hash: String,
        #[arg(long)]
        national_id: String,
        #[arg(long)]
        did: String,
    },
    /// Print a template's header and DID without touching the network
    Inspect {
        #[command(flatten)]
        template: TemplateSource,
    },
    /// Serve the HTTP API
    Serve,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct TemplateSource {
    /// Base64 ISO/IEC 19794-2 template
    #[arg(long)]
    template: Option<String>,
    /// File holding the template, raw or base64
    #[arg(long)]
    template_file: Option<PathBuf>,
}

#[derive(Args)]
#[group(required = false, multiple = false)]
struct OptionalTemplateSource {
    /// Base64 ISO/IEC 19794-2 template
    #[arg(long)]
    template: Option<String>,
    /// File holding the template, raw or base64
    #[arg(long)]
    template_file: Option<PathBuf>,
}

#[derive(Serialize)]
struct InitReport {
    rpc_endpoint: String,
    chain_id: u64,
    binding: BindingState,
    contract_address: Option<Address>,
}

#[derive(Serialize)]
struct InspectReport {
    length: usize,
    header: TemplateHeader,
    did: String,
}

/// Main application entry point
#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = err
                .downcast_ref::<AnchorError>()
                .map_or(1, AnchorError::exit_code);
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Command::Init => {
            let store = BindingStore::at(&settings.binding_path);
            let (chain, binding) =
                ChainClient::connect(&settings.rpc_endpoint, settings.expected_chain_id, store).await?;
            print_json(&InitReport {
                rpc_endpoint: chain.rpc_endpoint().to_string(),
                chain_id: chain.chain_id(),
                binding,
                contract_address: chain.contract_address().await,
            })?;
        }
        Command::ImportKey => {
            let key = OperatorKey::from_hex(&operator_key_from_env()?)?;
            println!("{:#x}", key.address());
        }
        Command::Deploy { bytecode } => {
            let path = bytecode.unwrap_or_else(|| settings.registry_bytecode_path.clone());
            let code = load_bytecode(&path)?;
            let orchestrator = connect(&settings).await?;
            import_operator(&orchestrator).await?;
            let address = orchestrator.deploy_registry(code).await;
            orchestrator.shutdown().await;
            println!("{:#x}", address?);
        }
        Command::Bind { address } => {
            let address = parse_address(&address)?;
            let orchestrator = connect(&settings).await?;
            orchestrator.chain().bind_registry(address).await?;
            println!("{address:#x}");
        }
        Command::Register { national_id, template } => {
            let template_b64 = read_template(template.template, template.template_file)?;
            let orchestrator = connect(&settings)
                .await?
                .with_progress(ProgressSink::new(|milestone| log::info!("{milestone}")));
            import_operator(&orchestrator).await?;

            let result = orchestrator
                .register_with_cancel(&national_id, &template_b64, Some(cancel_on_ctrl_c()))
                .await;
            orchestrator.shutdown().await;
            let result = result?;
            print_json(&result)?;
            if matches!(result, RegistrationResult::Failed { .. }) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Verify { national_id, template } => {
            let template_b64 = match (template.template, template.template_file) {
                (None, None) => None,
                (inline, file) => Some(read_template(inline, file)?),
            };
            let orchestrator = connect(&settings).await?;
            let result = orchestrator.verify(&national_id, template_b64.as_deref()).await?;
            print_json(&result)?;
            if !result.verified {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Poll { tx_hash, national_id, did } => {
            let tx_hash = parse_tx_hash(&tx_hash)?;
            let orchestrator = connect(&settings).await?;
            let expected = RegistrationMatch::exact(&national_id, &did);
            let status = orchestrator
                .poll_receipt(tx_hash, &expected, Some(cancel_on_ctrl_c()))
                .await?;
            let block_number = status.into_result(tx_hash)?;
            println!("confirmed in block {block_number}");
        }
        Command::Inspect { template } => {
            let template_b64 = read_template(template.template, template.template_file)?;
            let template = template::decode_and_validate(&template_b64)?;
            let identity = derive_from_template(&template, &ProgressSink::none())?;
            print_json(&InspectReport {
                length: template.as_bytes().len(),
                header: template.header(),
                did: identity.did.to_string(),
            })?;
        }
        Command::Serve => {
            let orchestrator = Arc::new(connect(&settings).await?);
            match operator_key_from_env() {
                Ok(key) => {
                    orchestrator.import_operator_key(&key).await?;
                }
                Err(_) => log::warn!("OPERATOR_PRIVATE_KEY not set; registrations will be refused"),
            }
            let server = ApiServer::new(orchestrator.clone());
            tokio::select! {
                served = server.run(settings.api_bind) => served.context("API server failed")?,
                _ = tokio::signal::ctrl_c() => log::info!("interrupted"),
            }
            orchestrator.shutdown().await;
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn connect(settings: &Settings) -> anyhow::Result<Orchestrator> {
    let store = BindingStore::at(&settings.binding_path);
    let (chain, binding) =
        ChainClient::connect(&settings.rpc_endpoint, settings.expected_chain_id, store).await?;
    log::debug!("binding state: {binding:?}");
    Ok(Orchestrator::new(
        chain.with_poll_interval(settings.poll_interval()),
        settings.orchestrator(),
    ))
}

async fn import_operator(orchestrator: &Orchestrator) -> anyhow::Result<Address> {
    let key = operator_key_from_env().context("OPERATOR_PRIVATE_KEY must be set")?;
    Ok(orchestrator.import_operator_key(&key).await?)
}

/// Flips to `true` on Ctrl-C so a receipt wait ends as pending.
fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted; the transaction may still be mined");
            let _ = cancel_tx.send(true);
        }
    });
    cancel_rx
}

fn read_template(inline: Option<String>, file: Option<PathBuf>) -> anyhow::Result<String> {
    match (inline, file) {
        (Some(template_b64), _) => Ok(template_b64),
        (None, Some(path)) => read_template_file(&path),
        (None, None) => anyhow::bail!("a template is required"),
    }
}

/// Accepts a raw ISO record or its base64 text.
fn read_template_file(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    if bytes.starts_with(&FORMAT_IDENTIFIER) {
        return Ok(encode_base64(&bytes));
    }
    String::from_utf8(bytes)
        .map_err(|_| AnchorError::TemplateMalformed(format!("{} is neither an ISO record nor base64", path.display())).into())
}

fn parse_address(value: &str) -> Result<Address, AnchorError> {
    value
        .parse::<Address>()
        .map_err(|e| AnchorError::InvalidInput(format!("invalid registry address {value}: {e}")))
}

fn parse_tx_hash(value: &str) -> Result<H256, AnchorError> {
    value
        .parse::<H256>()
        .map_err(|e| AnchorError::InvalidInput(format!("invalid transaction hash {value}: {e}")))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serialize_pretty(value)?);
    Ok(())
}
