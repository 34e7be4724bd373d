// src/contracts/voter_did_registry.rs
//! VoterDID registry smart contract interface.
//!
//! Provides the ABI layer for the registry that stores one DID per national
//! identifier:
//!
//! ```text
//! event    DIDRegistered(string indexed nationalId, string did)
//! mapping  (string => string) voterDIDs
//! function registerDID(string nationalId, string did)
//! function getDID(string nationalId) view returns (string)
//! ```
//!
//! Calldata is built and decoded here; transport lives in
//! [`crate::blockchain::evm_client`].

use crate::error::{AnchorError, Result};
use crate::utils::crypto::keccak256;
use crate::utils::serialization::decode_hex;
use ethers_contract::BaseContract;
use ethers_core::abi::{self, Abi, ParamType, Token};
use ethers_core::types::{Address, Bytes, Log, H256};
use ethers_core::utils::hex;
use once_cell::sync::Lazy;
use std::path::Path;

/// ABI document compiled into the binary.
pub const REGISTRY_ABI_JSON: &str = include_str!("abi/VoterDIDRegistry.json");

/// Canonical signature of the registration event.
pub const DID_REGISTERED_SIGNATURE: &str = "DIDRegistered(string,string)";

/// Longest national identifier accepted, in bytes.
pub const MAX_NATIONAL_ID_LEN: usize = 64;

static REGISTRY_ABI: Lazy<Abi> = Lazy::new(|| {
    serde_json::from_str(REGISTRY_ABI_JSON).expect("compiled-in registry ABI is valid JSON")
});

/// Which `DIDRegistered` event a receipt must carry to count as confirmed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistrationMatch {
    pub national_id: Option<String>,
    pub did: Option<String>,
}

impl RegistrationMatch {
    pub fn exact(national_id: &str, did: &str) -> Self {
        Self {
            national_id: Some(national_id.to_string()),
            did: Some(did.to_string()),
        }
    }
}

/// Registry ABI wrapper.
#[derive(Clone, Debug)]
pub struct VoterDidRegistry {
    contract: BaseContract,
}

impl Default for VoterDidRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VoterDidRegistry {
    pub fn new() -> Self {
        Self {
            contract: BaseContract::from(REGISTRY_ABI.clone()),
        }
    }

    /// Lowercase hex Keccak-256 of the ABI document.
    pub fn abi_fingerprint() -> String {
        hex::encode(keccak256(REGISTRY_ABI_JSON.as_bytes()))
    }

    pub fn abi(&self) -> &Abi {
        self.contract.abi()
    }

    /// Calldata for `registerDID(nationalId, did)`.
    pub fn encode_register(&self, national_id: &str, did: &str) -> Result<Bytes> {
        self.contract
            .encode("registerDID", (national_id.to_string(), did.to_string()))
            .map_err(|e| AnchorError::ContractAbi(e.to_string()))
    }

    /// Calldata for `getDID(nationalId)`.
    pub fn encode_get_did(&self, national_id: &str) -> Result<Bytes> {
        self.contract
            .encode("getDID", (national_id.to_string(),))
            .map_err(|e| AnchorError::ContractAbi(e.to_string()))
    }

    /// Decodes the string returned by `getDID`.
    pub fn decode_get_did(&self, output: &[u8]) -> Result<String> {
        self.contract
            .decode_output::<String, _>("getDID", output)
            .map_err(|e| AnchorError::ContractAbi(format!("malformed getDID return data: {e}")))
    }

    /// Decodes `registerDID` calldata (selector included) into `(nationalId, did)`.
    pub fn decode_register(&self, calldata: &[u8]) -> Result<(String, String)> {
        self.contract
            .decode::<(String, String), _>("registerDID", calldata)
            .map_err(|e| AnchorError::ContractAbi(e.to_string()))
    }

    /// Decodes `getDID` calldata (selector included) into the national id.
    pub fn decode_get_did_call(&self, calldata: &[u8]) -> Result<String> {
        self.contract
            .decode::<String, _>("getDID", calldata)
            .map_err(|e| AnchorError::ContractAbi(e.to_string()))
    }

    /// 4-byte selector of a registry function.
    pub fn selector(&self, function: &str) -> Result<[u8; 4]> {
        self.contract
            .abi()
            .function(function)
            .map(|f| f.short_signature())
            .map_err(|e| AnchorError::ContractAbi(e.to_string()))
    }

    /// Topic 0 of `DIDRegistered`.
    pub fn did_registered_topic() -> H256 {
        H256::from(keccak256(DID_REGISTERED_SIGNATURE.as_bytes()))
    }

    /// Topic 1 of `DIDRegistered`: indexed strings are stored as their hash.
    pub fn national_id_topic(national_id: &str) -> H256 {
        H256::from(keccak256(national_id.as_bytes()))
    }

    /// ABI-encoded non-indexed event data.
    pub fn encode_event_data(did: &str) -> Bytes {
        Bytes::from(abi::encode(&[Token::String(did.to_string())]))
    }

    /// Returns the DID of the first `DIDRegistered` log emitted by `registry`
    /// that satisfies `expected`.
    pub fn find_registration(
        &self,
        logs: &[Log],
        registry: Address,
        expected: &RegistrationMatch,
    ) -> Option<String> {
        let event_topic = Self::did_registered_topic();
        let national_id_topic = expected.national_id.as_deref().map(Self::national_id_topic);

        logs.iter()
            .filter(|log| log.address == registry)
            .filter(|log| log.topics.first() == Some(&event_topic))
            .filter(|log| match national_id_topic {
                Some(topic) => log.topics.get(1) == Some(&topic),
                None => true,
            })
            .filter_map(|log| decode_event_did(&log.data))
            .find(|did| match expected.did.as_deref() {
                Some(expected_did) => did == expected_did,
                None => true,
            })
    }
}

fn decode_event_did(data: &[u8]) -> Option<String> {
    match abi::decode(&[ParamType::String], data).ok()?.pop()? {
        Token::String(did) => Some(did),
        _ => None,
    }
}

/// Rejects national ids the registry should never key on.
pub fn validate_national_id(national_id: &str) -> Result<()> {
    if national_id.trim().is_empty() {
        return Err(AnchorError::InvalidNationalId("national id is empty".into()));
    }
    if national_id.trim() != national_id {
        return Err(AnchorError::InvalidNationalId(
            "national id has leading or trailing whitespace".into(),
        ));
    }
    if national_id.len() > MAX_NATIONAL_ID_LEN {
        return Err(AnchorError::InvalidNationalId(format!(
            "national id exceeds {MAX_NATIONAL_ID_LEN} bytes"
        )));
    }
    if national_id.chars().any(char::is_control) {
        return Err(AnchorError::InvalidNationalId(
            "national id contains control characters".into(),
        ));
    }
    Ok(())
}

/// Loads contract creation bytecode from a `solc --bin` hex artifact.
pub fn load_bytecode(path: &Path) -> Result<Bytes> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        AnchorError::DeploymentFailed(format!("cannot read bytecode artifact {}: {e}", path.display()))
    })?;
    let code = decode_hex(&text).map_err(|e| {
        AnchorError::DeploymentFailed(format!("bytecode artifact {} is not hex: {e}", path.display()))
    })?;
    if code.is_empty() {
        return Err(AnchorError::DeploymentFailed(format!(
            "bytecode artifact {} is empty",
            path.display()
        )));
    }
    Ok(Bytes::from(code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_compiled_abi_declares_registry_surface() {
        let registry = VoterDidRegistry::new();
        let abi = registry.abi();
        assert!(abi.function("registerDID").is_ok());
        assert!(abi.function("getDID").is_ok());
        assert!(abi.function("voterDIDs").is_ok());
        assert_eq!(
            abi.event("DIDRegistered").unwrap().signature(),
            VoterDidRegistry::did_registered_topic()
        );
    }

    #[test]
    fn test_selectors_match_solidity_signatures() {
        let registry = VoterDidRegistry::new();
        assert_eq!(
            registry.selector("registerDID").unwrap(),
            keccak256(b"registerDID(string,string)")[..4]
        );
        assert_eq!(registry.selector("getDID").unwrap(), keccak256(b"getDID(string)")[..4]);
        assert!(registry.selector("createDID").is_err());
    }

    #[test]
    fn test_register_calldata_decodes_back() {
        let registry = VoterDidRegistry::new();
        let calldata = registry.encode_register("ID-001", "did:key:z6Mkexample").unwrap();
        assert_eq!(calldata[..4], registry.selector("registerDID").unwrap());
        assert_eq!(
            registry.decode_register(&calldata).unwrap(),
            ("ID-001".to_string(), "did:key:z6Mkexample".to_string())
        );

        let call = registry.encode_get_did("ID-001").unwrap();
        assert_eq!(registry.decode_get_did_call(&call).unwrap(), "ID-001");
    }

    #[test]
    fn test_get_did_output_decoding() {
        let registry = VoterDidRegistry::new();
        let encoded = abi::encode(&[Token::String("did:key:z6Mkstored".into())]);
        assert_eq!(registry.decode_get_did(&encoded).unwrap(), "did:key:z6Mkstored");
        assert!(matches!(registry.decode_get_did(&[1, 2, 3]), Err(AnchorError::ContractAbi(_))));
    }

    fn registration_log(registry: Address, national_id: &str, did: &str) -> Log {
        Log {
            address: registry,
            topics: vec![
                VoterDidRegistry::did_registered_topic(),
                VoterDidRegistry::national_id_topic(national_id),
            ],
            data: VoterDidRegistry::encode_event_data(did),
            ..Default::default()
        }
    }

    #[test]
    fn test_find_registration_requires_matching_event() {
        let registry = VoterDidRegistry::new();
        let address = Address::repeat_byte(0x10);
        let logs = vec![
            registration_log(Address::repeat_byte(0x99), "ID-001", "did:key:zOther"),
            registration_log(address, "ID-002", "did:key:zSecond"),
            registration_log(address, "ID-001", "did:key:zFirst"),
        ];

        let exact = RegistrationMatch::exact("ID-001", "did:key:zFirst");
        assert_eq!(
            registry.find_registration(&logs, address, &exact).as_deref(),
            Some("did:key:zFirst")
        );

        let wrong_did = RegistrationMatch::exact("ID-001", "did:key:zOther");
        assert!(registry.find_registration(&logs, address, &wrong_did).is_none());

        let any = RegistrationMatch::default();
        assert_eq!(
            registry.find_registration(&logs, address, &any).as_deref(),
            Some("did:key:zSecond")
        );
        assert!(registry.find_registration(&[], address, &any).is_none());
    }

    #[test]
    fn test_abi_fingerprint_is_stable_hex() {
        let fingerprint = VoterDidRegistry::abi_fingerprint();
        assert_eq!(fingerprint.len(), 64);
        assert_eq!(fingerprint, VoterDidRegistry::abi_fingerprint());
    }

    #[test]
    fn test_national_id_validation() {
        assert!(validate_national_id("ID-001").is_ok());
        assert!(validate_national_id("").is_err());
        assert!(validate_national_id(" ID-001").is_err());
        assert!(validate_national_id("ID\n001").is_err());
        assert!(validate_national_id(&"9".repeat(MAX_NATIONAL_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_load_bytecode_from_hex_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("VoterDIDRegistry.bin");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "0x6080604052").unwrap();
        assert_eq!(load_bytecode(&path).unwrap().to_vec(), vec![0x60, 0x80, 0x60, 0x40, 0x52]);

        std::fs::write(&path, "").unwrap();
        assert!(matches!(load_bytecode(&path), Err(AnchorError::DeploymentFailed(_))));
        assert!(matches!(
            load_bytecode(&dir.path().join("missing.bin")),
            Err(AnchorError::DeploymentFailed(_))
        ));
    }
}
