// src/models/did.rs
//! `did:key` identifier for Ed25519 public keys.
//!
//! The method-specific id is the multibase (base58btc, `z` prefix) encoding of
//! the multicodec-prefixed public key, following the
//! [did:key method](https://w3c-ccg.github.io/did-method-key/).
//!
//! ```text
//! did:key:z <base58btc( 0xED 0x01 || pk[32] )>
//! ```

use crate::error::{AnchorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Multicodec varint prefix denoting an Ed25519 public key.
pub const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];

/// Scheme and method prefix shared by every `did:key` identifier.
pub const DID_KEY_PREFIX: &str = "did:key:";

/// Multibase code for base58btc.
const MULTIBASE_BASE58BTC: char = 'z';

/// A `did:key` identifier wrapping an Ed25519 public key.
///
/// Equality is exact string equality, which is also how verification compares
/// a locally regenerated DID against the one stored on chain.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did {
    id: String,
    public_key: [u8; 32],
}

impl Did {
    /// Composes the identifier for a raw 32-byte Ed25519 public key.
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let mut prefixed = Vec::with_capacity(ED25519_MULTICODEC.len() + public_key.len());
        prefixed.extend_from_slice(&ED25519_MULTICODEC);
        prefixed.extend_from_slice(public_key);
        Did {
            id: format!(
                "{}{}{}",
                DID_KEY_PREFIX,
                MULTIBASE_BASE58BTC,
                bs58::encode(prefixed).into_string()
            ),
            public_key: *public_key,
        }
    }

    /// Parses and validates an identifier string.
    pub fn parse(value: &str) -> Result<Self> {
        Did::try_from(value.to_string())
    }

    /// The Ed25519 public key carried by the identifier.
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

fn decode_public_key(value: &str) -> Result<[u8; 32]> {
    let encoded = value
        .strip_prefix(DID_KEY_PREFIX)
        .ok_or_else(|| AnchorError::InvalidDid(format!("missing `{DID_KEY_PREFIX}` prefix")))?;
    let base58 = encoded
        .strip_prefix(MULTIBASE_BASE58BTC)
        .ok_or_else(|| AnchorError::InvalidDid("multibase encoding is not base58btc".into()))?;
    let bytes = bs58::decode(base58)
        .into_vec()
        .map_err(|e| AnchorError::InvalidDid(format!("base58btc decoding failed: {e}")))?;

    if bytes.len() != ED25519_MULTICODEC.len() + 32 {
        return Err(AnchorError::InvalidDid(format!(
            "expected 34 decoded bytes, got {}",
            bytes.len()
        )));
    }
    if bytes[..2] != ED25519_MULTICODEC {
        return Err(AnchorError::InvalidDid(
            "multicodec prefix is not Ed25519 (0xed 0x01)".into(),
        ));
    }

    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(&bytes[2..]);
    Ok(public_key)
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl FromStr for Did {
    type Err = AnchorError;

    fn from_str(s: &str) -> Result<Self> {
        Did::parse(s)
    }
}

impl TryFrom<String> for Did {
    type Error = AnchorError;

    fn try_from(value: String) -> Result<Self> {
        let public_key = decode_public_key(&value)?;
        Ok(Did {
            id: value,
            public_key,
        })
    }
}

impl From<Did> for String {
    fn from(did: Did) -> Self {
        did.id
    }
}

impl PartialEq<str> for Did {
    fn eq(&self, other: &str) -> bool {
        self.id == other
    }
}

impl PartialEq<String> for Did {
    fn eq(&self, other: &String) -> bool {
        &self.id == other
    }
}
