// src/wallet/key_derivation.rs
//! Deterministic derivation of a voter identity from template bytes.
//!
//! ```text
//! template ─► stable secret ─► SHA-256 ─► Ed25519 seed ─► public key ─► did:key
//! ```
//!
//! The template is the only input: no salt, no randomness, no clock. Noise
//! tolerance is a property of the backend-stabilized template, not of this
//! module, so the same bytes always yield the same key pair and DID.
//!
//! Uses `ring` for SHA-256 and for Ed25519, whose scalar multiplication is
//! constant time.

use crate::biometrics::template::IsoTemplate;
use crate::error::{AnchorError, Result};
use crate::models::did::Did;
use crate::models::progress::{Milestone, ProgressSink};
use crate::utils::crypto::sha256;
use ring::signature::{Ed25519KeyPair, KeyPair as _};
use std::fmt;
use zeroize::Zeroizing;

/// Width of the stable secret and of the Ed25519 seed.
pub const STABLE_SECRET_LEN: usize = 32;

/// 32 bytes derived from the template. Wiped on drop.
pub struct StableSecret(Zeroizing<[u8; STABLE_SECRET_LEN]>);

impl StableSecret {
    pub fn as_bytes(&self) -> &[u8; STABLE_SECRET_LEN] {
        &self.0
    }
}

impl fmt::Debug for StableSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StableSecret(..)")
    }
}

/// Ed25519 key pair derived from a template.
///
/// The secret seed never leaves the process through this crate: it is not
/// logged, serialized or written to chain.
pub struct KeyPair {
    secret_seed: Zeroizing<[u8; 32]>,
    public_key: [u8; 32],
}

impl KeyPair {
    /// The 32-byte Ed25519 private seed. Treat as sensitive.
    pub fn secret_seed(&self) -> &[u8; 32] {
        &self.secret_seed
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &ethers::utils::hex::encode(self.public_key))
            .finish_non_exhaustive()
    }
}

/// Result of running the full pipeline.
#[derive(Debug)]
pub struct DerivedIdentity {
    pub did: Did,
    pub key_pair: KeyPair,
}

/// Step 1: take the bytes as-is when exactly 32 long, otherwise SHA-256 them.
pub fn stable_secret(bytes: &[u8]) -> Result<StableSecret> {
    match bytes.len() {
        len if len < STABLE_SECRET_LEN => Err(AnchorError::InsufficientEntropy {
            len,
            min: STABLE_SECRET_LEN,
        }),
        STABLE_SECRET_LEN => {
            let mut secret = Zeroizing::new([0u8; STABLE_SECRET_LEN]);
            secret.copy_from_slice(bytes);
            Ok(StableSecret(secret))
        }
        _ => Ok(StableSecret(Zeroizing::new(sha256(bytes)))),
    }
}

/// Step 2: SHA-256 of the stable secret, used as the Ed25519 seed.
pub fn hash_secret(secret: &StableSecret) -> Zeroizing<[u8; 32]> {
    Zeroizing::new(sha256(secret.as_bytes()))
}

/// Step 3: standard Ed25519 key generation from a 32-byte seed.
pub fn keypair_from_seed(seed: &[u8; 32]) -> Result<KeyPair> {
    let ring_pair = Ed25519KeyPair::from_seed_unchecked(seed)
        .map_err(|e| AnchorError::CryptoFailure(e.to_string()))?;

    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(ring_pair.public_key().as_ref());

    Ok(KeyPair {
        secret_seed: Zeroizing::new(*seed),
        public_key,
    })
}

/// Runs the whole pipeline over raw bytes.
pub fn derive(bytes: &[u8]) -> Result<DerivedIdentity> {
    derive_observed(bytes, &ProgressSink::none())
}

/// Runs the pipeline over a validated template.
pub fn derive_from_template(template: &IsoTemplate, progress: &ProgressSink) -> Result<DerivedIdentity> {
    derive_observed(template.as_bytes(), progress)
}

/// Runs the pipeline, reporting `secret_hashed`, `keypair_derived` and
/// `did_ready` to the sink.
pub fn derive_observed(bytes: &[u8], progress: &ProgressSink) -> Result<DerivedIdentity> {
    let secret = stable_secret(bytes)?;
    let seed = hash_secret(&secret);
    drop(secret);
    progress.emit(Milestone::SecretHashed);

    let key_pair = keypair_from_seed(&seed)?;
    progress.emit(Milestone::KeypairDerived);

    let did = Did::from_public_key(key_pair.public_key());
    progress.emit(Milestone::DidReady);

    Ok(DerivedIdentity { did, key_pair })
}
