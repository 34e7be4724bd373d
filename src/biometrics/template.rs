// src/biometrics/template.rs
//! Intake of ISO/IEC 19794-2 finger minutiae records.
//!
//! Templates arrive base64-encoded from the external minutiae service. Intake
//! decodes them, checks the record header and hands a canonical byte buffer to
//! key derivation. Nothing here touches the network.
//!
//! Record layout as written by the minutiae service (multi-byte fields are
//! little-endian):
//!
//! ```text
//! 0..4   format identifier   "FMR\0"
//! 4..8   version             20 00 00 00
//! 8..12  record length       total bytes, must equal the buffer size
//! 12     capture device vendor
//! 13     capture device type
//! 16..18 image width
//! 18..20 image height
//! 24..26 x resolution (dpi)
//! 26..28 y resolution (dpi)
//! 31     minutiae count
//! 32..   minutiae, 6 bytes each: x (LE u16), y (LE u16), angle, quality
//! ```
//!
//! Bytes not listed are zero.

use crate::error::{AnchorError, Result};
use crate::utils::serialization::decode_base64;
use ethers::utils::hex;
use serde::Serialize;
use std::fmt;
use zeroize::Zeroizing;

/// Expected first four bytes of every record.
pub const FORMAT_IDENTIFIER: [u8; 4] = *b"FMR\0";

/// Shortest record accepted; also the stable-secret width.
pub const MIN_TEMPLATE_LEN: usize = 32;

/// Fixed header size preceding the minutiae block.
pub const HEADER_LEN: usize = 32;

/// Bytes per encoded minutia.
pub const MINUTIA_LEN: usize = 6;

const RECORD_LENGTH_OFFSET: usize = 8;
const MINUTIAE_COUNT_OFFSET: usize = 31;

/// A validated template. The buffer is wiped when dropped.
pub struct IsoTemplate {
    bytes: Zeroizing<Vec<u8>>,
}

/// Non-sensitive metadata read from a record header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TemplateHeader {
    /// Raw version bytes as hex, `20000000` for version 2.0.
    pub version: String,
    pub record_length: u32,
    pub capture_vendor: u8,
    pub capture_device_type: u8,
    pub image_width: u16,
    pub image_height: u16,
    pub x_resolution: u16,
    pub y_resolution: u16,
    pub minutiae_count: u8,
}

impl IsoTemplate {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The 4-byte format tag (always `FMR\0` once validated).
    pub fn format_tag(&self) -> [u8; 4] {
        let mut tag = [0u8; 4];
        tag.copy_from_slice(&self.bytes[..4]);
        tag
    }

    /// Parses the 32-byte record header.
    pub fn header(&self) -> TemplateHeader {
        let b = &self.bytes;
        let u16_at = |i: usize| u16::from_le_bytes([b[i], b[i + 1]]);

        TemplateHeader {
            version: hex::encode(&b[4..8]),
            record_length: declared_length(b),
            capture_vendor: b[12],
            capture_device_type: b[13],
            image_width: u16_at(16),
            image_height: u16_at(18),
            x_resolution: u16_at(24),
            y_resolution: u16_at(26),
            minutiae_count: b[MINUTIAE_COUNT_OFFSET],
        }
    }
}

impl fmt::Debug for IsoTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsoTemplate")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

/// Decodes the base64 transport encoding.
pub fn decode(template_b64: &str) -> Result<Vec<u8>> {
    if template_b64.trim().is_empty() {
        return Err(AnchorError::TemplateMalformed("template is empty".into()));
    }
    decode_base64(template_b64)
        .map_err(|e| AnchorError::TemplateMalformed(format!("invalid base64: {e}")))
}

/// Checks minimum size, format identifier and declared record length.
pub fn validate(bytes: &[u8]) -> Result<()> {
    if bytes.len() < MIN_TEMPLATE_LEN {
        return Err(AnchorError::InsufficientEntropy {
            len: bytes.len(),
            min: MIN_TEMPLATE_LEN,
        });
    }
    if bytes[..4] != FORMAT_IDENTIFIER {
        return Err(AnchorError::TemplateMalformed(format!(
            "format identifier {:02x?} is not \"FMR\\0\"",
            &bytes[..4]
        )));
    }

    let declared = declared_length(bytes) as usize;
    if declared != bytes.len() {
        return Err(AnchorError::TemplateMalformed(format!(
            "record length field declares {declared} bytes but buffer holds {}",
            bytes.len()
        )));
    }
    Ok(())
}

/// Returns the record unchanged; the minutiae service already normalizes it.
pub fn canonicalize(bytes: Vec<u8>) -> Vec<u8> {
    bytes
}

/// Full intake: decode, validate, canonicalize.
pub fn decode_and_validate(template_b64: &str) -> Result<IsoTemplate> {
    let bytes = Zeroizing::new(decode(template_b64)?);
    validate(&bytes)?;
    let canonical = Zeroizing::new(canonicalize(bytes.to_vec()));
    log::debug!("ISO template accepted ({} bytes)", canonical.len());
    Ok(IsoTemplate { bytes: canonical })
}

fn declared_length(bytes: &[u8]) -> u32 {
    let mut field = [0u8; 4];
    field.copy_from_slice(&bytes[RECORD_LENGTH_OFFSET..RECORD_LENGTH_OFFSET + 4]);
    u32::from_le_bytes(field)
}
