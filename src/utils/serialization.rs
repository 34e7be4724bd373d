// src/utils/serialization.rs
//! Serialization helpers for the anchoring core.
//!
//! Provides:
//! - JSON rendering of results for the command-line driver
//! - Base64 decoding of templates produced by the minutiae service
//! - Hex decoding of operator keys and bytecode artifacts

use ethers::utils::hex;
use serde::Serialize;

/// Serializes a value to an indented JSON string.
pub fn serialize_pretty<T: Serialize>(data: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(data)
}

/// Decodes a standard (padded) base64 string.
///
/// Surrounding whitespace and embedded line breaks are ignored, since
/// templates often arrive wrapped at 76 columns.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::decode(compact)
}

/// Encodes bytes as standard padded base64.
pub fn encode_base64(data: &[u8]) -> String {
    base64::encode(data)
}

/// Decodes a hex string with or without a `0x` prefix.
pub fn decode_hex(data: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let trimmed = data.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits)
}
