//! Shared utility functions used across the codebase.

use chrono::Utc;
use sha2::{Digest, Sha256};

/// Maximum length of the purchaser identifier accepted by the payment service.
pub const PURCHASER_IDENTIFIER_LEN: usize = 25;

/// Get current timestamp as RFC3339 string.
pub fn now_string() -> String {
    Utc::now().to_rfc3339()
}

/// Hex-encoded SHA-256 digest of `input`.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Derive a purchaser identifier from serialized job input.
///
/// The payment service caps the identifier at 25 characters, so the digest is
/// truncated.
pub fn purchaser_identifier(input_data: &str) -> String {
    let mut digest = sha256_hex(input_data);
    digest.truncate(PURCHASER_IDENTIFIER_LEN);
    digest
}

/// Data characters of a bech32 string.
const BECH32_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// Human-readable parts (with separator) of Shelley payment addresses.
const ADDRESS_PREFIXES: [&str; 2] = ["addr_test1", "addr1"];

/// Bech32 data length of the shortest (enterprise) and longest (base)
/// Shelley address, with some slack for pointer addresses.
const ADDRESS_DATA_LEN: std::ops::RangeInclusive<usize> = 50..=110;

/// Whether `value` looks like a Shelley payment address (`addr1...` or
/// `addr_test1...`).
///
/// Only the shape is checked, not the bech32 checksum. That is enough to keep
/// Kupo patterns such as `*` or `policy.asset` and path fragments out of
/// lookups.
pub fn is_cardano_address(value: &str) -> bool {
    let Some(data) = ADDRESS_PREFIXES
        .iter()
        .find_map(|prefix| value.strip_prefix(prefix))
    else {
        return false;
    };
    ADDRESS_DATA_LEN.contains(&data.len()) && data.chars().all(|c| BECH32_CHARSET.contains(c))
}

/// Sanitize a string for use as a filename.
pub fn sanitize_filename(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        "default".to_string()
    } else {
        out
    }
}
