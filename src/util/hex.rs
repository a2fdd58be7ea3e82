//! # Hex Utilities
//!
//! Validation and decoding helpers for the hexadecimal-ASCII fields the SK
//! command protocol and the Echonet-Lite frame format are built from. The
//! device emits uppercase hex only, so validation is strict about case.

use crate::error::BRouteError;

/// Returns true iff every character of `data` is an uppercase hex digit and,
/// when `length` is given, the string has exactly that length.
pub fn is_hex(data: &str, length: Option<usize>) -> bool {
    if let Some(len) = length {
        if data.len() != len {
            return false;
        }
    }
    data.chars()
        .all(|ch| ch.is_ascii_digit() || ('A'..='F').contains(&ch))
}

/// Returns true iff `addr` splits on `:` into exactly 8 groups of exactly
/// 4 hex digits each.
pub fn is_ipv6_literal(addr: &str) -> bool {
    let groups: Vec<&str> = addr.split(':').collect();
    if groups.len() != 8 {
        return false;
    }
    groups.iter().all(|g| is_hex(g, Some(4)))
}

/// Decodes a hex string as a two's-complement signed integer.
///
/// The bit width is `4 * digits`, where `digits` defaults to the length of
/// `value`. Matches the standard signed interpretation for the 8/16/32-bit
/// fields the meter uses: `"FFFF"` is -1, `"8000"` is -32768.
pub fn hex_to_signed(value: &str, digits: Option<usize>) -> Result<i64, BRouteError> {
    let digits = match digits {
        Some(0) | None => value.len(),
        Some(d) => d,
    };
    if digits == 0 || digits > 16 {
        return Err(BRouteError::InvalidHexString);
    }
    let raw = u64::from_str_radix(value, 16).map_err(|_| BRouteError::InvalidHexString)?;
    let bits = digits * 4;
    if bits < 64 {
        if raw >> bits != 0 {
            return Err(BRouteError::InvalidHexString);
        }
        if raw >> (bits - 1) & 1 == 1 {
            return Ok(raw as i64 - (1i64 << bits));
        }
    }
    Ok(raw as i64)
}

/// Decodes a hex string as an unsigned integer.
pub fn hex_to_unsigned(value: &str) -> Result<u64, BRouteError> {
    u64::from_str_radix(value, 16).map_err(|_| BRouteError::InvalidHexString)
}

/// Decodes a hex string into bytes.
pub fn decode_hex(value: &str) -> Result<Vec<u8>, BRouteError> {
    hex::decode(value).map_err(|_| BRouteError::InvalidHexString)
}

/// Encodes bytes as the uppercase hex the SK protocol uses on the wire.
pub fn encode_hex_upper(data: &[u8]) -> String {
    hex::encode_upper(data)
}
