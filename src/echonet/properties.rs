//! Smart-meter property definitions (low-voltage smart-meter class 0x0288).
//!
//! Only the properties the reader polls or interprets are listed; anything
//! else arriving in a response is logged and skipped.

use crate::error::BRouteError;
use crate::util::hex::hex_to_unsigned;

/// Coefficient applied to cumulative energy values.
pub const EPC_COEFFICIENT: &str = "D3";
/// Number of effective digits in cumulative energy values.
pub const EPC_EFFECTIVE_DIGITS: &str = "D7";
/// Cumulative energy, forward direction.
pub const EPC_CUMULATIVE_FWD: &str = "E0";
/// Unit code for cumulative energy values.
pub const EPC_CUMULATIVE_UNIT: &str = "E1";
/// Cumulative energy, reverse direction.
pub const EPC_CUMULATIVE_REV: &str = "E3";
/// Instantaneous power, watts.
pub const EPC_INSTANT_POWER: &str = "E7";
/// Instantaneous current, R and T phase.
pub const EPC_INSTANT_CURRENT: &str = "E8";
/// Timestamped cumulative energy, forward direction.
pub const EPC_CUMULATIVE_FWD_AT: &str = "EA";
/// Timestamped cumulative energy, reverse direction.
pub const EPC_CUMULATIVE_REV_AT: &str = "EB";

/// Maps an E1 unit code to the kWh multiplier for cumulative energy.
///
/// Returns `None` for codes outside the published set.
pub fn unit_multiplier(code: u64) -> Option<f64> {
    match code {
        0x00 => Some(1.0),
        0x01 => Some(0.1),
        0x02 => Some(0.01),
        0x03 => Some(0.001),
        0x04 => Some(0.0001),
        0x0A => Some(10.0),
        0x0B => Some(100.0),
        0x0C => Some(1000.0),
        0x0D => Some(10000.0),
        _ => None,
    }
}

/// Decodes the 14-hex-digit date/time prefix of EA/EB values into
/// `YYYY/MM/DD hh:mm:ss`. Each date component is its own hex field.
pub fn decode_timestamp(raw: &str) -> Result<String, BRouteError> {
    if raw.len() != 14 {
        return Err(BRouteError::FrameDecodeError(
            "timestamp is not 14 hex digits".to_string(),
        ));
    }
    let year = hex_to_unsigned(&raw[0..4])?;
    let month = hex_to_unsigned(&raw[4..6])?;
    let day = hex_to_unsigned(&raw[6..8])?;
    let hour = hex_to_unsigned(&raw[8..10])?;
    let minute = hex_to_unsigned(&raw[10..12])?;
    let second = hex_to_unsigned(&raw[12..14])?;
    Ok(format!(
        "{year:04}/{month:02}/{day:02} {hour:02}:{minute:02}:{second:02}"
    ))
}
