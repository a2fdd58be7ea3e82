//! Protocol-wide constants for the SK command link and the B-route session.

use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// Empty reads tolerated while waiting for a command's `OK` echo.
pub const WAIT_OK_MAX_READS: u32 = 20;

/// Empty reads tolerated while waiting for scan events. Active scans are slow,
/// so this budget is far larger than the normal command budget.
pub const WAIT_SCAN_MAX_READS: u32 = 300;

/// Empty reads tolerated while collecting one `ESREG` register echo.
pub const WAIT_REGISTER_MAX_READS: u32 = 5;

/// Default read timeout for a single line, in milliseconds.
pub const READ_TIMEOUT_MS: u64 = 1000;

/// UDP port used by Echonet-Lite over the B-route, as 4 hex digits.
pub const ECHONET_UDP_PORT: &str = "0E1A";

/// SKSCAN mode: active scan with Information Elements.
pub const SCAN_MODE: u8 = 2;

/// SKSCAN channel mask: all channels (lowest bit is channel 33).
pub const SCAN_CHANNEL_MASK: &str = "FFFFFFFF";

/// SKSCAN duration exponent; each increment doubles the scan time.
pub const SCAN_DURATION: u8 = 7;

/// SKSCAN side parameter for dual-stack dongles: 0 selects the B-route face.
pub const SCAN_SIDE: u8 = 0;

/// Scan-result keys that must be present for a result to be usable.
pub const SCAN_REQUIRED_KEYS: [&str; 3] = ["Pan ID", "Channel", "Addr"];

/// Default scan-cache file name.
pub const SCAN_CACHE_FILE: &str = "scancache.json";

/// Seconds a cached scan result stays valid.
pub const SCAN_CACHE_MAX_AGE_SECS: u64 = 3600;

/// Consecutive scan or join failures tolerated before a full session reset.
pub const MAX_STATE_RETRIES: u32 = 5;

/// Seconds of receive silence in the joined state before the session is
/// considered stalled.
pub const RECEIVE_WATCHDOG_SECS: u64 = 600;

/// Short pause after an open/setup failure or a watchdog reset, in seconds.
pub const RETRY_PAUSE_SHORT_SECS: u64 = 5;

/// Pause between scan/join retries, in seconds.
pub const RETRY_PAUSE_LONG_SECS: u64 = 10;

/// SK register identifiers and their descriptions. Read-only; used for the
/// diagnostic register dump after credential setup. Sorted iteration order
/// is part of the dump contract, hence the BTreeMap.
pub static REGISTER_INFO: Lazy<BTreeMap<&'static str, &'static str>> = Lazy::new(|| {
    BTreeMap::from([
        ("S01", "MAC address"),
        ("S02", "channel number"),
        ("S03", "PAN ID"),
        ("S07", "frame counter"),
        ("S0A", "Pairing ID"),
        ("S0B", "Pairing ID(HAN)"),
        ("S15", "beacon response flag"),
        ("S16", "PANA session life time"),
        ("S17", "auto rejoin flag"),
        ("S1C", "PAA key update cycle time"),
        ("S1F", "relay device MAC address"),
        ("SA1", "ICMP response flag"),
        ("SA2", "ERXUDP event style"),
        ("SA9", "transmission and receive enabled"),
        ("SF0", "active side"),
        ("SFB", "transmission restriction flag"),
        ("SFD", "transmission total time"),
        ("SFE", "echo back flag"),
        ("SFF", "auto load"),
    ])
});
