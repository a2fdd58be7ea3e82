//! # SK Event-Line Grammar
//!
//! Every line the dongle emits outside a command echo is an event. This
//! module classifies one received line into a typed [`SkEvent`], validating
//! field shapes strictly so that a corrupted line can never masquerade as a
//! datagram.
//!
//! ERXUDP layout (dual-stack variant adds the SIDE field):
//!
//! ```text
//! ERXUDP <SENDER> <DEST> <RPORT> <LPORT> <SENDERLLA> <SECURED> [<SIDE>] <DATALEN> <DATA>
//! ```

use crate::util::hex::{is_hex, is_ipv6_literal};
use crate::wisun::DongleKind;

/// An inbound datagram notification, fields kept in their wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErxudpEvent {
    pub sender: String,
    pub dest: String,
    pub rport: String,
    pub lport: String,
    pub sender_lla: String,
    pub secured: String,
    /// Hex-encoded payload byte count, 4 digits.
    pub datalen: String,
    /// Payload as hex ASCII; carries the Echonet-Lite frame.
    pub data: String,
}

/// One decoded event line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkEvent {
    /// A well-formed `ERXUDP` datagram notification.
    Erxudp(ErxudpEvent),
    /// An `EVENT <num> <sender>` status notification.
    Event { number: String, sender: String },
    /// Any other event tag; raw fields retained for diagnostics.
    Other { fields: Vec<String> },
    /// A line that failed validation; raw fields retained for diagnostics.
    Invalid { fields: Vec<String> },
}

/// Classifies one received line.
///
/// Returns `None` for lines that carry nothing worth reacting to: empty
/// lines and `EVENT` lines with fewer than three fields.
pub fn parse_event(line: &[u8], kind: DongleKind) -> Option<SkEvent> {
    // Any high byte marks the whole line invalid; serial noise must not
    // reach the field validators.
    if line.iter().any(|&b| b >= 0x80) {
        return Some(SkEvent::Invalid { fields: Vec::new() });
    }

    let text = String::from_utf8_lossy(line);
    let fields: Vec<String> = text.split_whitespace().map(|f| f.to_string()).collect();
    if fields.is_empty() {
        return None;
    }

    match fields[0].as_str() {
        "ERXUDP" => Some(parse_erxudp(fields, kind)),
        "EVENT" => {
            if fields.len() < 3 {
                return None;
            }
            Some(SkEvent::Event {
                number: fields[1].clone(),
                sender: fields[2].clone(),
            })
        }
        // EPONG, EADDR, ENEIGHBOR, EPANDESC, EEDSCAN, ESEC, ENBR, ...
        _ => Some(SkEvent::Other { fields }),
    }
}

fn parse_erxudp(fields: Vec<String>, kind: DongleKind) -> SkEvent {
    let expected = if kind.is_dual_stack() { 10 } else { 9 };
    if fields.len() != expected {
        return SkEvent::Invalid { fields };
    }

    // Sender and destination must be full IPv6 literals.
    if !is_ipv6_literal(&fields[1]) || !is_ipv6_literal(&fields[2]) {
        return SkEvent::Invalid { fields };
    }

    // Remote and local port, 4 hex digits each.
    if !is_hex(&fields[3], Some(4)) || !is_hex(&fields[4], Some(4)) {
        return SkEvent::Invalid { fields };
    }

    // Sender link-layer address, 16 hex digits.
    if !is_hex(&fields[5], Some(16)) {
        return SkEvent::Invalid { fields };
    }

    // Security flag, 1 hex digit.
    if !is_hex(&fields[6], Some(1)) {
        return SkEvent::Invalid { fields };
    }

    let idx = if kind.is_dual_stack() {
        // Side flag, 1 hex digit.
        if !is_hex(&fields[7], Some(1)) {
            return SkEvent::Invalid { fields };
        }
        8
    } else {
        7
    };

    // Payload length (4 hex digits) and payload (any hex).
    if !is_hex(&fields[idx], Some(4)) || !is_hex(&fields[idx + 1], None) {
        return SkEvent::Invalid { fields };
    }

    SkEvent::Erxudp(ErxudpEvent {
        sender: fields[1].clone(),
        dest: fields[2].clone(),
        rport: fields[3].clone(),
        lport: fields[4].clone(),
        sender_lla: fields[5].clone(),
        secured: fields[6].clone(),
        datalen: fields[idx].clone(),
        data: fields[idx + 1].clone(),
    })
}
