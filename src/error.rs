//! # B-route Error Handling
//!
//! This module defines the BRouteError enum, which represents the different
//! error types that can occur in the broute-rs crate.

use thiserror::Error;

/// Represents the different error types that can occur in the B-route crate.
#[derive(Debug, Error)]
pub enum BRouteError {
    /// Indicates an error related to the serial port communication.
    #[error("Serial port error: {0}")]
    SerialPortError(String),

    /// Indicates that no line arrived within the command's read budget.
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// Indicates a command that was not acknowledged with `OK`.
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// Indicates an error when decoding an Echonet-Lite frame.
    #[error("Error decoding Echonet frame: {0}")]
    FrameDecodeError(String),

    /// Indicates an invalid hexadecimal string was provided.
    #[error("Invalid hexadecimal string")]
    InvalidHexString,

    /// Indicates an active scan that did not yield a usable result.
    #[error("Scan did not locate the meter")]
    ScanFailed,

    /// Indicates a PANA join sequence that was rejected or timed out.
    #[error("PANA join failed")]
    JoinFailed,

    /// Indicates an operation on a driver whose transport is not open.
    #[error("Device not open")]
    NotOpen,

    /// A catch-all error for uncategorized cases.
    #[error("Other error: {0}")]
    Other(String),
}
