//! # broute-rs - A Rust Crate for Wi-SUN B-route Smart-Meter Communication
//!
//! The broute-rs crate reads electricity telemetry from a low-voltage smart
//! meter over the B-route, the dedicated Wi-SUN link Japanese utilities
//! expose to consumers, using a Tessera RL7023 Stick-D USB dongle.
//!
//! ## Features
//!
//! - Drive the RL7023 dongle's SK line-command protocol over a serial port
//!   (single-stack D/IPS and dual-stack D/DSS variants)
//! - Discover the meter with an active channel scan, cached on disk so
//!   restarts skip the slow rescan
//! - Authenticate the PANA session with the utility-issued B-route id and
//!   password
//! - Encode and decode Echonet-Lite property frames
//! - Poll instantaneous power, current, and cumulative energy on independent
//!   drift-free cycles and push scaled readings onto a channel
//! - Recover automatically from scan, join, and receive failures
//!
//! ## Usage
//!
//! To use the broute-rs crate in your Rust project, add the following to your
//! Cargo.toml file:
//!
//! ```toml
//! [dependencies]
//! broute-rs = "0.1.0"
//! ```
//!
//! Then, in your Rust code, you can import the necessary modules and functions:
//!
//! ```rust
//! use broute_rs::{
//!     BrouteReader, MeterRecord, PollRequest, BRouteError, init_logger, log_info,
//!     DongleKind, Rl7023, ScanCache, SerialSettings, EchonetFrame,
//! };
//! ```

pub mod constants;
pub mod echonet;
pub mod error;
pub mod logging;
pub mod reader;
pub mod util;
pub mod wisun;

pub use crate::error::BRouteError;
pub use crate::logging::{init_logger, log_info};

// Core B-route types
pub use echonet::frame::EchonetFrame;
pub use reader::{default_poll_requests, BrouteReader, BrouteState, MeterRecord, PollRequest};
pub use wisun::{DongleKind, Rl7023, ScanCache, SerialSettings, WiSunDevice};
