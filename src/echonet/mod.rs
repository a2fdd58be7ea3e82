//! Echonet-Lite application layer: the property request/response frame codec
//! and the smart-meter property definitions.

pub mod frame;
pub mod properties;

pub use frame::EchonetFrame;
pub use properties::unit_multiplier;
