//! The device capability contract used by the session state machine.

use crate::echonet::EchonetFrame;
use crate::error::BRouteError;
use async_trait::async_trait;

/// Capability contract of a Wi-SUN B-route dongle driver.
///
/// The session state machine only talks to this trait, so tests can
/// substitute a scripted device. One production implementation exists:
/// [`crate::wisun::Rl7023`]. Errors never escalate past this boundary;
/// every operation reports success or failure and the state machine decides
/// what to retry.
#[async_trait]
pub trait WiSunDevice: Send {
    /// Opens the device and acquires the hardware.
    async fn open(&mut self) -> Result<(), BRouteError>;

    /// Resets the device, reinitializing its registers.
    async fn reset(&mut self) -> Result<(), BRouteError>;

    /// Injects the B-route credentials in preparation for a scan.
    async fn setup(&mut self, id: &str, password: &str) -> Result<(), BRouteError>;

    /// Reads the known device registers and records their values for
    /// diagnostics.
    async fn dump_registers(&mut self) -> Result<(), BRouteError>;

    /// Locates the meter's network (cache or active scan) and configures
    /// the device to talk to it.
    async fn scan(&mut self) -> Result<(), BRouteError>;

    /// Runs the PANA authentication sequence; `rejoin` re-authenticates an
    /// existing session instead of starting fresh.
    async fn join(&mut self, rejoin: bool) -> Result<(), BRouteError>;

    /// Sends one Echonet-Lite frame to the meter.
    async fn send(&mut self, frame: &EchonetFrame) -> Result<(), BRouteError>;

    /// Waits one read timeout for an inbound frame. `None` means nothing
    /// arrived or what arrived was not a decodable datagram; neither is an
    /// error.
    async fn receive(&mut self) -> Option<EchonetFrame>;

    /// Ends the PANA session.
    async fn terminate(&mut self) -> Result<(), BRouteError>;

    /// Forgets the persisted scan result, forcing the next scan to go active.
    fn clear_scan_cache(&mut self);

    /// Releases the device.
    async fn close(&mut self);
}
