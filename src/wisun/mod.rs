//! Wi-SUN dongle support: serial line transport, SK event grammar, scan
//! cache, and the RL7023 dongle driver.

pub mod device;
pub mod event;
pub mod rl7023;
pub mod scan_cache;
pub mod serial;
pub mod serial_mock;

pub use device::WiSunDevice;
pub use event::{ErxudpEvent, SkEvent};
pub use rl7023::Rl7023;
pub use scan_cache::{ScanCache, ScanResult};
pub use serial::{LineTransport, OpenAsync, SerialPort, SerialSettings};

/// Dongle hardware variant.
///
/// The RL7023 Stick-D ships as a single-stack B-route model (IPS) and a
/// dual-stack B-route/HAN model (DSS). The variant changes the SKSCAN and
/// SKSENDTO argument lists and the ERXUDP field count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DongleKind {
    /// Single-stack RL7023 Stick-D/IPS.
    Ips,
    /// Dual-stack RL7023 Stick-D/DSS.
    Dss,
}

impl DongleKind {
    /// Whether the variant carries the extra "side" field/parameter.
    pub fn is_dual_stack(self) -> bool {
        matches!(self, DongleKind::Dss)
    }
}
