//! # RL7023 Dongle Driver
//!
//! Driver for the Tessera RL7023 Stick-D Wi-SUN dongles, which expose the SK
//! line-command protocol over USB serial. Implements [`WiSunDevice`] on top
//! of [`LineTransport`]: each operation writes a command line, then polls
//! received lines until the expected acknowledgement or event arrives, with
//! every wait bounded by a budget of empty reads.
//!
//! Both hardware variants are supported: the single-stack D/IPS and the
//! dual-stack D/DSS, which inserts an extra "side" parameter into SKSCAN and
//! SKSENDTO and an extra field into ERXUDP events.

use crate::constants::{
    ECHONET_UDP_PORT, REGISTER_INFO, SCAN_CHANNEL_MASK, SCAN_DURATION, SCAN_MODE, SCAN_SIDE,
    WAIT_OK_MAX_READS, WAIT_REGISTER_MAX_READS, WAIT_SCAN_MAX_READS,
};
use crate::echonet::EchonetFrame;
use crate::error::BRouteError;
use crate::util::hex::decode_hex;
use crate::wisun::event::{parse_event, SkEvent};
use crate::wisun::scan_cache::{is_complete, ScanCache, ScanResult};
use crate::wisun::serial::{LineTransport, OpenAsync, SerialPort, SerialSettings};
use crate::wisun::{device::WiSunDevice, DongleKind};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::collections::HashMap;

/// Driver for the RL7023 Stick-D dongle family.
pub struct Rl7023<P: SerialPort = tokio_serial::SerialStream> {
    settings: SerialSettings,
    kind: DongleKind,
    transport: Option<LineTransport<P>>,
    cache: ScanCache,
    /// Register values captured by the last diagnostic dump.
    registers: HashMap<String, String>,
    /// Scan-result fields configured into the device for this session.
    scan_result: ScanResult,
    /// Link-local address of the meter, derived once per successful scan.
    session_address: Option<String>,
}

impl<P: SerialPort + OpenAsync> Rl7023<P> {
    pub fn new(settings: SerialSettings, kind: DongleKind, cache: ScanCache) -> Self {
        Rl7023 {
            settings,
            kind,
            transport: None,
            cache,
            registers: HashMap::new(),
            scan_result: ScanResult::new(),
            session_address: None,
        }
    }

    /// Builds a driver over an already-open transport. Used by tests to
    /// inject a mock port; `open` becomes a no-op.
    pub fn with_transport(transport: LineTransport<P>, kind: DongleKind, cache: ScanCache) -> Self {
        Rl7023 {
            settings: SerialSettings::default(),
            kind,
            transport: Some(transport),
            cache,
            registers: HashMap::new(),
            scan_result: ScanResult::new(),
            session_address: None,
        }
    }

    /// Register values captured by the last [`WiSunDevice::dump_registers`].
    pub fn registers(&self) -> &HashMap<String, String> {
        &self.registers
    }

    /// The meter's link-local address, once a scan has derived it.
    pub fn session_address(&self) -> Option<&str> {
        self.session_address.as_deref()
    }

    fn transport_mut(&mut self) -> Result<&mut LineTransport<P>, BRouteError> {
        self.transport.as_mut().ok_or(BRouteError::NotOpen)
    }

    /// Polls received lines until one begins with `OK`. Echo and
    /// asynchronous events are discarded; empty reads count toward the
    /// timeout budget.
    async fn wait_ok(&mut self, what: &'static str) -> Result<(), BRouteError> {
        let transport = self.transport_mut()?;
        let mut toc = 0;
        loop {
            match transport.read_line().await? {
                Some(line) if line.starts_with(b"OK") => {
                    debug!("OK");
                    return Ok(());
                }
                Some(line) if line.starts_with(b"FAIL") => {
                    let reason = String::from_utf8_lossy(&line).to_string();
                    error!("{what}: {reason}");
                    return Err(BRouteError::CommandFailed(reason));
                }
                Some(_) => {} // echo back etc.
                None => {
                    toc += 1;
                    if toc > WAIT_OK_MAX_READS {
                        debug!("time out waiting for OK ({what})");
                        return Err(BRouteError::Timeout(what));
                    }
                }
            }
        }
    }

    /// Writes one command line and waits for its `OK`.
    async fn command(&mut self, cmd: &str, what: &'static str) -> Result<(), BRouteError> {
        info!("{cmd}");
        self.transport_mut()?.write_line(cmd).await?;
        self.wait_ok(what).await
    }

    /// Reads one line and classifies it. `None` covers both a read timeout
    /// and a line with nothing to react to.
    async fn read_event(&mut self) -> Result<Option<SkEvent>, BRouteError> {
        let kind = self.kind;
        let transport = self.transport_mut()?;
        let line = match transport.read_line().await? {
            Some(line) => line,
            None => return Ok(None),
        };
        let event = parse_event(&line, kind);
        if let Some(event) = &event {
            debug!("event: {event:?}");
        }
        Ok(event)
    }

    /// Runs the active scan and accumulates the reported fields.
    async fn scan_active(&mut self) -> Result<ScanResult, BRouteError> {
        let cmd = if self.kind.is_dual_stack() {
            format!("SKSCAN {SCAN_MODE} {SCAN_CHANNEL_MASK} {SCAN_DURATION} {SCAN_SIDE}")
        } else {
            format!("SKSCAN {SCAN_MODE} {SCAN_CHANNEL_MASK} {SCAN_DURATION}")
        };
        self.command(&cmd, "SKSCAN").await?;

        let transport = self.transport_mut()?;
        let mut result = ScanResult::new();
        let mut toc = 0;
        loop {
            let line = match transport.read_line().await? {
                Some(line) => line,
                None => {
                    toc += 1;
                    if toc > WAIT_SCAN_MAX_READS {
                        error!("scan timed out");
                        return Err(BRouteError::ScanFailed);
                    }
                    continue;
                }
            };

            if line.starts_with(b"EVENT 22") {
                // Scan complete.
                info!("EVENT: 22");
                break;
            } else if line.starts_with(b"EVENT 20") {
                // Beacon received; an EPANDESC block follows.
                info!("EVENT: 20");
            } else if line.starts_with(b"EPANDESC") {
                info!("EPANDESC");
            } else if line.starts_with(b"  ") {
                // Scan-result field: two leading spaces, then `key:value`.
                let text = String::from_utf8_lossy(&line);
                let text = text.trim();
                if let Some((key, value)) = text.split_once(':') {
                    info!("  {text}");
                    result.insert(key.to_string(), value.to_string());
                } else {
                    warn!("malformed scan field: {text}");
                }
            } else {
                info!("unknown scan line: {}", String::from_utf8_lossy(&line));
            }
        }

        debug!("active scan result: {result:?}");
        if is_complete(&result) {
            if let Err(e) = self.cache.store(&result) {
                warn!("could not persist scan cache: {e}");
            }
            Ok(result)
        } else {
            Err(BRouteError::ScanFailed)
        }
    }

    /// Derives the meter's link-local address from its hardware address via
    /// SKLL64. The command echo is discarded; the following line carries the
    /// address.
    async fn derive_link_local(&mut self, addr: &str) -> Result<String, BRouteError> {
        let cmd = format!("SKLL64 {addr}");
        info!("{cmd}");
        let transport = self.transport_mut()?;
        transport.write_line(&cmd).await?;
        transport
            .read_line()
            .await?
            .ok_or(BRouteError::Timeout("SKLL64 echo"))?;
        let line = transport
            .read_line()
            .await?
            .ok_or(BRouteError::Timeout("SKLL64 address"))?;
        let address = String::from_utf8_lossy(&line).trim().to_string();
        info!("IP_ADDR = {address}");
        Ok(address)
    }
}

#[async_trait]
impl<P: SerialPort + OpenAsync> WiSunDevice for Rl7023<P> {
    async fn open(&mut self) -> Result<(), BRouteError> {
        if self.transport.is_none() {
            let port = P::open_port(&self.settings).await?;
            self.transport = Some(LineTransport::new(port, self.settings.read_timeout));
        }
        info!(
            "SK device open port={}, baud={}",
            self.settings.port, self.settings.baudrate
        );
        Ok(())
    }

    async fn reset(&mut self) -> Result<(), BRouteError> {
        self.command("SKRESET", "SKRESET").await
    }

    async fn setup(&mut self, id: &str, password: &str) -> Result<(), BRouteError> {
        self.command(&format!("SKSETPWD C {password}"), "SKSETPWD")
            .await?;
        self.command(&format!("SKSETRBID {id}"), "SKSETRBID").await
    }

    async fn dump_registers(&mut self) -> Result<(), BRouteError> {
        for (key, description) in REGISTER_INFO.iter() {
            self.transport_mut()?
                .write_line(&format!("SKSREG {key}"))
                .await?;

            let mut registers = std::mem::take(&mut self.registers);
            let transport = self.transport_mut()?;
            let mut toc = 0;
            loop {
                let line = transport.read_line().await?;
                if let Some(line) = &line {
                    if line.starts_with(b"ESREG ") {
                        let text = String::from_utf8_lossy(line);
                        if let Some(value) = text.split_whitespace().nth(1) {
                            info!("{key} {description} : {value}");
                            registers.insert(key.to_string(), value.to_string());
                        }
                    } else if line.starts_with(b"OK") {
                        break;
                    }
                }
                toc += 1;
                if toc > WAIT_REGISTER_MAX_READS {
                    break;
                }
            }
            self.registers = registers;
        }
        Ok(())
    }

    async fn scan(&mut self) -> Result<(), BRouteError> {
        self.scan_result = match self.cache.load() {
            Some(cached) => {
                info!("using cached scan result");
                cached
            }
            None => self.scan_active().await?,
        };

        // Configure the device with the discovered network identity, then
        // derive the meter's link-local address.
        let (pan_id, channel, addr) = match (
            self.scan_result.get("Pan ID"),
            self.scan_result.get("Channel"),
            self.scan_result.get("Addr"),
        ) {
            (Some(p), Some(c), Some(a)) => (p.clone(), c.clone(), a.clone()),
            _ => return Err(BRouteError::ScanFailed),
        };
        self.command(&format!("SKSREG S3 {pan_id}"), "SKSREG S3")
            .await?;
        self.command(&format!("SKSREG S2 {channel}"), "SKSREG S2")
            .await?;
        let address = self.derive_link_local(&addr).await?;
        self.session_address = Some(address);
        Ok(())
    }

    async fn join(&mut self, rejoin: bool) -> Result<(), BRouteError> {
        let cmd = if rejoin {
            "SKREJOIN".to_string()
        } else {
            let address = self
                .session_address
                .clone()
                .ok_or_else(|| BRouteError::Other("no session address; scan first".to_string()))?;
            format!("SKJOIN {address}")
        };
        info!("{cmd}");
        self.transport_mut()?.write_line(&cmd).await?;

        let mut toc = 0;
        loop {
            match self.read_event().await? {
                Some(SkEvent::Event { number, .. }) => match number.as_str() {
                    "25" => {
                        // PANA session established.
                        info!("EVENT: 25 - JOIN SUCCEED");
                        return Ok(());
                    }
                    "24" => {
                        // PANA sequence failed.
                        info!("EVENT: 24 - JOIN FAILED");
                        return Err(BRouteError::JoinFailed);
                    }
                    other => info!("EVENT: {other}"),
                },
                Some(SkEvent::Erxudp(_)) => info!("ERXUDP during join"),
                Some(event) => debug!("{event:?}"),
                None => {
                    toc += 1;
                    if toc > WAIT_OK_MAX_READS {
                        info!("join timed out");
                        return Err(BRouteError::JoinFailed);
                    }
                }
            }
        }
    }

    async fn send(&mut self, frame: &EchonetFrame) -> Result<(), BRouteError> {
        let address = self
            .session_address
            .clone()
            .ok_or_else(|| BRouteError::Other("no session address; scan first".to_string()))?;
        let payload = decode_hex(&frame.encode())?;

        // SKSENDTO <handle> <addr> <port> <sec> [<side>] <len>, then the raw
        // binary frame with no trailing terminator.
        let header = if self.kind.is_dual_stack() {
            format!(
                "SKSENDTO 1 {address} {ECHONET_UDP_PORT} 1 0 {:04X} ",
                payload.len()
            )
        } else {
            format!(
                "SKSENDTO 1 {address} {ECHONET_UDP_PORT} 1 {:04X} ",
                payload.len()
            )
        };
        debug!("{}<{} bytes>", header, payload.len());
        let mut cmd = header.into_bytes();
        cmd.extend_from_slice(&payload);

        let transport = self.transport_mut()?;
        transport.write_raw(&cmd).await?;

        let mut sent_event = false;
        let mut toc = 0;
        loop {
            match transport.read_line().await? {
                Some(line) if line.starts_with(b"EVENT 21") => {
                    // Transmission completed event; OK follows.
                    debug!("{}", String::from_utf8_lossy(&line));
                    sent_event = true;
                }
                Some(line) if line.starts_with(b"OK") => {
                    if !sent_event {
                        debug!("OK without transmission event");
                    }
                    return Ok(());
                }
                Some(_) => debug!("unknown response"),
                None => {
                    toc += 1;
                    if toc > WAIT_OK_MAX_READS {
                        debug!("send timed out");
                        return Err(BRouteError::Timeout("SKSENDTO"));
                    }
                }
            }
        }
    }

    async fn receive(&mut self) -> Option<EchonetFrame> {
        match self.read_event().await {
            Ok(Some(SkEvent::Erxudp(event))) => {
                match EchonetFrame::decode(&event.datalen, &event.data) {
                    Ok(frame) => Some(frame),
                    Err(e) => {
                        error!("invalid ERXUDP data frame: {e}");
                        error!("raw event: {event:?}");
                        None
                    }
                }
            }
            Ok(Some(event)) => {
                warn!("other event: {event:?}");
                None
            }
            Ok(None) => None,
            Err(e) => {
                error!("receive failed: {e}");
                None
            }
        }
    }

    async fn terminate(&mut self) -> Result<(), BRouteError> {
        self.command("SKTERM", "SKTERM").await?;

        let mut toc = 0;
        loop {
            match self.read_event().await? {
                Some(SkEvent::Event { number, .. }) => match number.as_str() {
                    "27" => {
                        info!("EVENT: 27 - TERM SUCCEED");
                        return Ok(());
                    }
                    "28" => {
                        // The session also counts as terminated on timeout.
                        info!("EVENT: 28 - TERM TIMEOUT, session terminated");
                        return Ok(());
                    }
                    other => info!("EVENT: {other}"),
                },
                Some(SkEvent::Erxudp(_)) => info!("ERXUDP during terminate"),
                Some(event) => debug!("{event:?}"),
                None => {
                    toc += 1;
                    if toc > WAIT_OK_MAX_READS {
                        info!("terminate timed out");
                        return Err(BRouteError::Timeout("SKTERM"));
                    }
                }
            }
        }
    }

    fn clear_scan_cache(&mut self) {
        self.cache.clear();
        self.scan_result.clear();
        self.session_address = None;
    }

    async fn close(&mut self) {
        self.transport = None;
        info!("SK device closed");
    }
}
